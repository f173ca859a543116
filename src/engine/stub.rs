//! Scriptable engine backend for tests.
//!
//! Records every engine call, injects failures on demand, and panics if two
//! operations ever overlap in time, which is how the tests prove the worker
//! loop really serializes engine access.

use crate::engine::{AnalysisMonitor, EngineBackend, EngineError, EngineHandle};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StubEvent {
    Load(PathBuf),
    StartAnalysis(u64),
    Unload(u64),
}

#[derive(Default)]
pub struct StubState {
    events: Mutex<Vec<StubEvent>>,
    monitors: Mutex<Vec<AnalysisMonitor>>,
    pub fail_next_load: AtomicBool,
    pub fail_next_unload: AtomicBool,
    /// Artificial per-operation latency, widens the window a racing caller
    /// would need to hit for the reentrancy guard to fire.
    pub op_delay_ms: AtomicU64,
    entered: AtomicBool,
}

impl StubState {
    pub fn events(&self) -> Vec<StubEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn unload_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, StubEvent::Unload(_)))
            .count()
    }

    pub fn load_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, StubEvent::Load(_)))
            .count()
    }

    /// Monitors handed out so far, in order; tests flip them to simulate
    /// the engine finishing an analysis pass.
    pub fn monitors(&self) -> Vec<AnalysisMonitor> {
        self.monitors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn record(&self, event: StubEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

/// Guard proving mutual exclusion: entering while another operation is in
/// flight is a bug in the dispatch discipline, not in the test.
struct EntryGuard<'a>(&'a StubState);

impl<'a> EntryGuard<'a> {
    fn enter(state: &'a StubState) -> Self {
        assert!(
            !state.entered.swap(true, Ordering::SeqCst),
            "engine entered re-entrantly"
        );
        let delay = state.op_delay_ms.load(Ordering::Relaxed);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        Self(state)
    }
}

impl Drop for EntryGuard<'_> {
    fn drop(&mut self) {
        self.0.entered.store(false, Ordering::SeqCst);
    }
}

pub struct StubEngine {
    state: Arc<StubState>,
    next_handle: u64,
    loaded: Option<EngineHandle>,
}

impl StubEngine {
    pub fn new(state: Arc<StubState>) -> Self {
        Self {
            state,
            next_handle: 0,
            loaded: None,
        }
    }
}

impl EngineBackend for StubEngine {
    fn load(&mut self, path: &Path) -> Result<EngineHandle, EngineError> {
        let _entry = EntryGuard::enter(&self.state);
        if let Some(handle) = self.loaded {
            return Err(EngineError::SlotOccupied(handle));
        }
        if self.state.fail_next_load.swap(false, Ordering::SeqCst) {
            return Err(EngineError::LoadFailed {
                path: path.display().to_string(),
                reason: "injected load failure".to_string(),
            });
        }
        self.state.record(StubEvent::Load(path.to_path_buf()));
        self.next_handle += 1;
        let handle = EngineHandle(self.next_handle);
        self.loaded = Some(handle);
        Ok(handle)
    }

    fn start_auto_analysis(
        &mut self,
        handle: EngineHandle,
    ) -> Result<AnalysisMonitor, EngineError> {
        let _entry = EntryGuard::enter(&self.state);
        if self.loaded != Some(handle) {
            return Err(EngineError::UnknownHandle(handle));
        }
        self.state.record(StubEvent::StartAnalysis(handle.0));
        let monitor = AnalysisMonitor::started();
        self.state
            .monitors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(monitor.clone());
        Ok(monitor)
    }

    fn unload(&mut self, handle: EngineHandle) -> Result<(), EngineError> {
        let _entry = EntryGuard::enter(&self.state);
        if self.loaded != Some(handle) {
            return Err(EngineError::UnknownHandle(handle));
        }
        if self.state.fail_next_unload.swap(false, Ordering::SeqCst) {
            return Err(EngineError::PersistFailed(
                "injected unload failure".to_string(),
            ));
        }
        self.state.record(StubEvent::Unload(handle.0));
        self.loaded = None;
        Ok(())
    }
}
