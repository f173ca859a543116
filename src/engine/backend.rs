//! Engine backend trait and the types it hands back.

use crate::engine::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Opaque token for a loaded database. Valid only between the `load` that
/// produced it and the matching `unload`; never serialized outward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineHandle(pub(crate) u64);

impl fmt::Display for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle {:#x}", self.0)
    }
}

/// Binary container format detected at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryFormat {
    Elf,
    Pe,
    MachO,
    Raw,
}

impl fmt::Display for BinaryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryFormat::Elf => write!(f, "ELF"),
            BinaryFormat::Pe => write!(f, "PE"),
            BinaryFormat::MachO => write!(f, "Mach-O"),
            BinaryFormat::Raw => write!(f, "raw"),
        }
    }
}

/// Shared flag tracking a fire-and-forget auto-analysis pass.
///
/// The engine keeps analyzing after `load` returns; callers poll this flag
/// instead of blocking on completion. Readable without going through the
/// worker queue.
#[derive(Debug, Clone)]
pub struct AnalysisMonitor {
    running: Arc<AtomicBool>,
}

impl AnalysisMonitor {
    /// Create a monitor in the running state.
    pub fn started() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Mark the analysis pass as finished.
    pub fn finish(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Result of activating a database in the engine slot.
#[derive(Debug)]
pub struct LoadedDatabase {
    pub handle: EngineHandle,
    /// Present when auto-analysis was requested; `None` means the pass was
    /// skipped and the database is immediately quiescent.
    pub analysis: Option<AnalysisMonitor>,
}

/// The single-slot analysis engine, specified by interface only.
///
/// Backends enforce the slot themselves: a `load` while a database is open
/// must fail with [`EngineError::SlotOccupied`] rather than evict it. The
/// session manager is the one responsible for unloading first.
pub trait EngineBackend {
    /// Load a binary into the slot, producing a handle for it.
    fn load(&mut self, path: &Path) -> Result<EngineHandle, EngineError>;

    /// Start the auto-analysis pass for a loaded database. Fire-and-forget:
    /// returns a monitor that flips once the engine reports completion.
    fn start_auto_analysis(&mut self, handle: EngineHandle)
        -> Result<AnalysisMonitor, EngineError>;

    /// Release the slot, persisting any pending state first. An in-flight
    /// analysis pass is completed before persisting, so a database that has
    /// been unloaded once needs no further saving — closing it later is a
    /// pure bookkeeping operation.
    fn unload(&mut self, handle: EngineHandle) -> Result<(), EngineError>;
}
