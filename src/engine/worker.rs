//! Engine worker handle for async requests.

use crate::engine::request::EngineRequest;
use crate::engine::{EngineHandle, LoadedDatabase};
use crate::error::SessionError;
use std::path::Path;
use std::sync::mpsc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Maximum time to retry enqueuing unload/shutdown requests when the queue is full.
const CONTROL_SEND_TIMEOUT_SECS: u64 = 5;
/// Backoff between control enqueue retries (milliseconds).
const CONTROL_SEND_BACKOFF_MS: u64 = 25;

/// Handle for sending requests to the main thread engine worker.
///
/// Submission order is completion order: the loop drains one request at a
/// time, so two requests never execute against the engine concurrently.
#[derive(Clone)]
pub struct EngineWorker {
    tx: mpsc::SyncSender<EngineRequest>,
}

impl EngineWorker {
    /// Create a new worker handle with the given sender.
    pub fn new(tx: mpsc::SyncSender<EngineRequest>) -> Self {
        Self { tx }
    }

    fn try_send(&self, req: EngineRequest) -> Result<(), SessionError> {
        match self.tx.try_send(req) {
            Ok(()) => Ok(()),
            Err(mpsc::TrySendError::Full(_)) => Err(SessionError::Busy),
            Err(mpsc::TrySendError::Disconnected(_)) => Err(SessionError::WorkerClosed),
        }
    }

    /// Unload and shutdown must not be lost to a transiently full queue, so
    /// they retry for a bounded window instead of failing fast.
    async fn send_with_retry(
        &self,
        req: EngineRequest,
        max_wait: Duration,
    ) -> Result<(), SessionError> {
        let start = Instant::now();
        let mut pending = req;
        loop {
            match self.tx.try_send(pending) {
                Ok(()) => return Ok(()),
                Err(mpsc::TrySendError::Full(req)) => {
                    if Instant::now().duration_since(start) >= max_wait {
                        return Err(SessionError::Busy);
                    }
                    pending = req;
                    tokio::time::sleep(Duration::from_millis(CONTROL_SEND_BACKOFF_MS)).await;
                }
                Err(mpsc::TrySendError::Disconnected(_)) => return Err(SessionError::WorkerClosed),
            }
        }
    }

    /// Load a binary into the engine slot, optionally starting auto-analysis.
    pub async fn load(
        &self,
        path: &Path,
        run_auto_analysis: bool,
    ) -> Result<LoadedDatabase, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.try_send(EngineRequest::Load {
            path: path.to_path_buf(),
            run_auto_analysis,
            resp: tx,
        })?;
        Ok(rx.await??)
    }

    /// Unload a database, persisting pending state before the slot is freed.
    pub async fn unload(&self, handle: EngineHandle) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send_with_retry(
            EngineRequest::Unload { handle, resp: tx },
            Duration::from_secs(CONTROL_SEND_TIMEOUT_SECS),
        )
        .await?;
        Ok(rx.await??)
    }

    /// Shutdown the engine worker loop.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.send_with_retry(
            EngineRequest::Shutdown,
            Duration::from_secs(CONTROL_SEND_TIMEOUT_SECS),
        )
        .await
    }
}
