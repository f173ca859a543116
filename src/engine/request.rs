//! Request types for the engine worker.

use crate::engine::{EngineError, EngineHandle, LoadedDatabase};
use std::path::PathBuf;
use tokio::sync::oneshot;

/// Request types for the engine worker
pub enum EngineRequest {
    Load {
        path: PathBuf,
        run_auto_analysis: bool,
        resp: oneshot::Sender<Result<LoadedDatabase, EngineError>>,
    },
    Unload {
        handle: EngineHandle,
        resp: oneshot::Sender<Result<(), EngineError>>,
    },
    Shutdown,
}
