//! Engine adapter and worker loop.
//!
//! The analysis engine can hold only one database open per process and is
//! not safe for concurrent use. Everything that touches it is funneled
//! through a single worker loop (`run_engine_loop`) that drains a bounded
//! request queue in strict submission order. The backend and the live
//! database slot are owned by the loop and are unreachable from anywhere
//! else, so the single-slot invariant cannot be violated by a caller.

mod backend;
mod loop_impl;
mod request;
pub mod triage;
mod worker;

#[cfg(test)]
pub(crate) mod stub;

pub use backend::{AnalysisMonitor, BinaryFormat, EngineBackend, EngineHandle, LoadedDatabase};
pub use loop_impl::run_engine_loop;
pub use request::EngineRequest;
pub use worker::EngineWorker;

use thiserror::Error;

/// Errors reported by an engine backend.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to load {path}: {reason}")]
    LoadFailed { path: String, reason: String },

    #[error("Failed to persist database state: {0}")]
    PersistFailed(String),

    #[error("Engine slot already occupied by {0}")]
    SlotOccupied(EngineHandle),

    #[error("No database loaded for {0}")]
    UnknownHandle(EngineHandle),

    #[error("Auto-analysis failed: {0}")]
    AnalysisFailed(String),
}
