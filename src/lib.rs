//! Headless binary analysis MCP server with multi-session support.
//!
//! This library provides an MCP (Model Context Protocol) server that lets
//! LLM agents open several binaries as independently addressable sessions
//! over an analysis engine that can only hold **one database open at a
//! time** per process.
//!
//! # Architecture
//!
//! The engine is not safe for concurrent use and stays on the main thread:
//!
//! - **Main thread**: Runs the engine worker loop (`engine::run_engine_loop`).
//!   All engine operations happen here, one at a time, in submission order.
//!
//! - **Background thread**: Runs the tokio runtime with the async MCP server.
//!   Communicates with the main thread via channels.
//!
//! - **EngineWorker**: Handle for sending requests to the main thread.
//!
//! - **SessionManager**: Registry of sessions and the current-session
//!   pointer; presents N independent sessions over the single engine slot.
//!
//! - **SessionMcpServer**: The MCP server that exposes the session tools.
//!   Uses the `rmcp` crate for MCP protocol handling.
//!
//! # Tools
//!
//! - `session_open`: Open a binary and create a session (dedup on path)
//! - `session_close`: Close a session, saving the current one's database
//! - `session_switch`: Save/unload the current database, load another
//! - `session_list`: List sessions with is_current/is_analyzing status
//! - `session_current`: Get the current session

use std::path::PathBuf;

pub mod engine;
pub mod error;
pub mod server;
pub mod session;

pub use engine::{EngineBackend, EngineWorker};
pub use error::SessionError;
pub use server::{ServerMode, SessionMcpServer};
pub use session::{SessionDescriptor, SessionManager};

/// Expand `~/` prefix to the user's home directory.
pub fn expand_path(path: &str) -> PathBuf {
    path.strip_prefix("~/")
        .and_then(|stripped| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(stripped)))
        .unwrap_or_else(|| PathBuf::from(path))
}
