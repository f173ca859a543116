//! Error types for the binlab MCP server.
//!
//! Session errors are returned with `is_error: true` in CallToolResult,
//! while protocol errors (invalid tool name, malformed args) are handled by rmcp.

use crate::engine::EngineError;
use rmcp::model::{CallToolResult, Content};
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;

/// Session-level errors - returned with is_error: true in CallToolResult
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Input file not found: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session id already exists: {0}")]
    SessionExists(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Session management is not available in this server mode")]
    Unavailable,

    #[error("Engine queue is full, try again later")]
    Busy,

    #[error("Engine worker channel closed")]
    WorkerClosed,
}

impl SessionError {
    /// Convert to MCP CallToolResult with is_error: true.
    ///
    /// The payload carries the structured `{"error": ...}` shape; no error
    /// ever escapes to the transport as a protocol failure.
    pub fn to_tool_result(&self) -> CallToolResult {
        CallToolResult {
            content: vec![Content::text(
                json!({ "error": self.to_string() }).to_string(),
            )],
            is_error: Some(true),
            meta: None,
            structured_content: None,
        }
    }
}

impl<T> From<std::sync::mpsc::SendError<T>> for SessionError {
    fn from(_: std::sync::mpsc::SendError<T>) -> Self {
        SessionError::WorkerClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for SessionError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        SessionError::WorkerClosed
    }
}
