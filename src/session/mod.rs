//! Session management for multi-binary analysis.
//!
//! The engine can hold one database per process, but MCP callers want to
//! treat multiple binaries as independently addressable sessions. This
//! module presents that illusion: a registry of sessions of which at most
//! one - the *current* session - actually occupies the engine slot, while
//! the rest lie dormant with their state persisted on disk.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │ MCP Client ──▶ SessionMcpServer                        │
//! │                ├─ session_open/list/switch/close/...   │
//! │                ▼                                       │
//! │                SessionManager                          │
//! │                ├─ sessions: HashMap<String, Session>   │
//! │                ├─ current: Option<String>              │
//! │                └─ slot mutex (serializes mutators)     │
//! │                ▼                                       │
//! │                EngineWorker ──channel──▶ engine loop   │
//! │                                          (main thread) │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! A switch saves and unloads the current database before loading the
//! target's - O(database size) I/O - so every mutating operation queues on
//! one fair lock and the engine never sees two operations at once.

mod manager;
mod types;

pub use manager::SessionManager;
pub use types::{ActiveDatabase, Session, SessionDescriptor};
