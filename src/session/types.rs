//! Session entity and the descriptor serialized to tool callers.

use crate::engine::{AnalysisMonitor, EngineHandle};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Engine-side state of an activated session. Present exactly while this
/// session's database occupies the engine slot; never serialized.
#[derive(Debug)]
pub struct ActiveDatabase {
    pub handle: EngineHandle,
    /// Monitor for the auto-analysis pass, if one was requested.
    pub analysis: Option<AnalysisMonitor>,
}

/// One binary's analysis lifecycle: immutable identity plus mutable status.
#[derive(Debug)]
pub struct Session {
    pub session_id: String,
    /// Canonical path of the binary; dedup key, immutable after creation.
    pub input_path: PathBuf,
    pub filename: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub metadata: HashMap<String, serde_json::Value>,
    /// Registration order; drives stable listing.
    pub seq: u64,
    pub active: Option<ActiveDatabase>,
}

impl Session {
    pub fn new(session_id: String, input_path: PathBuf, seq: u64) -> Self {
        let filename = input_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| input_path.display().to_string());
        let now = Utc::now();
        Self {
            session_id,
            input_path,
            filename,
            created_at: now,
            last_accessed: now,
            metadata: HashMap::new(),
            seq,
            active: None,
        }
    }

    /// Update the last-accessed timestamp.
    pub fn touch(&mut self) {
        self.last_accessed = Utc::now();
    }

    /// Whether the engine is still running auto-analysis for this session.
    /// A dormant session is never analyzing; its database is not loaded.
    pub fn is_analyzing(&self) -> bool {
        self.active
            .as_ref()
            .and_then(|a| a.analysis.as_ref())
            .map(|m| m.is_running())
            .unwrap_or(false)
    }

    /// Plain serializable view handed to the tool layer. Engine handles
    /// never leave the manager.
    pub fn descriptor(&self, is_current: bool) -> SessionDescriptor {
        SessionDescriptor {
            session_id: self.session_id.clone(),
            input_path: self.input_path.display().to_string(),
            filename: self.filename.clone(),
            created_at: self.created_at,
            last_accessed: self.last_accessed,
            is_current,
            is_analyzing: self.is_analyzing(),
            metadata: self.metadata.clone(),
        }
    }
}

/// Session view serialized in tool results. Timestamps serialize as
/// RFC 3339 / ISO-8601 strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub session_id: String,
    pub input_path: String,
    pub filename: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub is_current: bool,
    pub is_analyzing: bool,
    pub metadata: HashMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_is_final_path_component() {
        let session = Session::new("s1".to_string(), PathBuf::from("/tmp/bin/target.exe"), 0);
        assert_eq!(session.filename, "target.exe");
    }

    #[test]
    fn descriptor_serializes_iso8601_timestamps() {
        let session = Session::new("s1".to_string(), PathBuf::from("/tmp/a.bin"), 0);
        let value = serde_json::to_value(session.descriptor(true)).expect("serialize");

        let created = value["created_at"].as_str().expect("created_at is a string");
        assert!(created.contains('T'), "not ISO-8601: {created}");
        assert_eq!(value["is_current"], serde_json::json!(true));
        assert_eq!(value["is_analyzing"], serde_json::json!(false));
        assert!(value["metadata"].as_object().expect("metadata map").is_empty());
        assert!(
            value.get("active").is_none() && value.get("engine_handle").is_none(),
            "engine internals must not serialize"
        );
    }

    #[test]
    fn dormant_session_never_reports_analyzing() {
        let mut session = Session::new("s1".to_string(), PathBuf::from("/tmp/a.bin"), 0);
        assert!(!session.is_analyzing());

        let monitor = crate::engine::AnalysisMonitor::started();
        session.active = Some(ActiveDatabase {
            handle: crate::engine::EngineHandle(1),
            analysis: Some(monitor.clone()),
        });
        assert!(session.is_analyzing());

        monitor.finish();
        assert!(!session.is_analyzing());

        session.active = None;
        assert!(!session.is_analyzing());
    }
}
