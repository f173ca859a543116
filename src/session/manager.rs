//! Session manager: registry, current-session pointer, and the
//! single-slot exclusivity protocol.

use crate::engine::EngineWorker;
use crate::error::SessionError;
use crate::session::types::{ActiveDatabase, Session, SessionDescriptor};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Length of generated session ids.
const SESSION_ID_LEN: usize = 8;

#[derive(Default)]
struct SessionTable {
    sessions: HashMap<String, Session>,
    /// Id of the session whose database holds the engine slot, if any.
    current: Option<String>,
}

impl SessionTable {
    fn in_creation_order(&self) -> Vec<&Session> {
        let mut sessions: Vec<_> = self.sessions.values().collect();
        sessions.sort_by_key(|s| s.seq);
        sessions
    }
}

/// Manager for multiple analysis sessions over one engine slot.
///
/// Any number of RPC callers may invoke these methods concurrently. The
/// registry and current pointer live behind one `RwLock`, so readers never
/// observe them half-reflecting an engine operation. Every state-mutating
/// operation additionally queues on the `slot` mutex, which serializes the
/// compound deactivate-then-activate sequences; the engine worker below it
/// guarantees no two engine operations ever overlap in time. The table lock
/// is never held across engine I/O - only the slot mutex is, and read-only
/// callers do not take it at all.
pub struct SessionManager {
    table: RwLock<SessionTable>,
    slot: Mutex<()>,
    worker: EngineWorker,
    next_seq: AtomicU64,
}

impl SessionManager {
    pub fn new(worker: EngineWorker) -> Self {
        Self {
            table: RwLock::new(SessionTable::default()),
            slot: Mutex::new(()),
            worker,
            next_seq: AtomicU64::new(0),
        }
    }

    /// Open a binary, creating a new session for it or reusing the session
    /// that already has this exact path. The new session becomes current;
    /// whoever held the slot before is saved and unloaded first.
    pub async fn open_binary(
        &self,
        path: &Path,
        run_auto_analysis: bool,
        session_id: Option<String>,
    ) -> Result<String, SessionError> {
        let input_path = resolve_input(path)?;
        let _slot = self.slot.lock().await;

        {
            let mut table = self.table.write().await;
            if let Some(id) = &session_id {
                if table.sessions.contains_key(id) {
                    return Err(SessionError::SessionExists(id.clone()));
                }
            }
            if let Some(existing) = table
                .sessions
                .values_mut()
                .find(|s| s.input_path == input_path)
            {
                existing.touch();
                let id = existing.session_id.clone();
                debug!(session_id = %id, path = %input_path.display(), "Path already open, reusing session");
                return Ok(id);
            }
        }

        self.deactivate_current().await?;

        let loaded = self.worker.load(&input_path, run_auto_analysis).await?;

        let mut table = self.table.write().await;
        let id = match session_id {
            Some(id) => id,
            None => generate_session_id(&table.sessions),
        };
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let mut session = Session::new(id.clone(), input_path.clone(), seq);
        session.active = Some(ActiveDatabase {
            handle: loaded.handle,
            analysis: loaded.analysis,
        });
        table.sessions.insert(id.clone(), session);
        table.current = Some(id.clone());
        info!(session_id = %id, path = %input_path.display(), run_auto_analysis, "Session opened");
        Ok(id)
    }

    /// Read-only lookup; touches `last_accessed` on hit. Never enters the
    /// engine queue.
    pub async fn get_session(&self, id: &str) -> Option<SessionDescriptor> {
        let mut guard = self.table.write().await;
        let table = &mut *guard;
        let is_current = table.current.as_deref() == Some(id);
        let session = table.sessions.get_mut(id)?;
        session.touch();
        Some(session.descriptor(is_current))
    }

    pub async fn get_current_session(&self) -> Option<SessionDescriptor> {
        let mut guard = self.table.write().await;
        let table = &mut *guard;
        let id = table.current.clone()?;
        let session = table.sessions.get_mut(&id)?;
        session.touch();
        Some(session.descriptor(true))
    }

    /// Snapshot of every registered session in creation order.
    pub async fn list_sessions(&self) -> Vec<SessionDescriptor> {
        let table = self.table.read().await;
        table
            .in_creation_order()
            .into_iter()
            .map(|s| s.descriptor(table.current.as_deref() == Some(s.session_id.as_str())))
            .collect()
    }

    pub async fn current_session_id(&self) -> Option<String> {
        self.table.read().await.current.clone()
    }

    /// Close a session. Returns `false` for an unknown id. Closing the
    /// current session saves and unloads its database first; if that fails
    /// the session stays registered and current rather than silently losing
    /// state. A dormant session was already persisted when it was switched
    /// away from, so its close is pure registry removal.
    pub async fn close_session(&self, id: &str) -> Result<bool, SessionError> {
        let _slot = self.slot.lock().await;

        let current_handle = {
            let table = self.table.read().await;
            let Some(session) = table.sessions.get(id) else {
                return Ok(false);
            };
            if table.current.as_deref() == Some(id) {
                session.active.as_ref().map(|a| a.handle)
            } else {
                None
            }
        };

        if let Some(handle) = current_handle {
            self.worker.unload(handle).await?;
        }

        let mut table = self.table.write().await;
        table.sessions.remove(id);
        if table.current.as_deref() == Some(id) {
            table.current = None;
        }
        info!(session_id = %id, "Session closed");
        Ok(true)
    }

    /// Make a session current, unloading whichever database holds the slot
    /// and loading the target's. The most expensive operation in the system
    /// - O(database size) I/O - and fully serialized against every other
    /// mutating operation. Switching to the current session is a no-op that
    /// still counts as an access.
    pub async fn switch_session(&self, id: &str) -> Result<SessionDescriptor, SessionError> {
        let _slot = self.slot.lock().await;

        let path = {
            let mut guard = self.table.write().await;
            let table = &mut *guard;
            let is_current = table.current.as_deref() == Some(id);
            let Some(session) = table.sessions.get_mut(id) else {
                return Err(SessionError::SessionNotFound(id.to_string()));
            };
            session.touch();
            if is_current {
                debug!(session_id = %id, "Already current, switch is a no-op");
                return Ok(session.descriptor(true));
            }
            session.input_path.clone()
        };

        self.deactivate_current().await?;

        // Deactivation (just now, or on the earlier switch-away) persisted
        // this database, so re-activation does not re-run auto-analysis.
        let loaded = self.worker.load(&path, false).await?;

        let mut guard = self.table.write().await;
        let table = &mut *guard;
        let Some(session) = table.sessions.get_mut(id) else {
            // Unreachable while the slot lock is held; no other mutator runs.
            return Err(SessionError::SessionNotFound(id.to_string()));
        };
        session.active = Some(ActiveDatabase {
            handle: loaded.handle,
            analysis: loaded.analysis,
        });
        session.touch();
        let descriptor = session.descriptor(true);
        table.current = Some(id.to_string());
        info!(session_id = %id, "Switched current session");
        Ok(descriptor)
    }

    /// Deactivate and remove every session, tolerating and logging
    /// individual engine failures so that shutdown always runs to
    /// completion. For process-teardown paths.
    pub async fn close_all_sessions(&self) {
        let _slot = self.slot.lock().await;

        let ids: Vec<String> = {
            let table = self.table.read().await;
            table
                .in_creation_order()
                .into_iter()
                .map(|s| s.session_id.clone())
                .collect()
        };

        for id in ids {
            let handle = {
                let table = self.table.read().await;
                if table.current.as_deref() == Some(id.as_str()) {
                    table
                        .sessions
                        .get(&id)
                        .and_then(|s| s.active.as_ref().map(|a| a.handle))
                } else {
                    None
                }
            };
            if let Some(handle) = handle {
                if let Err(e) = self.worker.unload(handle).await {
                    warn!(session_id = %id, error = %e, "Failed to unload session during close-all");
                }
            }
            let mut table = self.table.write().await;
            table.sessions.remove(&id);
            if table.current.as_deref() == Some(id.as_str()) {
                table.current = None;
            }
            debug!(session_id = %id, "Session removed");
        }
        info!("All sessions closed");
    }

    /// Save and unload the current session's database, if one is loaded.
    /// On failure the registry is left untouched - the session stays
    /// current, so registry state keeps mirroring real engine state.
    async fn deactivate_current(&self) -> Result<(), SessionError> {
        let target = {
            let table = self.table.read().await;
            table.current.as_ref().and_then(|id| {
                table
                    .sessions
                    .get(id)
                    .and_then(|s| s.active.as_ref().map(|a| (id.clone(), a.handle)))
            })
        };
        let Some((id, handle)) = target else {
            return Ok(());
        };

        self.worker.unload(handle).await?;

        let mut table = self.table.write().await;
        if let Some(session) = table.sessions.get_mut(&id) {
            session.active = None;
            session.touch();
        }
        table.current = None;
        debug!(session_id = %id, "Session deactivated");
        Ok(())
    }
}

/// Validate the input path and canonicalize it into the dedup key.
fn resolve_input(path: &Path) -> Result<PathBuf, SessionError> {
    let expanded = crate::expand_path(&path.to_string_lossy());
    match std::fs::metadata(&expanded) {
        Ok(meta) if meta.is_file() => expanded
            .canonicalize()
            .map_err(|_| SessionError::InputNotFound(expanded)),
        _ => Err(SessionError::InputNotFound(expanded)),
    }
}

/// Short random token, collision-checked against the registry.
fn generate_session_id(sessions: &HashMap<String, Session>) -> String {
    loop {
        let token = Uuid::new_v4().simple().to_string();
        let id = token[..SESSION_ID_LEN].to_string();
        if !sessions.contains_key(&id) {
            return id;
        }
    }
}
