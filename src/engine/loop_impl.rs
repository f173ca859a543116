//! Main engine worker loop.

use crate::engine::request::EngineRequest;
use crate::engine::{EngineBackend, LoadedDatabase};
use std::sync::mpsc;
use tracing::{error, info};

/// Run the engine worker loop on the current (main) thread.
/// This function blocks until Shutdown is received or every sender is gone.
///
/// Requests execute one at a time, in submission order. A request that has
/// started runs to completion; a submitter that stops waiting merely
/// abandons the result (the response send fails and is ignored).
pub fn run_engine_loop<B: EngineBackend>(mut backend: B, rx: mpsc::Receiver<EngineRequest>) {
    while let Ok(req) = rx.recv() {
        match req {
            EngineRequest::Load {
                path,
                run_auto_analysis,
                resp,
            } => {
                info!(path = %path.display(), run_auto_analysis, "Loading database");
                let result = handle_load(&mut backend, &path, run_auto_analysis);
                match &result {
                    Ok(db) => info!(
                        path = %path.display(),
                        handle = %db.handle,
                        analyzing = db.analysis.is_some(),
                        "Database loaded"
                    ),
                    Err(e) => error!(path = %path.display(), error = %e, "Failed to load database"),
                }
                let _ = resp.send(result);
            }
            EngineRequest::Unload { handle, resp } => {
                info!(%handle, "Unloading database");
                let result = backend.unload(handle);
                match &result {
                    Ok(()) => info!(%handle, "Database unloaded and persisted"),
                    Err(e) => error!(%handle, error = %e, "Failed to unload database"),
                }
                let _ = resp.send(result);
            }
            EngineRequest::Shutdown => {
                info!("Engine worker shutting down");
                break;
            }
        }
    }
}

fn handle_load<B: EngineBackend>(
    backend: &mut B,
    path: &std::path::Path,
    run_auto_analysis: bool,
) -> Result<LoadedDatabase, crate::engine::EngineError> {
    let handle = backend.load(path)?;
    let analysis = if run_auto_analysis {
        match backend.start_auto_analysis(handle) {
            Ok(monitor) => Some(monitor),
            Err(e) => {
                // A database with a failed analysis start must not occupy
                // the slot; roll the load back so no partial state remains.
                if let Err(unload_err) = backend.unload(handle) {
                    error!(%handle, error = %unload_err, "Rollback unload failed");
                }
                return Err(e);
            }
        }
    } else {
        None
    };
    Ok(LoadedDatabase { handle, analysis })
}
