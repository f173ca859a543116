//! MCP server implementation with the session management tools.

mod requests;

pub use requests::*;

use crate::error::SessionError;
use crate::session::SessionManager;
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler,
};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, instrument};

/// MCP server for multi-session binary analysis
#[derive(Clone)]
pub struct SessionMcpServer {
    /// Absent in process modes that run without an engine runtime; every
    /// tool then returns a structured unavailability error.
    manager: Option<Arc<SessionManager>>,
    tool_router: ToolRouter<SessionMcpServer>,
    mode: ServerMode,
}

#[derive(Clone, Copy, Debug)]
pub enum ServerMode {
    Stdio,
    Http,
}

impl SessionMcpServer {
    pub fn new(manager: Option<Arc<SessionManager>>, mode: ServerMode) -> Self {
        Self {
            manager,
            tool_router: Self::tool_router(),
            mode,
        }
    }

    /// Mode gate. Tools resolve the manager through this one decision point
    /// so the RPC layer never needs mode awareness of its own.
    fn manager(&self) -> Result<&Arc<SessionManager>, SessionError> {
        self.manager.as_ref().ok_or(SessionError::Unavailable)
    }

    fn concurrency_hint(&self) -> &'static str {
        match self.mode {
            ServerMode::Stdio => {
                "Sessions belong to this stdio connection's process; close them when done."
            }
            ServerMode::Http => {
                "In HTTP mode all clients share one engine slot; a switch changes the current session for everyone."
            }
        }
    }

    fn instructions(&self) -> String {
        format!(
            "Headless binary analysis server with multi-session support. \
             \n\nOne database is loaded in the engine at a time (the *current* session); \
             other sessions stay registered with their state persisted on disk. \
             \n\nWorkflow: \
             \n1. session_open: Open a binary (becomes the current session). Auto-analysis runs in the background; poll is_analyzing. \
             \n2. session_list / session_current: Inspect registered sessions. \
             \n3. session_switch: Save and unload the current database, load another session's. May take seconds for large binaries. \
             \n4. session_close: Close a session; the current session's database is saved first. \
             \n{hint}",
            hint = self.concurrency_hint()
        )
    }
}

fn success_result(value: serde_json::Value) -> CallToolResult {
    CallToolResult::success(vec![Content::text(value.to_string())])
}

fn error_result(message: String) -> CallToolResult {
    CallToolResult {
        content: vec![Content::text(json!({ "error": message }).to_string())],
        is_error: Some(true),
        meta: None,
        structured_content: None,
    }
}

// Tool implementations using the #[tool_router] attribute

#[tool_router]
impl SessionMcpServer {
    #[tool(
        description = "Open a binary file and create an analysis session for it. \
        The session becomes current: its database is loaded into the engine, unloading \
        whichever session held the slot before. Re-opening an already-open path returns \
        the existing session instead of creating a duplicate. Auto-analysis runs in the \
        background; the session's is_analyzing field reports its progress."
    )]
    #[instrument(skip(self), fields(path = %req.path))]
    async fn session_open(
        &self,
        Parameters(req): Parameters<SessionOpenRequest>,
    ) -> Result<CallToolResult, McpError> {
        debug!("Tool call: session_open");
        let manager = match self.manager() {
            Ok(manager) => manager,
            Err(e) => return Ok(e.to_tool_result()),
        };

        let run_auto_analysis = req.run_auto_analysis.unwrap_or(true);
        match manager
            .open_binary(Path::new(&req.path), run_auto_analysis, req.session_id)
            .await
        {
            Ok(id) => match manager.get_session(&id).await {
                Some(session) => {
                    let message = format!("Binary opened successfully: {}", session.filename);
                    Ok(success_result(json!({
                        "success": true,
                        "session": session,
                        "message": message,
                    })))
                }
                None => Ok(error_result(format!(
                    "Failed to retrieve session after opening: {id}"
                ))),
            },
            Err(e) => Ok(e.to_tool_result()),
        }
    }

    #[tool(
        description = "Close an analysis session. Closing the current session saves and \
        unloads its database first; a dormant session's state was already persisted when \
        it was switched away from."
    )]
    #[instrument(skip(self), fields(session_id = %req.session_id))]
    async fn session_close(
        &self,
        Parameters(req): Parameters<SessionCloseRequest>,
    ) -> Result<CallToolResult, McpError> {
        debug!("Tool call: session_close");
        let manager = match self.manager() {
            Ok(manager) => manager,
            Err(e) => return Ok(e.to_tool_result()),
        };

        match manager.close_session(&req.session_id).await {
            Ok(true) => Ok(success_result(json!({
                "success": true,
                "message": format!("Session closed: {}", req.session_id),
            }))),
            Ok(false) => Ok(success_result(json!({
                "success": false,
                "error": format!("Session not found: {}", req.session_id),
            }))),
            Err(e) => Ok(e.to_tool_result()),
        }
    }

    #[tool(
        description = "Switch the current session. Saves and unloads the current database, \
        then loads the target session's. This is the most expensive operation in the \
        system and may take seconds for large binaries. Switching to the session that is \
        already current succeeds without engine work."
    )]
    #[instrument(skip(self), fields(session_id = %req.session_id))]
    async fn session_switch(
        &self,
        Parameters(req): Parameters<SessionSwitchRequest>,
    ) -> Result<CallToolResult, McpError> {
        debug!("Tool call: session_switch");
        let manager = match self.manager() {
            Ok(manager) => manager,
            Err(e) => return Ok(e.to_tool_result()),
        };

        match manager.switch_session(&req.session_id).await {
            Ok(session) => {
                let message = format!(
                    "Switched to session: {} ({})",
                    session.session_id, session.filename
                );
                Ok(success_result(json!({
                    "success": true,
                    "session": session,
                    "message": message,
                })))
            }
            Err(e) => Ok(e.to_tool_result()),
        }
    }

    #[tool(
        description = "List all analysis sessions with their status. The current session \
        is marked with is_current=true; the others are dormant with their state persisted \
        on disk."
    )]
    async fn session_list(
        &self,
        Parameters(_req): Parameters<EmptyParams>,
    ) -> Result<CallToolResult, McpError> {
        debug!("Tool call: session_list");
        let manager = match self.manager() {
            Ok(manager) => manager,
            Err(e) => return Ok(e.to_tool_result()),
        };

        let sessions = manager.list_sessions().await;
        let current_session_id = manager.current_session_id().await;
        Ok(success_result(json!({
            "count": sessions.len(),
            "sessions": sessions,
            "current_session_id": current_session_id,
        })))
    }

    #[tool(description = "Get the current analysis session, if any.")]
    async fn session_current(
        &self,
        Parameters(_req): Parameters<EmptyParams>,
    ) -> Result<CallToolResult, McpError> {
        debug!("Tool call: session_current");
        let manager = match self.manager() {
            Ok(manager) => manager,
            Err(e) => return Ok(e.to_tool_result()),
        };

        match manager.get_current_session().await {
            Some(session) => Ok(success_result(
                serde_json::to_value(&session).unwrap_or(serde_json::Value::Null),
            )),
            None => Ok(error_result(
                "No current session. Use session_open to load a binary first.".to_string(),
            )),
        }
    }
}

#[tool_handler]
impl ServerHandler for SessionMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            instructions: Some(self.instructions()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::stub::{StubEngine, StubState};
    use crate::engine::{run_engine_loop, EngineWorker};
    use std::path::PathBuf;
    use std::sync::mpsc;
    use tempfile::TempDir;

    fn server_with_engine() -> (SessionMcpServer, TempDir) {
        let (tx, rx) = mpsc::sync_channel(16);
        let stub = Arc::new(StubState::default());
        std::thread::spawn(move || run_engine_loop(StubEngine::new(stub), rx));
        let manager = Arc::new(SessionManager::new(EngineWorker::new(tx)));
        (
            SessionMcpServer::new(Some(manager), ServerMode::Stdio),
            TempDir::new().expect("tempdir"),
        )
    }

    fn write_binary(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, b"MZ\x90sample").expect("write binary");
        path
    }

    /// Decode the JSON payload out of a tool result's text content.
    fn payload(result: &CallToolResult) -> serde_json::Value {
        let wire = serde_json::to_value(result).expect("serialize result");
        let text = wire["content"][0]["text"].as_str().expect("text content");
        serde_json::from_str(text).expect("json payload")
    }

    fn is_error(result: &CallToolResult) -> bool {
        result.is_error.unwrap_or(false)
    }

    #[tokio::test]
    async fn tools_report_unavailable_without_manager() {
        let server = SessionMcpServer::new(None, ServerMode::Stdio);

        let result = server
            .session_list(Parameters(EmptyParams {}))
            .await
            .expect("no protocol error");
        assert!(is_error(&result));
        let body = payload(&result);
        assert!(
            body["error"]
                .as_str()
                .expect("error message")
                .contains("not available"),
            "unexpected error: {body}"
        );

        let result = server
            .session_open(Parameters(SessionOpenRequest {
                path: "/tmp/whatever.bin".to_string(),
                run_auto_analysis: None,
                session_id: None,
            }))
            .await
            .expect("no protocol error");
        assert!(is_error(&result));
    }

    #[tokio::test]
    async fn open_list_current_close_round_trip() {
        let (server, dir) = server_with_engine();
        let a = write_binary(&dir, "a.exe");
        let b = write_binary(&dir, "b.exe");

        let result = server
            .session_open(Parameters(SessionOpenRequest {
                path: a.display().to_string(),
                run_auto_analysis: Some(true),
                session_id: None,
            }))
            .await
            .expect("open a");
        assert!(!is_error(&result));
        let body = payload(&result);
        assert_eq!(body["success"], json!(true));
        let s1 = body["session"]["session_id"]
            .as_str()
            .expect("session id")
            .to_string();
        assert_eq!(body["session"]["filename"], json!("a.exe"));
        assert_eq!(body["session"]["is_analyzing"], json!(true));

        let result = server
            .session_open(Parameters(SessionOpenRequest {
                path: b.display().to_string(),
                run_auto_analysis: Some(false),
                session_id: Some("beta".to_string()),
            }))
            .await
            .expect("open b");
        let body = payload(&result);
        assert_eq!(body["session"]["session_id"], json!("beta"));

        let result = server
            .session_list(Parameters(EmptyParams {}))
            .await
            .expect("list");
        let body = payload(&result);
        assert_eq!(body["count"], json!(2));
        assert_eq!(body["current_session_id"], json!("beta"));
        assert_eq!(body["sessions"][0]["session_id"], json!(s1.clone()));

        let result = server
            .session_current(Parameters(EmptyParams {}))
            .await
            .expect("current");
        let body = payload(&result);
        assert_eq!(body["session_id"], json!("beta"));
        assert_eq!(body["is_current"], json!(true));

        let result = server
            .session_close(Parameters(SessionCloseRequest {
                session_id: "beta".to_string(),
            }))
            .await
            .expect("close");
        let body = payload(&result);
        assert_eq!(body["success"], json!(true));

        // Closing again reports not-found in the result body, not as a
        // protocol error.
        let result = server
            .session_close(Parameters(SessionCloseRequest {
                session_id: "beta".to_string(),
            }))
            .await
            .expect("close again");
        assert!(!is_error(&result));
        let body = payload(&result);
        assert_eq!(body["success"], json!(false));
    }

    #[tokio::test]
    async fn switch_tool_reports_new_current_session() {
        let (server, dir) = server_with_engine();
        let a = write_binary(&dir, "a.exe");
        let b = write_binary(&dir, "b.exe");

        let open = |path: PathBuf, id: &str| {
            let server = server.clone();
            let id = id.to_string();
            async move {
                server
                    .session_open(Parameters(SessionOpenRequest {
                        path: path.display().to_string(),
                        run_auto_analysis: Some(false),
                        session_id: Some(id),
                    }))
                    .await
                    .expect("open")
            }
        };
        open(a, "first").await;
        open(b, "second").await;

        let result = server
            .session_switch(Parameters(SessionSwitchRequest {
                session_id: "first".to_string(),
            }))
            .await
            .expect("switch");
        assert!(!is_error(&result));
        let body = payload(&result);
        assert_eq!(body["session"]["session_id"], json!("first"));
        assert_eq!(body["session"]["is_current"], json!(true));

        let result = server
            .session_switch(Parameters(SessionSwitchRequest {
                session_id: "missing".to_string(),
            }))
            .await
            .expect("switch unknown");
        assert!(is_error(&result));
        let body = payload(&result);
        assert!(body["error"]
            .as_str()
            .expect("error message")
            .contains("Session not found"));
    }

    #[tokio::test]
    async fn current_without_sessions_is_structured_error() {
        let (server, _dir) = server_with_engine();
        let result = server
            .session_current(Parameters(EmptyParams {}))
            .await
            .expect("current");
        assert!(is_error(&result));
        let body = payload(&result);
        assert!(body["error"]
            .as_str()
            .expect("error message")
            .contains("No current session"));
    }
}
