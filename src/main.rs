//! Headless binary analysis MCP server.
//!
//! This binary runs an MCP server that provides multi-session binary
//! analysis via stdin/stdout or Streamable HTTP transport.
//!
//! Architecture:
//! - Main thread: Runs the engine worker loop (the engine is single-slot
//!   and not safe for concurrent use)
//! - Background thread: Runs tokio runtime with async MCP server

use binlab_mcp::engine::{self, triage::TriageEngine, EngineWorker};
use binlab_mcp::{ServerMode, SessionManager, SessionMcpServer};
use bytes::Bytes;
use clap::{Args, Parser, Subcommand};
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::http::{header::ORIGIN, Request, Response, StatusCode};
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use rmcp::transport::stdio;
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use rmcp::ServiceExt;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::Notify;
use tower_service::Service;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const REQUEST_QUEUE_CAPACITY: usize = 64;

#[derive(Parser)]
#[command(
    name = "binlab-mcp",
    version,
    about = "Headless multi-session binary analysis MCP server"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the MCP server over stdio (default)
    Serve(ServeArgs),
    /// Run the MCP server over Streamable HTTP (SSE)
    ServeHttp(ServeHttpArgs),
}

#[derive(Args, Default, Clone)]
struct ServeArgs {
    /// Binary to open as the initial session before any call is served
    input: Option<PathBuf>,
    /// Skip auto-analysis for the initial session
    #[arg(long)]
    no_auto_analysis: bool,
}

#[derive(Args)]
struct ServeHttpArgs {
    #[command(flatten)]
    serve: ServeArgs,
    /// Bind address (e.g., 127.0.0.1:8745)
    #[arg(long, default_value = "127.0.0.1:8745")]
    bind: String,
    /// SSE keep-alive interval in seconds (0 disables)
    #[arg(long, default_value_t = 15)]
    sse_keep_alive_secs: u64,
    /// Use stateless mode (POST only; no sessions)
    #[arg(long)]
    stateless: bool,
    /// Allowed Origin values (comma-separated). Defaults to localhost only.
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "http://localhost,http://127.0.0.1"
    )]
    allow_origin: Vec<String>,
}

/// Rejects browser-originated requests whose Origin is not allowlisted.
#[derive(Clone)]
struct OriginGuard<S> {
    inner: S,
    allowed: Arc<HashSet<String>>,
}

impl<B, S> Service<Request<B>> for OriginGuard<S>
where
    B: http_body::Body + Send + 'static,
    B::Error: std::fmt::Display,
    S: Service<
            Request<B>,
            Response = Response<BoxBody<Bytes, std::convert::Infallible>>,
            Error = std::convert::Infallible,
        > + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    type Response = Response<BoxBody<Bytes, std::convert::Infallible>>;
    type Error = std::convert::Infallible;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let allowed = self.allowed.clone();
        let mut inner = self.inner.clone();
        Box::pin(async move {
            if let Some(origin) = req.headers().get(ORIGIN).and_then(|v| v.to_str().ok()) {
                if !allowed.contains(origin) {
                    let resp = Response::builder()
                        .status(StatusCode::FORBIDDEN)
                        .body(Full::new(Bytes::from("Forbidden")).boxed())
                        .expect("valid response");
                    return Ok(resp);
                }
            }
            inner.call(req).await
        })
    }
}

fn main() -> anyhow::Result<()> {
    // Initialize logging to stderr (stdout is used for MCP protocol)
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("binlab_mcp=info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve(ServeArgs::default())) {
        Command::Serve(args) => run_server(args),
        Command::ServeHttp(args) => run_server_http(args),
    }
}

async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigquit = signal(SignalKind::quit())?;
        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
            _ = sigquit.recv() => {},
            _ = tokio::signal::ctrl_c() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    Ok(())
}

/// Open the operator-supplied initial binary, exactly as session_open would.
async fn open_initial_session(
    manager: &Arc<SessionManager>,
    args: &ServeArgs,
) -> anyhow::Result<()> {
    let Some(input) = &args.input else {
        info!("No initial binary specified; use session_open to load binaries dynamically");
        return Ok(());
    };
    info!(path = %input.display(), "Opening initial session");
    let session_id = manager
        .open_binary(input, !args.no_auto_analysis, None)
        .await
        .map_err(|e| anyhow::anyhow!("failed to open initial binary: {e}"))?;
    info!(%session_id, "Initial session created");
    Ok(())
}

fn run_server(args: ServeArgs) -> anyhow::Result<()> {
    info!("Starting binlab MCP server (stdio mode)");

    let (tx, rx) = mpsc::sync_channel(REQUEST_QUEUE_CAPACITY);
    let worker = EngineWorker::new(tx);
    let manager = Arc::new(SessionManager::new(worker.clone()));

    // Spawn background thread for tokio runtime and MCP server
    let server_handle = thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("Failed to create tokio runtime");

        rt.block_on(async move {
            let result = serve_stdio(&manager, &args).await;
            if let Err(err) = &result {
                error!(error = %err, "Server exiting with error");
            }
            // Whatever got us here, leave no unsaved session behind and
            // release the engine loop.
            manager.close_all_sessions().await;
            let _ = worker.shutdown().await;
            result
        })
    });

    // Run engine worker loop on main thread
    info!("Starting engine worker loop");
    engine::run_engine_loop(TriageEngine::new(), rx);
    info!("Engine worker loop finished");

    if let Err(e) = server_handle.join() {
        error!("Server thread panicked: {:?}", e);
    }

    info!("Server stopped");
    Ok(())
}

async fn serve_stdio(manager: &Arc<SessionManager>, args: &ServeArgs) -> anyhow::Result<()> {
    open_initial_session(manager, args).await?;

    info!("MCP server listening on stdio");
    let server = SessionMcpServer::new(Some(manager.clone()), ServerMode::Stdio);
    let mut service = Some(server.serve(stdio()).await?);

    let shutdown_notify = Arc::new(Notify::new());
    let shutdown_signal = shutdown_notify.clone();
    let shutdown_manager = manager.clone();
    tokio::spawn(async move {
        if wait_for_shutdown_signal().await.is_ok() {
            info!("Shutdown signal received, closing all sessions");
            shutdown_manager.close_all_sessions().await;
            info!("All sessions closed");
            shutdown_signal.notify_one();
        } else {
            info!("Shutdown signal handler failed; server will continue running");
        }
    });

    loop {
        tokio::select! {
            _ = shutdown_notify.notified() => {
                if let Some(mut running) = service.take() {
                    let _ = running.cancel().await?;
                }
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(200)) => {
                if let Some(running) = service.as_ref() {
                    if running.is_transport_closed() {
                        if let Some(running) = service.take() {
                            let _ = running.waiting().await?;
                        }
                        break;
                    }
                }
            }
        }
    }
    info!("MCP server shutting down");
    Ok(())
}

fn run_server_http(args: ServeHttpArgs) -> anyhow::Result<()> {
    info!("Starting binlab MCP server (streamable HTTP mode)");

    let bind_addr: SocketAddr = args
        .bind
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid bind address: {e}"))?;

    let (tx, rx) = mpsc::sync_channel(REQUEST_QUEUE_CAPACITY);
    let worker = EngineWorker::new(tx);
    let manager = Arc::new(SessionManager::new(worker.clone()));

    let server_handle = thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .expect("Failed to create tokio runtime");

        rt.block_on(async move {
            let result = serve_http(&manager, &args, bind_addr).await;
            if let Err(err) = &result {
                error!(error = %err, "HTTP server error");
            }
            manager.close_all_sessions().await;
            let _ = worker.shutdown().await;
        })
    });

    info!("Starting engine worker loop");
    engine::run_engine_loop(TriageEngine::new(), rx);
    info!("Engine worker loop finished");

    if let Err(e) = server_handle.join() {
        error!("Server thread panicked: {:?}", e);
    }

    info!("Server stopped");
    Ok(())
}

async fn serve_http(
    manager: &Arc<SessionManager>,
    args: &ServeHttpArgs,
    bind_addr: SocketAddr,
) -> anyhow::Result<()> {
    open_initial_session(manager, &args.serve).await?;

    let http_sessions = Arc::new(LocalSessionManager::default());
    let cancel = tokio_util::sync::CancellationToken::new();
    let config = StreamableHttpServerConfig {
        sse_keep_alive: if args.sse_keep_alive_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(args.sse_keep_alive_secs))
        },
        stateful_mode: !args.stateless,
    };

    let manager_for_factory = manager.clone();
    let service = StreamableHttpService::new(
        move || {
            Ok(SessionMcpServer::new(
                Some(manager_for_factory.clone()),
                ServerMode::Http,
            ))
        },
        http_sessions,
        config,
    );
    let allowed: HashSet<String> = args
        .allow_origin
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    let service = OriginGuard {
        inner: service,
        allowed: Arc::new(allowed),
    };

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("bind failed: {e}"))?;
    info!("MCP HTTP server listening on http://{bind_addr}");

    let shutdown_manager = manager.clone();
    let cancel_for_shutdown = cancel.clone();
    tokio::spawn(async move {
        if wait_for_shutdown_signal().await.is_ok() {
            info!("Shutdown signal received, closing all sessions");
            shutdown_manager.close_all_sessions().await;
            info!("All sessions closed");
            cancel_for_shutdown.cancel();
        }
    });

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("HTTP server shutting down");
                break;
            }
            res = listener.accept() => {
                let (stream, _) = res.map_err(|e| anyhow::anyhow!("accept failed: {e}"))?;
                let svc = service.clone();
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let conn = http1::Builder::new().serve_connection(
                        io,
                        TowerToHyperService::new(svc),
                    );
                    if let Err(err) = conn.await {
                        tracing::error!("http connection error: {err}");
                    }
                });
            }
        }
    }
    Ok(())
}
