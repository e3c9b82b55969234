//! Process entrypoint (C10, ambient): `cli` and `server` subcommands that
//! assemble C1-C9 into a running process (§6.4).
//!
//! Both modes share one `AppConfig` and build the same
//! `Coordinator`/`LoopManager`/`StreamingSession` stack; `server` exposes it
//! over an `axum` WebSocket route, `cli` drives it from stdin and prints
//! frames to stdout. Exit code 0 on graceful shutdown, non-zero on startup
//! failure.

use std::io::{self, BufRead, Write as _};
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router as AxumRouter;
use clap::{Parser, Subcommand};

use agentforge::engine::config::{AppConfig, ConfigOverrides};
use agentforge::engine::coordinator::{Coordinator, CoordinatorConfig};
use agentforge::engine::llm_client::LLMClient;
use agentforge::engine::loop_manager::{LoopManager, LoopManagerConfig};
use agentforge::engine::project_context::ProjectContext;
use agentforge::engine::session::{ClientInput, StreamingSession};
use agentforge::engine::tool_protocol::ToolRegistry;
use agentforge::engine::tools::bash::{BashTool, Platform};
use agentforge::engine::tools::filesystem::FileSystemTool;
use agentforge::engine::tools::register_builtin_tools;

#[derive(Parser, Debug)]
#[command(name = "agentforge", about = "Concurrent multi-agent orchestration engine")]
struct Cli {
    #[command(subcommand)]
    mode: Mode,

    #[arg(long, env = "LLM_PROVIDER")]
    llm_provider: Option<String>,
    #[arg(long, env = "LLM_MODEL")]
    llm_model: Option<String>,
    #[arg(long, env = "PROJECT_PATH")]
    project_path: Option<PathBuf>,
    #[arg(long, env = "DEFAULT_PROJECT_NAME")]
    default_project_name: Option<String>,

    #[arg(long, env = "AWS_REGION")]
    aws_region: Option<String>,
    #[arg(long, env = "AWS_ACCESS_KEY_ID")]
    aws_access_key_id: Option<String>,
    #[arg(long, env = "AWS_SECRET_ACCESS_KEY")]
    aws_secret_access_key: Option<String>,
    #[arg(long, env = "OPENROUTER_API_KEY")]
    openrouter_api_key: Option<String>,
    #[arg(long, env = "GEMINI_API_KEY")]
    gemini_api_key: Option<String>,
    #[arg(long, env = "ANTHROPIC_API_KEY")]
    anthropic_api_key: Option<String>,
    #[arg(long, env = "SELF_HOSTED_ENDPOINT")]
    self_hosted_endpoint: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Read non-empty lines from stdin, one agent loop per line.
    Cli,
    /// Serve the streaming session layer over a WebSocket.
    Server {
        #[arg(long, env = "SERVER_PORT")]
        port: Option<u16>,
    },
}

impl Cli {
    fn overrides(&self, server_port: Option<u16>) -> ConfigOverrides {
        ConfigOverrides {
            llm_provider: self.llm_provider.clone(),
            llm_model: self.llm_model.clone(),
            server_port,
            project_path: self.project_path.clone(),
            default_project_name: self.default_project_name.clone(),
            aws_region: self.aws_region.clone(),
            aws_access_key_id: self.aws_access_key_id.clone(),
            aws_secret_access_key: self.aws_secret_access_key.clone(),
            openrouter_api_key: self.openrouter_api_key.clone(),
            gemini_api_key: self.gemini_api_key.clone(),
            anthropic_api_key: self.anthropic_api_key.clone(),
            self_hosted_endpoint: self.self_hosted_endpoint.clone(),
            ..Default::default()
        }
    }
}

/// Build the Coordinator/LoopManager pair every mode runs against (§4.5, §4.6).
async fn build_stack(config: &AppConfig) -> Result<(Arc<Coordinator>, Arc<LoopManager>), agentforge::CoreError> {
    let llm_client = Arc::new(
        LLMClient::new(config.llm_provider, &config.llm_model, config.credentials.clone(), config.max_llm_wall_clock)
            .await?,
    );

    let fs = Arc::new(FileSystemTool::new().with_root_path(config.project_path.clone()));
    let bash = Arc::new(BashTool::new(Platform::Linux).with_cwd_restriction(config.project_path.clone()));
    let tool_registry = Arc::new(ToolRegistry::new());
    register_builtin_tools(&tool_registry, fs, bash).await?;

    let project_context = ProjectContext::new(config.default_project_name.clone(), config.project_path.clone());

    let coordinator = Arc::new(Coordinator::new(
        llm_client,
        tool_registry,
        project_context,
        CoordinatorConfig {
            inbox_capacity: config.inbox_capacity,
            outbox_capacity: config.inbox_capacity,
            router_capacity: config.router_capacity,
        },
    ));

    let loop_manager = Arc::new(LoopManager::new(
        coordinator.clone(),
        LoopManagerConfig {
            loop_timeout: config.loop_timeout,
            monitor_period: config.monitor_period,
            idle_threshold: config.idle_threshold,
            idle_ticks_required: config.idle_ticks_required,
        },
    ));

    Ok((coordinator, loop_manager))
}

async fn run_cli(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let (coordinator, loop_manager) = build_stack(&config).await?;
    let (session, mut outbound_rx) = StreamingSession::open(None, coordinator.clone(), loop_manager.clone(), 256).await;

    let printer = tokio::spawn(async move {
        let stdout = io::stdout();
        while let Some(frame) = outbound_rx.recv().await {
            let mut handle = stdout.lock();
            let _ = writeln!(handle, "{}", serde_json::to_string(&frame).unwrap_or_default());
        }
    });

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        // Empty lines are forwarded as-is: the session layer itself rejects
        // an empty message with an `error{kind:invalid_arguments}` frame
        // rather than silently dropping it (§8 boundary behavior).
        let _ = session
            .handle_client_input(ClientInput { message: line, session_id: None, project_id: None, timestamp: None })
            .await;
    }

    session.close().await;
    drop(printer);
    Ok(())
}

#[derive(Clone)]
struct ServerState {
    coordinator: Arc<Coordinator>,
    loop_manager: Arc<LoopManager>,
}

#[derive(serde::Deserialize)]
struct WsQuery {
    project_id: Option<String>,
}

async fn healthz() -> &'static str {
    "ok"
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<ServerState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, query.project_id, state))
}

async fn handle_socket(socket: WebSocket, project_id: Option<String>, state: ServerState) {
    let (mut sink, mut stream) = futures_util::StreamExt::split(socket);
    let (session, mut outbound_rx) =
        StreamingSession::open(project_id, state.coordinator.clone(), state.loop_manager.clone(), 256).await;

    let outbound_task = tokio::spawn(async move {
        use futures_util::SinkExt;
        while let Some(frame) = outbound_rx.recv().await {
            let Ok(text) = serde_json::to_string(&frame) else { continue };
            if sink.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = futures_util::StreamExt::next(&mut stream).await {
        let WsMessage::Text(text) = msg else { continue };
        let Ok(input) = serde_json::from_str::<ClientInput>(&text) else { continue };
        // An empty `message` is rejected by the session layer itself with an
        // `error{kind:invalid_arguments}` frame; no loop is created (§8).
        let _ = session.handle_client_input(input).await;
    }

    session.close().await;
    outbound_task.abort();
}

async fn run_server(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let (coordinator, loop_manager) = build_stack(&config).await?;
    let state = ServerState { coordinator, loop_manager };

    let app = AxumRouter::new()
        .route("/healthz", get(healthz))
        .route("/ws", get(ws_upgrade))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.server_port)).await?;
    log::info!("agentforge server listening on port {}", config.server_port);
    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let server_port = match &cli.mode {
        Mode::Server { port } => *port,
        Mode::Cli => None,
    };
    let overrides = cli.overrides(server_port);
    let config = AppConfig::resolve(overrides)?;

    let result = match cli.mode {
        Mode::Cli => run_cli(config).await,
        Mode::Server { .. } => run_server(config).await,
    };

    if let Err(err) = result {
        log::error!("agentforge: startup failure: {}", err);
        std::process::exit(1);
    }
    Ok(())
}
