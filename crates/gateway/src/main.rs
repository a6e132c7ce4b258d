mod agent;
mod cancel;
mod connection;
mod context;
mod protocol;
mod router;
mod state;

use std::sync::Arc;

use anyhow::Context;
use axum::routing::get;
use axum::Router;
use clap::{Parser, Subcommand};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use agentcore_domain::config::Config;
use agentcore_store::{EventStore, ProCreditLedger};
use agentcore_workspace::WorkspaceAllocator;

use connection::ConnectionRegistry;
use state::AppState;

#[derive(Debug, Parser)]
#[command(name = "agentcore-gateway", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Port the WebSocket gateway listens on. Overrides `ServerConfig::port`.
    #[arg(long, global = true)]
    port: Option<u16>,
    /// SQLite file backing the event store and the Pro credit ledger.
    /// Overrides `ServerConfig::db_path`.
    #[arg(long, global = true)]
    db_path: Option<String>,
    /// Root directory under which per-connection workspaces are
    /// allocated. Overrides `WorkspaceConfig::root`.
    #[arg(long, global = true)]
    workspace_root: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the WebSocket gateway (default when no subcommand is given).
    Serve,
    /// Print the resolved configuration and exit without binding a port.
    Config,
    /// Print the crate version and exit.
    Version,
}

impl Cli {
    fn resolve_config(&self) -> Config {
        let mut config = Config::default();
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(db_path) = &self.db_path {
            config.server.db_path = db_path.clone();
        }
        if let Some(workspace_root) = &self.workspace_root {
            config.workspace.root = workspace_root.clone();
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.resolve_config();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            run_server(Arc::new(config)).await
        }
        Some(Command::Config) => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Some(Command::Version) => {
            println!("agentcore-gateway {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,agentcore_gateway=debug")),
        )
        .json()
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("agentcore gateway starting");

    // ── Persistence ──────────────────────────────────────────────────
    let pool = agentcore_store::connect(&config.server.db_path)
        .await
        .context("connecting to event store database")?;
    let event_store = Arc::new(EventStore::new(pool.clone()));
    let ledger = Arc::new(ProCreditLedger::new(pool, config.pro_ledger.clone()));
    tracing::info!(db_path = %config.server.db_path, "event store and pro credit ledger ready");

    // ── Workspace allocator ──────────────────────────────────────────
    let workspace = Arc::new(WorkspaceAllocator::new(&config.workspace));
    tracing::info!(root = %workspace.root().display(), "workspace allocator ready");

    // ── LLM provider chain ───────────────────────────────────────────
    let provider = Arc::new(
        agentcore_providers::registry::build_chain(&config.llm)
            .context("building LLM provider chain")?,
    );
    tracing::info!(models = ?config.llm.model_chain, "provider chain ready");

    // ── Connection manager ───────────────────────────────────────────
    let connections = Arc::new(ConnectionRegistry::new(config.connection.clone()));

    let state = AppState {
        config: config.clone(),
        event_store,
        ledger,
        workspace,
        provider,
        connections: connections.clone(),
    };

    let cleanup_interval = std::time::Duration::from_secs(config.connection.cleanup_interval_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cleanup_interval);
        loop {
            ticker.tick().await;
            connections.run_periodic_cleanup();
        }
    });

    let app = Router::new()
        .route("/ws", get(connection::ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .await
        .context("serving gateway")?;
    Ok(())
}
