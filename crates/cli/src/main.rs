//! The baton server binary.
//!
//! Wires the core together: registry (with hot reload), store, agent-runner
//! client, event broker, pipeline runner, lifecycle recovery, and the HTTP
//! surface. Shutdown is graceful: in-flight pipelines are cancelled in a
//! resumable state and picked up again on the next start.

mod github;
mod routes;
mod runner_client;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use baton_core::client::AgentClient;
use baton_core::registry::watcher;
use baton_core::{
    ApprovalCoordinator, EventBroker, LifecycleManager, PipelineRunner, PipelineService, Registry,
    Settings, Store,
};

use crate::routes::AppState;
use crate::runner_client::HttpAgentClient;

#[derive(Parser, Debug)]
#[command(name = "baton", about = "Multi-agent pipeline orchestrator")]
struct Args {
    /// Configuration directory (agents.yaml, templates.yaml, config.toml).
    #[arg(long, default_value = ".baton", env = "BATON_CONFIG_DIR")]
    config_dir: PathBuf,

    /// SQLite database path.
    #[arg(long, default_value = "baton.db", env = "BATON_DB_PATH")]
    db_path: PathBuf,

    /// Address to serve the API on.
    #[arg(long, default_value = "127.0.0.1:8787", env = "BATON_LISTEN")]
    listen: SocketAddr,

    /// Base URL of the external agent runner.
    #[arg(long, default_value = "http://127.0.0.1:8899", env = "BATON_RUNNER_URL")]
    runner_url: String,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let settings = Settings::load(&args.config_dir)?;

    // A broken catalogue at startup is fatal; later edits hot-reload with
    // the prior snapshot kept on validation failure.
    let registry = Arc::new(Registry::load(&args.config_dir)?);
    let _watcher = watcher::watch(Arc::clone(&registry))?;

    let store = Arc::new(Store::open(&args.db_path)?);
    let client: Arc<dyn AgentClient> = Arc::new(HttpAgentClient::new(&args.runner_url));

    let broker = Arc::new(EventBroker::new(
        Arc::clone(&client),
        settings.subscriber_inbox_capacity,
        settings.reconnect_delay(),
    ));
    broker.start();

    let approvals = Arc::new(ApprovalCoordinator::new());
    let runner = Arc::new(PipelineRunner::new(
        Arc::clone(&store),
        Arc::clone(&registry),
        Arc::clone(&client),
        Arc::clone(&approvals),
        Arc::clone(&broker),
        settings.step_timeout(),
    ));
    let lifecycle = Arc::new(LifecycleManager::new(Arc::clone(&store), runner));

    let recovered = lifecycle.recover().await?;
    if recovered > 0 {
        info!(recovered, "re-dispatched interrupted pipelines");
    }

    let service = Arc::new(PipelineService::new(
        Arc::clone(&store),
        Arc::clone(&registry),
        approvals,
        Arc::clone(&lifecycle),
    ));

    let app = routes::router(AppState {
        service,
        registry,
        broker: Arc::clone(&broker),
        heartbeat: settings.heartbeat_interval(),
    });

    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    info!(listen = %args.listen, runner = %args.runner_url, "baton serving");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    broker.stop().await;
    lifecycle.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    // Ignore the error: if the signal handler cannot install, the process
    // simply runs until killed.
    let _ = tokio::signal::ctrl_c().await;
}
