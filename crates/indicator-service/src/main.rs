//! Indicator Service - sensor ingest, history, export and HTTP API.
//!
//! Run with: `cargo run -p indicator-service`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use indicator_service::{AppState, Config, api, spawn_workers};
use indicator_store::SqliteBlobStore;

/// Indicator Service - sensor ingest, history, export and HTTP API.
#[derive(Parser, Debug)]
#[command(name = "indicator-service")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long)]
    bind: Option<String>,

    /// Database path (overrides config).
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Sensor link device (overrides config).
    #[arg(long, conflicts_with = "tcp")]
    device: Option<PathBuf>,

    /// Sensor link TCP bridge as host:port (overrides config).
    #[arg(long)]
    tcp: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("indicator_service=info".parse()?)
                .add_directive("indicator_core=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default().unwrap_or_default(),
    };

    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(db_path) = args.database {
        config.storage.path = db_path;
    }
    if let Some(device) = args.device {
        config.transport.device = Some(device);
        config.transport.tcp = None;
    }
    if let Some(tcp) = args.tcp {
        config.transport.tcp = Some(tcp);
        config.transport.device = None;
    }
    config.validate()?;

    info!("Opening database at {:?}", config.storage.path);
    let store = SqliteBlobStore::open(&config.storage.path)?;

    let addr: SocketAddr = config.server.bind.parse()?;
    let state = AppState::new(Arc::new(store), config);
    let workers = spawn_workers(&state);

    let app = Router::new()
        .merge(api::router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(Arc::clone(&state));

    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let shutdown = state.shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down");
            shutdown.cancel();
        })
        .await?;

    state.shutdown.cancel();
    workers.wait().await;

    if let Err(e) = state.persist_history().await {
        error!("Failed to persist history on shutdown: {}", e);
    }
    info!("Stopped");
    Ok(())
}
