//! MATOPIBA forecast read API.
//!
//! Serves the latest snapshot from the Redis hot cache:
//! - GET /api/v1/matopiba/forecasts - full snapshot or 503
//! - GET /api/v1/matopiba/metadata  - run metadata or 503
//! - GET /api/v1/matopiba/health    - liveness
//!
//! Reads never trigger an upstream fetch; the binary has no dependency on
//! the forecast provider at all.

mod handlers;
mod state;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use storage::SnapshotCache;

use state::AppState;

#[derive(Parser, Debug)]
#[command(name = "matopiba-api")]
#[command(about = "Read API for MATOPIBA forecast snapshots")]
struct Args {
    /// Redis connection string for the hot cache
    #[arg(long, env = "KV_URL", default_value = "redis://localhost:6379")]
    kv_url: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value = "8090")]
    port: u16,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting MATOPIBA read API");

    let cache = SnapshotCache::connect(&args.kv_url)
        .await
        .context("hot cache unreachable")?;
    info!("Hot cache connected");

    let state = Arc::new(AppState::new(cache));
    let app = handlers::create_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], args.port));
    info!(port = args.port, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
