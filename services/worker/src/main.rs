//! MATOPIBA forecast worker.
//!
//! Four times a day this daemon:
//! 1. Fetches hourly forecasts for the 337 MATOPIBA municipalities
//! 2. Computes FAO-56 Penman-Monteith reference evapotranspiration
//! 3. Validates the model against the provider's own ETo
//! 4. Publishes the snapshot to the Redis hot cache (TTL 6h)
//! 5. Records the run in the PostgreSQL audit log
//!
//! Usage:
//!   matopiba-worker                    # scheduled operation
//!   matopiba-worker --once             # single run, then exit
//!   matopiba-worker --city 1721000     # inspect one city, no persistence
//!
//! Environment:
//!   KV_URL            - Redis connection string (hot cache)
//!   DB_URL            - PostgreSQL connection string (optional audit log)
//!   PROVIDER_BASE_URL - forecast provider endpoint
//!   SCHEDULE_CRON     - run schedule override (default: 0 0,6,12,18 * * *)

mod openmeteo;
mod pipeline;
mod schedule;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use matopiba_core::eto::{aggregate_daily, compute_hourly_eto};
use matopiba_core::{CityRegistry, ForecastError};
use storage::{AuditLog, SnapshotCache};

use openmeteo::ForecastClient;
use pipeline::ForecastPipeline;
use schedule::Schedule;

/// Task-level retry policy: a run aborted by a total upstream outage or a
/// hot-cache write failure is re-attempted after five minutes.
const TASK_MAX_ATTEMPTS: u32 = 3;
const TASK_RETRY_DELAY: Duration = Duration::from_secs(300);

/// Whole-task deadline; a run still going after this is aborted.
const TASK_DEADLINE: Duration = Duration::from_secs(600);

#[derive(Parser, Debug)]
#[command(name = "matopiba-worker")]
#[command(about = "Scheduled MATOPIBA ETo forecast pipeline")]
struct Args {
    /// Run a single pipeline pass and exit (vs scheduled operation)
    #[arg(long)]
    once: bool,

    /// Fetch and print one city's forecast, skipping persistence
    #[arg(long, value_name = "CITY_CODE")]
    city: Option<String>,

    /// Redis connection string for the hot cache
    #[arg(long, env = "KV_URL", default_value = "redis://localhost:6379")]
    kv_url: String,

    /// PostgreSQL connection string for the audit log (omit to skip audit)
    #[arg(long, env = "DB_URL")]
    db_url: Option<String>,

    /// Forecast provider endpoint
    #[arg(
        long,
        env = "PROVIDER_BASE_URL",
        default_value = "https://api.open-meteo.com/v1/forecast"
    )]
    provider_base_url: String,

    /// Run schedule as a cron expression (minute and hour fields)
    #[arg(long, env = "SCHEDULE_CRON", default_value = "0 0,6,12,18 * * *")]
    schedule_cron: String,

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

    info!("Starting MATOPIBA forecast worker");

    // Static city table; an invalid table fails startup.
    let registry = Arc::new(CityRegistry::load_bundled().context("city registry invalid")?);
    info!(cities = registry.len(), "City registry loaded");

    let client = ForecastClient::new(&args.provider_base_url)?;

    // Single-city inspection mode touches neither the cache nor the audit log.
    if let Some(code) = &args.city {
        let city = registry
            .get(code)
            .with_context(|| format!("unknown city code {}", code))?;
        info!(city = %city.name, state = %city.state, "Fetching single-city forecast");

        let series = client.fetch_city(city).await?;
        let eto = compute_hourly_eto(&series, city.latitude, city.longitude, city.elevation_m)?;
        let days = aggregate_daily(&series, &eto.eto_mm_h);
        println!("{}", serde_json::to_string_pretty(&days)?);
        return Ok(());
    }

    let schedule = Schedule::parse(&args.schedule_cron).context("invalid SCHEDULE_CRON")?;

    let cache = SnapshotCache::connect(&args.kv_url)
        .await
        .context("hot cache unreachable")?;
    info!("Hot cache connected");

    let audit = match &args.db_url {
        Some(url) => {
            let log = AuditLog::connect(url).await.context("audit log unreachable")?;
            log.migrate().await.context("audit log migration failed")?;
            match log.recent_runs(3).await {
                Ok(rows) if rows.is_empty() => info!("Audit log empty, first run pending"),
                Ok(rows) => {
                    for row in rows {
                        info!(
                            run_label = %row.run_label,
                            updated_at = %row.updated_at,
                            n_cities = row.n_cities,
                            quality = row.quality.as_deref().unwrap_or("-"),
                            "Previous run"
                        );
                    }
                }
                Err(e) => warn!(error = %e, "Could not read recent audit rows"),
            }
            Some(log)
        }
        None => {
            warn!("DB_URL not set, audit history disabled");
            None
        }
    };

    let mut pipeline = ForecastPipeline::new(registry, client, cache, audit);

    if args.once {
        info!("Running single forecast update");
        let report = pipeline.run(Utc::now()).await?;
        info!(
            report = %serde_json::to_string(&report).unwrap_or_default(),
            "Single run complete"
        );
        return Ok(());
    }

    // Shutdown signal
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        shutdown_tx_clone.send(()).ok();
    });

    run_scheduler(&mut pipeline, &schedule, shutdown_tx.subscribe()).await;

    info!("Worker stopped");
    Ok(())
}

/// Fire the pipeline at each scheduled instant until shutdown.
async fn run_scheduler(
    pipeline: &mut ForecastPipeline,
    schedule: &Schedule,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let now = Utc::now();
        let fire_at = schedule.next_fire(now);
        let wait = (fire_at - now).to_std().unwrap_or(Duration::ZERO);
        info!(fire_at = %fire_at, "Next forecast run scheduled");

        tokio::select! {
            _ = shutdown.recv() => {
                info!("Shutting down scheduler");
                break;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        run_with_task_retries(pipeline, fire_at).await;
    }
}

/// Execute one scheduled run with the task-level retry policy.
async fn run_with_task_retries(pipeline: &mut ForecastPipeline, fired_at: chrono::DateTime<Utc>) {
    for attempt in 1..=TASK_MAX_ATTEMPTS {
        let outcome = match tokio::time::timeout(TASK_DEADLINE, pipeline.run(fired_at)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(
                    deadline_secs = TASK_DEADLINE.as_secs(),
                    attempt,
                    "Run exceeded the whole-task deadline, aborted"
                );
                return;
            }
        };
        match outcome {
            Ok(report) => {
                info!(
                    run_label = %report.run_label,
                    succeeded = report.n_cities_succeeded,
                    quality = %report.quality,
                    attempt,
                    "Run succeeded"
                );
                return;
            }
            Err(ForecastError::RunAlreadyInProgress) => {
                warn!("Fire discarded, a run is already in progress");
                return;
            }
            Err(e) if e.is_task_retryable() && attempt < TASK_MAX_ATTEMPTS => {
                warn!(
                    error = %e,
                    attempt,
                    max_attempts = TASK_MAX_ATTEMPTS,
                    delay_secs = TASK_RETRY_DELAY.as_secs(),
                    "Run failed, retrying"
                );
                tokio::time::sleep(TASK_RETRY_DELAY).await;
            }
            Err(e) => {
                error!(error = %e, attempt, "Run failed permanently");
                return;
            }
        }
    }
}
