//! Five-phase forecast update pipeline.
//!
//! Phase order per run: fetch, compute, validate, persist hot, persist
//! audit. Partial failures in the first two phases are tolerated and
//! reported per city; validation never halts the run; only a hot-cache
//! write failure aborts, because without the cache readers cannot be
//! served. The audit write is best effort.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Timelike, Utc};
use tracing::{error, info, warn};

use matopiba_core::eto::{aggregate_daily, compute_hourly_eto};
use matopiba_core::model::{run_label, CityFailure, CityForecast, RunMetadata, RunReport, Snapshot};
use matopiba_core::validation::validate;
use matopiba_core::{
    CityRef, CityRegistry, DailyForecast, ForecastError, ForecastResult, HourlySeries, Quality,
};
use storage::{AuditLog, RunRecord, SnapshotCache};

use crate::openmeteo::{ForecastClient, FetchOutcome, FORECAST_DAYS};

/// Delay before the single hot-cache write retry.
const CACHE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Soft per-phase budgets; exceeding one logs a warning, never cancels.
const FETCH_BUDGET: Duration = Duration::from_secs(60);
const COMPUTE_BUDGET: Duration = Duration::from_secs(15);
const PERSIST_BUDGET: Duration = Duration::from_secs(5);

/// The scheduled orchestration pipeline and its collaborators.
pub struct ForecastPipeline {
    registry: Arc<CityRegistry>,
    client: ForecastClient,
    cache: SnapshotCache,
    audit: Option<AuditLog>,
    run_in_progress: Arc<AtomicBool>,
}

impl ForecastPipeline {
    pub fn new(
        registry: Arc<CityRegistry>,
        client: ForecastClient,
        cache: SnapshotCache,
        audit: Option<AuditLog>,
    ) -> Self {
        Self {
            registry,
            client,
            cache,
            audit,
            run_in_progress: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Execute one run. A fire that arrives while another run holds the
    /// guard is discarded with `RunAlreadyInProgress`.
    pub async fn run(&mut self, fired_at: DateTime<Utc>) -> ForecastResult<RunReport> {
        if self.run_in_progress.swap(true, Ordering::SeqCst) {
            return Err(ForecastError::RunAlreadyInProgress);
        }
        // The guard must release even when the run future is cancelled by
        // the whole-task deadline.
        let _guard = RunGuard(Arc::clone(&self.run_in_progress));
        self.run_inner(fired_at).await
    }

    async fn run_inner(&mut self, fired_at: DateTime<Utc>) -> ForecastResult<RunReport> {
        let started = Instant::now();
        let label = run_label(fired_at.hour());
        info!(run_label = %label, "Starting forecast update run");

        // Phase 1: fetch.
        let phase = Instant::now();
        let FetchOutcome { series, mut failures } = self.client.fetch_all(&self.registry).await;
        warn_if_over(phase, FETCH_BUDGET, "fetch");
        if series.is_empty() {
            error!(run_label = %label, "No forecasts obtained from provider");
            return Err(ForecastError::TransientNetwork(
                "provider returned no usable forecasts".to_string(),
            ));
        }
        info!(
            fetched = series.len(),
            failed = failures.len(),
            "Fetch phase complete"
        );

        // Phase 2: compute ETo per city.
        let phase = Instant::now();
        let mut forecasts: BTreeMap<String, CityForecast> = BTreeMap::new();
        let mut model_eto = Vec::new();
        let mut provider_eto = Vec::new();
        for (code, city_series) in &series {
            let Some(city) = self.registry.get(code) else {
                warn!(city = %code, "Fetched city missing from registry, dropping");
                continue;
            };
            match compute_city(city, city_series) {
                Ok(days) => {
                    for day in &days {
                        model_eto.push(day.eto_model_mm_day);
                        provider_eto.push(day.eto_provider_mm_day);
                    }
                    forecasts.insert(code.clone(), CityForecast::new(city, days));
                }
                Err(e) => {
                    warn!(city = %code, error = %e, "ETo computation failed");
                    failures.push(CityFailure {
                        city_code: code.clone(),
                        error_kind: e.kind().to_string(),
                    });
                }
            }
        }
        warn_if_over(phase, COMPUTE_BUDGET, "compute");
        info!(computed = forecasts.len(), "Compute phase complete");

        // Phase 3: validate. Diagnostic only; a degraded label never blocks
        // the snapshot write.
        let validation = validate(&model_eto, &provider_eto);
        match validation.quality {
            Quality::Excellent => info!(
                r2 = ?validation.r2,
                rmse = ?validation.rmse_mm_day,
                n_samples = validation.n_samples,
                "Validation: model agrees with provider"
            ),
            _ => warn!(
                r2 = ?validation.r2,
                rmse = ?validation.rmse_mm_day,
                bias = ?validation.bias_mm_day,
                n_samples = validation.n_samples,
                quality = %validation.quality,
                "Validation: model-provider agreement degraded"
            ),
        }

        // Phase 4: persist hot. One retry, then abort the run.
        let n_succeeded = forecasts.len();
        let metadata = RunMetadata::new(fired_at, self.registry.len(), n_succeeded);
        let snapshot = Snapshot {
            forecasts,
            validation: validation.clone(),
            metadata: metadata.clone(),
        };
        let phase = Instant::now();
        if let Err(first) = self.cache.put_snapshot(&snapshot).await {
            warn!(error = %first, "Hot cache write failed, retrying once");
            tokio::time::sleep(CACHE_RETRY_DELAY).await;
            self.cache.put_snapshot(&snapshot).await?;
        }
        warn_if_over(phase, PERSIST_BUDGET, "persist-hot");
        info!(
            cities = n_succeeded,
            ttl_secs = storage::SNAPSHOT_TTL_SECS,
            "Snapshot published to hot cache"
        );

        let report = RunReport {
            success: true,
            run_label: label.clone(),
            duration_s: started.elapsed().as_secs_f64(),
            n_cities_attempted: self.registry.len(),
            n_cities_succeeded: n_succeeded,
            quality: validation.quality,
            failures,
        };

        // Phase 5: persist audit. Logged and swallowed on failure.
        let phase = Instant::now();
        match &self.audit {
            Some(audit) => {
                let record = RunRecord::from_run(&metadata, &snapshot.validation, &report);
                match audit.record_run(&record).await {
                    Ok(()) => info!(updated_at = %metadata.updated_at_utc, "Audit row recorded"),
                    Err(e) => warn!(error = %e, "Audit log write failed"),
                }
            }
            None => warn!("DB_URL not configured, skipping audit row"),
        }
        warn_if_over(phase, PERSIST_BUDGET, "persist-audit");

        info!(
            run_label = %label,
            duration_s = format!("{:.1}", report.duration_s),
            succeeded = report.n_cities_succeeded,
            attempted = report.n_cities_attempted,
            success_rate = format!("{:.3}", metadata.success_rate),
            quality = %report.quality,
            "Forecast update run complete"
        );
        Ok(report)
    }
}

struct RunGuard(Arc<AtomicBool>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Compute the two-day forecast for one city from its hourly series.
fn compute_city(city: &CityRef, series: &HourlySeries) -> ForecastResult<Vec<DailyForecast>> {
    let eto = compute_hourly_eto(series, city.latitude, city.longitude, city.elevation_m)?;
    if eto.non_finite_substituted > 0 {
        warn!(
            city = %city.code,
            cells = eto.non_finite_substituted,
            "Non-finite ETo cells substituted with zero"
        );
    }
    let days = aggregate_daily(series, &eto.eto_mm_h);
    if days.len() != FORECAST_DAYS as usize {
        return Err(ForecastError::InsufficientHours {
            got: series.len(),
            need: FORECAST_DAYS as usize * 24,
        });
    }
    Ok(days)
}

fn warn_if_over(phase_start: Instant, budget: Duration, phase: &str) {
    let elapsed = phase_start.elapsed();
    if elapsed > budget {
        warn!(
            phase,
            elapsed_s = format!("{:.1}", elapsed.as_secs_f64()),
            budget_s = budget.as_secs(),
            "Phase exceeded its soft budget"
        );
    }
}
