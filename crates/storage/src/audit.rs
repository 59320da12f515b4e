//! Historical run audit log backed by PostgreSQL.
//!
//! One row per run, keyed by the run's `updated_at` timestamp. Writes are
//! idempotent upserts so task retries never produce duplicate rows. The
//! audit log is best effort: the pipeline logs and swallows failures here,
//! because the hot cache write is what read availability depends on.

use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::debug;

use matopiba_core::model::{RunMetadata, RunReport, ValidationMetrics};
use matopiba_core::{ForecastError, ForecastResult};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS matopiba_runs (
    id SERIAL PRIMARY KEY,
    run_label VARCHAR(50) NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL UNIQUE,
    n_cities INTEGER NOT NULL,
    r2 DOUBLE PRECISION,
    rmse DOUBLE PRECISION,
    bias DOUBLE PRECISION,
    mae DOUBLE PRECISION,
    success_rate DOUBLE PRECISION,
    quality VARCHAR(20),
    metadata_json JSONB,
    created_at TIMESTAMPTZ DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_matopiba_runs_updated_at ON matopiba_runs (updated_at DESC);
CREATE INDEX IF NOT EXISTS idx_matopiba_runs_quality ON matopiba_runs (quality);
CREATE INDEX IF NOT EXISTS idx_matopiba_runs_run_label ON matopiba_runs (run_label)
"#;

/// One run's metrics, ready to upsert.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub run_label: String,
    pub updated_at: DateTime<Utc>,
    pub n_cities: i32,
    pub r2: Option<f64>,
    pub rmse: Option<f64>,
    pub bias: Option<f64>,
    pub mae: Option<f64>,
    pub success_rate: f64,
    pub quality: String,
    pub metadata_json: serde_json::Value,
}

impl RunRecord {
    /// Assemble the audit row for a completed run. The structured run
    /// report lands in `metadata_json` for post-hoc analysis.
    pub fn from_run(
        metadata: &RunMetadata,
        validation: &ValidationMetrics,
        report: &RunReport,
    ) -> Self {
        Self {
            run_label: metadata.run_label.clone(),
            updated_at: metadata.updated_at_utc,
            n_cities: metadata.n_cities_succeeded as i32,
            r2: validation.r2,
            rmse: validation.rmse_mm_day,
            bias: validation.bias_mm_day,
            mae: validation.mae_mm_day,
            success_rate: metadata.success_rate,
            quality: validation.quality.as_str().to_string(),
            metadata_json: serde_json::to_value(report).unwrap_or(serde_json::Value::Null),
        }
    }
}

/// Row returned by latest-runs queries.
#[derive(Debug, Clone)]
pub struct AuditRow {
    pub run_label: String,
    pub updated_at: DateTime<Utc>,
    pub n_cities: i32,
    pub r2: Option<f64>,
    pub rmse: Option<f64>,
    pub success_rate: Option<f64>,
    pub quality: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Database connection pool and audit operations.
pub struct AuditLog {
    pool: PgPool,
}

impl AuditLog {
    /// Create a new audit log connection from the database URL.
    pub async fn connect(db_url: &str) -> ForecastResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
            .map_err(|e| ForecastError::AuditWriteFailed(format!("connection failed: {}", e)))?;

        Ok(Self { pool })
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> ForecastResult<()> {
        for statement in SCHEMA_SQL.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| {
                        ForecastError::AuditWriteFailed(format!("migration failed: {}", e))
                    })?;
            }
        }
        Ok(())
    }

    /// Upsert one run keyed by its `updated_at` timestamp.
    ///
    /// A retried run replaces its earlier metric columns in place; no
    /// duplicate rows are ever produced for one instant.
    pub async fn record_run(&self, record: &RunRecord) -> ForecastResult<()> {
        sqlx::query(
            r#"
            INSERT INTO matopiba_runs (
                run_label, updated_at, n_cities, r2, rmse, bias, mae,
                success_rate, quality, metadata_json
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10::jsonb)
            ON CONFLICT (updated_at) DO UPDATE SET
                run_label = EXCLUDED.run_label,
                n_cities = EXCLUDED.n_cities,
                r2 = EXCLUDED.r2,
                rmse = EXCLUDED.rmse,
                bias = EXCLUDED.bias,
                mae = EXCLUDED.mae,
                success_rate = EXCLUDED.success_rate,
                quality = EXCLUDED.quality,
                metadata_json = EXCLUDED.metadata_json
            "#,
        )
        .bind(&record.run_label)
        .bind(record.updated_at)
        .bind(record.n_cities)
        .bind(record.r2)
        .bind(record.rmse)
        .bind(record.bias)
        .bind(record.mae)
        .bind(record.success_rate)
        .bind(&record.quality)
        .bind(record.metadata_json.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| ForecastError::AuditWriteFailed(format!("upsert failed: {}", e)))?;

        debug!(run_label = %record.run_label, updated_at = %record.updated_at, "Audit row recorded");
        Ok(())
    }

    /// Latest runs, newest first.
    pub async fn recent_runs(&self, limit: i64) -> ForecastResult<Vec<AuditRow>> {
        let rows: Vec<(
            String,
            DateTime<Utc>,
            i32,
            Option<f64>,
            Option<f64>,
            Option<f64>,
            Option<String>,
            DateTime<Utc>,
        )> = sqlx::query_as(
            r#"
            SELECT run_label, updated_at, n_cities, r2, rmse, success_rate, quality, created_at
            FROM matopiba_runs
            ORDER BY updated_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ForecastError::AuditWriteFailed(format!("query failed: {}", e)))?;

        Ok(rows
            .into_iter()
            .map(|row| AuditRow {
                run_label: row.0,
                updated_at: row.1,
                n_cities: row.2,
                r2: row.3,
                rmse: row.4,
                success_rate: row.5,
                quality: row.6,
                created_at: row.7,
            })
            .collect())
    }
}
