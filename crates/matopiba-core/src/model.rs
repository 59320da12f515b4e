//! Typed records exchanged between the pipeline, the hot cache, and the
//! read API.
//!
//! Everything the pipeline persists is `Serialize + Deserialize`; the
//! snapshot map is a `BTreeMap` so that equal inputs encode to equal bytes.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::cities::{CityRef, StateCode};

/// Schema version stamped into every run's metadata.
pub const SNAPSHOT_VERSION: &str = "1.0.0";

/// Hours between scheduled runs.
pub const UPDATE_INTERVAL_HOURS: i64 = 6;

/// The four UTC hours at which runs fire.
pub const SCHEDULED_HOURS_UTC: [u32; 4] = [0, 6, 12, 18];

/// One city's hourly forecast columns over the 48-hour horizon.
///
/// Column-oriented so the ETo kernel can operate on whole arrays. All
/// columns share the same length; `check_columns` enforces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlySeries {
    pub timestamps_utc: Vec<DateTime<Utc>>,
    pub temp_c: Vec<f64>,
    pub relative_humidity_pct: Vec<f64>,
    pub wind_speed_10m_ms: Vec<f64>,
    pub shortwave_radiation_wm2: Vec<f64>,
    pub precipitation_mm: Vec<f64>,
    /// Optional per-cell dew point; missing cells fall back to `temp - 5`.
    pub dew_point_c: Vec<Option<f64>>,
    /// The provider's own hourly ETo, kept for validation.
    pub provider_eto_mm_h: Vec<f64>,
}

impl HourlySeries {
    pub fn len(&self) -> usize {
        self.timestamps_utc.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps_utc.is_empty()
    }

    /// Verify that every required column is present and aligned.
    pub fn check_columns(&self) -> crate::ForecastResult<()> {
        let n = self.len();
        if n == 0 {
            return Err(crate::ForecastError::MissingColumns(
                "empty hourly series".to_string(),
            ));
        }
        let columns = [
            ("temp_c", self.temp_c.len()),
            ("relative_humidity_pct", self.relative_humidity_pct.len()),
            ("wind_speed_10m_ms", self.wind_speed_10m_ms.len()),
            ("shortwave_radiation_wm2", self.shortwave_radiation_wm2.len()),
            ("precipitation_mm", self.precipitation_mm.len()),
            ("dew_point_c", self.dew_point_c.len()),
            ("provider_eto_mm_h", self.provider_eto_mm_h.len()),
        ];
        for (name, len) in columns {
            if len != n {
                return Err(crate::ForecastError::MissingColumns(format!(
                    "column {} has {} cells, expected {}",
                    name, len, n
                )));
            }
        }
        Ok(())
    }
}

/// One day of aggregated forecast output for a city.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyForecast {
    pub date: NaiveDate,
    pub t_max_c: f64,
    pub t_min_c: f64,
    pub t_mean_c: f64,
    pub rh_mean_pct: f64,
    pub ws_mean_ms: f64,
    pub radiation_sum_mj_m2: f64,
    pub precipitation_sum_mm: f64,
    pub eto_model_mm_day: f64,
    /// Null on the wire when the provider withheld its hourly ETo.
    #[serde(with = "float_or_null")]
    pub eto_provider_mm_day: f64,
}

/// Snapshot entry for one city, shaped for the read API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityForecast {
    pub city_name: String,
    pub state: StateCode,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation_m: f64,
    pub days: Vec<DailyForecast>,
}

impl CityForecast {
    pub fn new(city: &CityRef, days: Vec<DailyForecast>) -> Self {
        Self {
            city_name: city.name.clone(),
            state: city.state,
            latitude: city.latitude,
            longitude: city.longitude,
            elevation_m: city.elevation_m,
            days,
        }
    }
}

/// Categorical assessment of a run's model-vs-provider agreement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quality {
    #[serde(rename = "EXCELLENT")]
    Excellent,
    #[serde(rename = "ACCEPTABLE")]
    Acceptable,
    #[serde(rename = "BELOW_EXPECTED")]
    BelowExpected,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Excellent => "EXCELLENT",
            Self::Acceptable => "ACCEPTABLE",
            Self::BelowExpected => "BELOW_EXPECTED",
        }
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Global agreement metrics between computed and provider ETo.
///
/// Metric fields are `None` when no finite (model, provider) pair existed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationMetrics {
    pub r2: Option<f64>,
    pub rmse_mm_day: Option<f64>,
    pub bias_mm_day: Option<f64>,
    pub mae_mm_day: Option<f64>,
    pub n_samples: usize,
    pub quality: Quality,
}

impl ValidationMetrics {
    /// Metrics for a run with no usable samples.
    pub fn empty() -> Self {
        Self {
            r2: None,
            rmse_mm_day: None,
            bias_mm_day: None,
            mae_mm_day: None,
            n_samples: 0,
            quality: Quality::BelowExpected,
        }
    }
}

/// Per-run bookkeeping published alongside the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_label: String,
    pub updated_at_utc: DateTime<Utc>,
    pub next_update_utc: DateTime<Utc>,
    pub n_cities_attempted: usize,
    pub n_cities_succeeded: usize,
    /// Fraction of attempted cities that produced output, 0..=1.
    pub success_rate: f64,
    pub version: String,
}

impl RunMetadata {
    pub fn new(fired_at: DateTime<Utc>, n_attempted: usize, n_succeeded: usize) -> Self {
        let success_rate = if n_attempted > 0 {
            n_succeeded as f64 / n_attempted as f64
        } else {
            0.0
        };
        Self {
            run_label: run_label(fired_at.hour()),
            updated_at_utc: fired_at,
            next_update_utc: fired_at + Duration::hours(UPDATE_INTERVAL_HOURS),
            n_cities_attempted: n_attempted,
            n_cities_succeeded: n_succeeded,
            success_rate,
            version: SNAPSHOT_VERSION.to_string(),
        }
    }
}

/// The complete output of one run, published atomically to the hot cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub forecasts: BTreeMap<String, CityForecast>,
    pub validation: ValidationMetrics,
    pub metadata: RunMetadata,
}

/// One city that dropped out of a run, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityFailure {
    pub city_code: String,
    pub error_kind: String,
}

/// Structured result of one pipeline run, emitted to logs and the audit row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub success: bool,
    pub run_label: String,
    pub duration_s: f64,
    pub n_cities_attempted: usize,
    pub n_cities_succeeded: usize,
    pub quality: Quality,
    pub failures: Vec<CityFailure>,
}

/// Human-readable label for a run fired at the given UTC hour.
pub fn run_label(hour_utc: u32) -> String {
    if SCHEDULED_HOURS_UTC.contains(&hour_utc) {
        format!("{:02}h UTC", hour_utc)
    } else {
        format!("off-schedule {:02}h UTC", hour_utc)
    }
}

/// The next scheduled run instant strictly after `after`.
pub fn next_run_after(after: DateTime<Utc>) -> DateTime<Utc> {
    for day_offset in 0..=1i64 {
        let date = after.date_naive() + Duration::days(day_offset);
        for &hour in &SCHEDULED_HOURS_UTC {
            if let Some(naive) = date.and_hms_opt(hour, 0, 0) {
                let candidate = DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc);
                if candidate > after {
                    return candidate;
                }
            }
        }
    }
    after + Duration::hours(UPDATE_INTERVAL_HOURS)
}

/// Serialize non-finite floats as JSON null instead of failing.
mod float_or_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }
}
