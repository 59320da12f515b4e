//! Shared test fixtures for the MATOPIBA forecast workspace.
//!
//! Provides deterministic synthetic hourly data with a realistic tropical
//! diurnal cycle, plus prebuilt snapshot fixtures for the storage and API
//! test suites.

use std::collections::BTreeMap;
use std::f64::consts::PI;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::America::Sao_Paulo;

use matopiba_core::model::{
    CityForecast, DailyForecast, HourlySeries, Quality, RunMetadata, Snapshot, ValidationMetrics,
};
use matopiba_core::{CityRef, StateCode};

/// Fixed local date the synthetic series starts on (a Sao Paulo midnight).
pub const SERIES_START: (i32, u32, u32) = (2025, 10, 9);

/// A fixed reference municipality for kernel and pipeline tests.
pub fn synthetic_city() -> CityRef {
    CityRef {
        code: "1721000".to_string(),
        name: "Palmas".to_string(),
        state: StateCode::To,
        latitude: -10.24,
        longitude: -48.35,
        elevation_m: 230.0,
    }
}

/// Synthetic hourly series with a tropical dry-season diurnal cycle.
///
/// Hour 0 is local midnight in America/Sao_Paulo; timestamps are stored in
/// UTC, matching what the forecast client produces. Values are deterministic
/// so tests can assert exact expectations.
pub fn synthetic_hourly_series(hours: usize) -> HourlySeries {
    let (y, m, d) = SERIES_START;
    let start = Sao_Paulo
        .with_ymd_and_hms(y, m, d, 0, 0, 0)
        .single()
        .expect("fixed fixture date is unambiguous")
        .with_timezone(&Utc);

    let mut timestamps_utc = Vec::with_capacity(hours);
    let mut temp_c = Vec::with_capacity(hours);
    let mut relative_humidity_pct = Vec::with_capacity(hours);
    let mut wind_speed_10m_ms = Vec::with_capacity(hours);
    let mut shortwave_radiation_wm2 = Vec::with_capacity(hours);
    let mut precipitation_mm = Vec::with_capacity(hours);
    let mut dew_point_c = Vec::with_capacity(hours);
    let mut provider_eto_mm_h = Vec::with_capacity(hours);

    for h in 0..hours {
        let local_hour = (h % 24) as f64;
        // Solar elevation proxy: zero outside 06:00-18:00 local.
        let solar = if (6.0..18.0).contains(&local_hour) {
            (PI * (local_hour - 6.0) / 12.0).sin().max(0.0)
        } else {
            0.0
        };

        timestamps_utc.push(start + Duration::hours(h as i64));
        temp_c.push(24.0 + 8.0 * solar);
        relative_humidity_pct.push(78.0 - 34.0 * solar);
        wind_speed_10m_ms.push(1.5 + 1.2 * solar);
        shortwave_radiation_wm2.push(850.0 * solar);
        precipitation_mm.push(0.0);
        dew_point_c.push(Some(18.0 + 1.5 * solar));
        provider_eto_mm_h.push(0.01 + 0.55 * solar);
    }

    HourlySeries {
        timestamps_utc,
        temp_c,
        relative_humidity_pct,
        wind_speed_10m_ms,
        shortwave_radiation_wm2,
        precipitation_mm,
        dew_point_c,
        provider_eto_mm_h,
    }
}

/// A fixed two-day forecast for one city.
pub fn synthetic_daily_forecasts() -> Vec<DailyForecast> {
    let first = NaiveDate::from_ymd_opt(SERIES_START.0, SERIES_START.1, SERIES_START.2)
        .expect("fixture date is valid");
    (0..2i64)
        .map(|i| DailyForecast {
            date: first + Duration::days(i),
            t_max_c: 33.5 - i as f64,
            t_min_c: 22.0,
            t_mean_c: 27.2,
            rh_mean_pct: 58.0,
            ws_mean_ms: 2.3,
            radiation_sum_mj_m2: 21.7,
            precipitation_sum_mm: 0.0,
            eto_model_mm_day: 5.1 + 0.2 * i as f64,
            eto_provider_mm_day: 5.0 + 0.2 * i as f64,
        })
        .collect()
}

/// A fixed run instant (a scheduled 00h UTC fire).
pub fn synthetic_run_instant() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 10, 9, 0, 0, 0).unwrap()
}

/// A complete snapshot with two cities, built deterministically so two calls
/// produce byte-identical encodings.
pub fn synthetic_snapshot() -> Snapshot {
    let palmas = synthetic_city();
    let balsas = CityRef {
        code: "2101400".to_string(),
        name: "Balsas".to_string(),
        state: StateCode::Ma,
        latitude: -7.53,
        longitude: -46.04,
        elevation_m: 280.0,
    };

    let mut forecasts = BTreeMap::new();
    forecasts.insert(
        palmas.code.clone(),
        CityForecast::new(&palmas, synthetic_daily_forecasts()),
    );
    forecasts.insert(
        balsas.code.clone(),
        CityForecast::new(&balsas, synthetic_daily_forecasts()),
    );

    let validation = ValidationMetrics {
        r2: Some(0.89),
        rmse_mm_day: Some(0.45),
        bias_mm_day: Some(0.05),
        mae_mm_day: Some(0.38),
        n_samples: 4,
        quality: Quality::Excellent,
    };

    Snapshot {
        forecasts,
        validation,
        metadata: RunMetadata::new(synthetic_run_instant(), 337, 2),
    }
}
