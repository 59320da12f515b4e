//! Integration tests for the ETo kernel that need the shared `test-utils`
//! fixtures. These live outside `src/eto.rs` because `test-utils` itself
//! depends on `matopiba-core`; running them as unit tests inside the crate
//! under test would compile two incompatible copies of `matopiba-core`.

use chrono::Duration;

use matopiba_core::eto::{aggregate_daily, compute_hourly_eto, extraterrestrial_radiation, saturation_vapor_pressure};
use matopiba_core::model::HourlySeries;
use test_utils::{synthetic_city, synthetic_hourly_series};

#[test]
fn test_kernel_rejects_short_series() {
    let series = synthetic_hourly_series(12);
    let city = synthetic_city();
    let err = compute_hourly_eto(&series, city.latitude, city.longitude, city.elevation_m)
        .unwrap_err();
    assert_eq!(err.kind(), "insufficient_hours");
}

#[test]
fn test_night_hours_are_small_and_non_negative() {
    let series = synthetic_hourly_series(48);
    let city = synthetic_city();
    let eto = compute_hourly_eto(&series, city.latitude, city.longitude, city.elevation_m)
        .unwrap();

    for (i, &value) in eto.eto_mm_h.iter().enumerate() {
        assert!(value >= 0.0, "hour {} negative: {}", i, value);
        if series.shortwave_radiation_wm2[i] == 0.0 {
            assert!(value < 0.1, "night hour {} too large: {}", i, value);
        }
    }
    assert_eq!(eto.non_finite_substituted, 0);
}

#[test]
fn test_missing_dew_point_defaults_to_t_minus_five() {
    let mut with_default = synthetic_hourly_series(48);
    for (td, &t) in with_default.dew_point_c.iter_mut().zip(&with_default.temp_c.clone()) {
        *td = Some(t - 5.0);
    }
    let mut without = with_default.clone();
    for td in without.dew_point_c.iter_mut() {
        *td = None;
    }

    let city = synthetic_city();
    let a = compute_hourly_eto(&with_default, city.latitude, city.longitude, city.elevation_m)
        .unwrap();
    let b = compute_hourly_eto(&without, city.latitude, city.longitude, city.elevation_m)
        .unwrap();
    for (x, y) in a.eto_mm_h.iter().zip(&b.eto_mm_h) {
        assert!((x - y).abs() < 1e-12);
    }
}

#[test]
fn test_daily_aggregation_two_consecutive_days() {
    let series = synthetic_hourly_series(48);
    let city = synthetic_city();
    let eto = compute_hourly_eto(&series, city.latitude, city.longitude, city.elevation_m)
        .unwrap();
    let days = aggregate_daily(&series, &eto.eto_mm_h);

    assert_eq!(days.len(), 2);
    assert_eq!(days[1].date, days[0].date + Duration::days(1));
    for day in &days {
        assert!(day.t_max_c >= day.t_min_c);
        assert!(day.t_min_c <= day.t_mean_c && day.t_mean_c <= day.t_max_c);
        assert!(day.radiation_sum_mj_m2 > 0.0);
        assert!(day.eto_model_mm_day > 0.0);
    }
}

#[test]
fn test_daily_aggregation_drops_partial_days() {
    // 36 hours is one complete local day plus a fragment.
    let series = synthetic_hourly_series(36);
    let city = synthetic_city();
    let eto = compute_hourly_eto(&series, city.latitude, city.longitude, city.elevation_m)
        .unwrap();
    let days = aggregate_daily(&series, &eto.eto_mm_h);
    assert_eq!(days.len(), 1);
}

// Reference implementation recomputing every step scalar-wise per hour, used
// to pin the vectorized kernel. Constants are the same FAO-56/ASCE-EWRI
// values as the kernel's private constants in `eto.rs` (SIGMA_HOURLY,
// ALBEDO, DAY_CN/DAY_CD, NIGHT_CN/NIGHT_CD); they are re-declared here
// because this file only has access to the crate's public API.
fn eto_reference_loop(
    series: &HourlySeries,
    latitude_deg: f64,
    longitude_deg: f64,
    elevation_m: f64,
) -> Vec<f64> {
    const SIGMA_HOURLY: f64 = 2.043e-10;
    const ALBEDO: f64 = 0.23;
    const DAY_CN: f64 = 37.0;
    const DAY_CD: f64 = 0.24;
    const NIGHT_CN: f64 = 6.0;
    const NIGHT_CD: f64 = 0.96;

    let pressure = 101.3 * ((293.0 - 0.0065 * elevation_m) / 293.0).powf(5.26);
    let gamma = 0.000665 * pressure;
    let wind_factor = 4.87 / (67.8_f64 * 10.0 - 5.42).ln();

    let mut out = Vec::with_capacity(series.len());
    let mut last_ratio = 0.5;
    for i in 0..series.len() {
        let t = series.temp_c[i];
        let u10 = series.wind_speed_10m_ms[i];
        let u2 = (if u10 <= 0.0 { 0.5 } else { u10 }) * wind_factor;
        let es = saturation_vapor_pressure(t);
        let td = series.dew_point_c[i].unwrap_or(t - 5.0);
        let ea = saturation_vapor_pressure(td);
        let vpd = (es - ea).max(0.0);
        let slope = 4098.0 * es / (t + 237.3).powi(2);
        let rs = series.shortwave_radiation_wm2[i] * 3600.0 / 1.0e6;
        let ra = extraterrestrial_radiation(series.timestamps_utc[i], latitude_deg, longitude_deg);
        let rso = (0.75 + 2.0e-5 * elevation_m) * ra;
        if rso > 0.05 {
            last_ratio = (rs / rso).clamp(0.3, 1.0);
        }
        let rnl = SIGMA_HOURLY
            * (t + 273.16).powi(4)
            * (0.34 - 0.14 * ea.max(0.0).sqrt())
            * (1.35 * last_ratio - 0.35);
        let rn = (1.0 - ALBEDO) * rs - rnl;
        let night = series.shortwave_radiation_wm2[i] == 0.0;
        let g = if night { 0.5 * rn } else { 0.0 };
        let (cn, cd) = if night { (NIGHT_CN, NIGHT_CD) } else { (DAY_CN, DAY_CD) };
        let numerator = 0.408 * slope * (rn - g) + gamma * (cn / (t + 273.0)) * u2 * vpd;
        let denominator = slope + gamma * (1.0 + cd * u2);
        let value = if denominator > 0.0 { numerator / denominator } else { 0.0 };
        out.push(if value.is_finite() { value.max(0.0) } else { 0.0 });
    }
    out
}

#[test]
fn test_vectorized_matches_reference_loop() {
    let series = synthetic_hourly_series(48);
    let (lat, lon, elev) = (-7.53, -45.2, 280.0);

    let vectorized = compute_hourly_eto(&series, lat, lon, elev).unwrap();
    let reference = eto_reference_loop(&series, lat, lon, elev);

    for (i, (v, r)) in vectorized.eto_mm_h.iter().zip(&reference).enumerate() {
        assert!((v - r).abs() <= 0.01, "hour {}: {} vs {}", i, v, r);
    }

    let days_v = aggregate_daily(&series, &vectorized.eto_mm_h);
    let days_r = aggregate_daily(&series, &reference);
    assert_eq!(days_v.len(), days_r.len());
    for (a, b) in days_v.iter().zip(&days_r) {
        assert!((a.eto_model_mm_day - b.eto_model_mm_day).abs() <= 0.05);
    }
}

#[test]
fn test_daily_eto_in_plausible_range() {
    // Tropical dry-season synthetic day should land in 2-9 mm/day.
    let series = synthetic_hourly_series(48);
    let city = synthetic_city();
    let eto = compute_hourly_eto(&series, city.latitude, city.longitude, city.elevation_m)
        .unwrap();
    let days = aggregate_daily(&series, &eto.eto_mm_h);
    for day in &days {
        assert!(
            (2.0..9.0).contains(&day.eto_model_mm_day),
            "daily ETo {} outside plausible range",
            day.eto_model_mm_day
        );
    }
}
