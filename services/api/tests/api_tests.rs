//! Tests for the read API response contract.
//!
//! These exercise the JSON shapes served to clients without requiring a
//! Redis connection: the snapshot fixture is serialized exactly the way the
//! forecasts handler does it.

use serde_json::Value;
use test_utils::synthetic_snapshot;

#[test]
fn test_snapshot_body_has_top_level_sections() {
    let snapshot = synthetic_snapshot();
    let body = serde_json::to_value(&snapshot).unwrap();

    assert!(body.get("forecasts").is_some());
    assert!(body.get("validation").is_some());
    assert!(body.get("metadata").is_some());
}

#[test]
fn test_city_entry_shape() {
    let snapshot = synthetic_snapshot();
    let body = serde_json::to_value(&snapshot).unwrap();

    let city = &body["forecasts"]["1721000"];
    assert_eq!(city["city_name"], "Palmas");
    assert_eq!(city["state"], "TO");
    assert!(city["latitude"].is_f64());
    assert!(city["longitude"].is_f64());
    assert!(city["elevation_m"].is_f64());

    let days = city["days"].as_array().unwrap();
    assert_eq!(days.len(), 2);
    for day in days {
        assert!(day["date"].is_string());
        for field in [
            "t_max_c",
            "t_min_c",
            "rh_mean_pct",
            "ws_mean_ms",
            "radiation_sum_mj_m2",
            "precipitation_sum_mm",
            "eto_model_mm_day",
            "eto_provider_mm_day",
        ] {
            assert!(day.get(field).is_some(), "missing field {}", field);
        }
    }

    // Consecutive calendar dates.
    assert_eq!(days[0]["date"], "2025-10-09");
    assert_eq!(days[1]["date"], "2025-10-10");
}

#[test]
fn test_validation_section_shape() {
    let snapshot = synthetic_snapshot();
    let body = serde_json::to_value(&snapshot).unwrap();

    let validation = &body["validation"];
    assert!(validation["r2"].is_f64());
    assert!(validation["rmse_mm_day"].is_f64());
    assert!(validation["bias_mm_day"].is_f64());
    assert!(validation["mae_mm_day"].is_f64());
    assert_eq!(validation["n_samples"], 4);
    assert_eq!(validation["quality"], "EXCELLENT");
}

#[test]
fn test_metadata_section_shape() {
    let snapshot = synthetic_snapshot();
    let body = serde_json::to_value(&snapshot).unwrap();

    let metadata = &body["metadata"];
    assert_eq!(metadata["run_label"], "00h UTC");
    assert_eq!(metadata["n_cities_attempted"], 337);
    assert_eq!(metadata["n_cities_succeeded"], 2);
    assert_eq!(metadata["version"], "1.0.0");

    // next_update is six hours after updated_at.
    let updated: chrono::DateTime<chrono::Utc> =
        serde_json::from_value(metadata["updated_at_utc"].clone()).unwrap();
    let next: chrono::DateTime<chrono::Utc> =
        serde_json::from_value(metadata["next_update_utc"].clone()).unwrap();
    assert_eq!(next - updated, chrono::Duration::hours(6));
}

#[test]
fn test_snapshot_body_is_valid_json_even_with_missing_provider_eto() {
    let mut snapshot = synthetic_snapshot();
    if let Some(city) = snapshot.forecasts.get_mut("1721000") {
        city.days[0].eto_provider_mm_day = f64::NAN;
    }

    // NaN provider ETo must serialize as null, not fail the response.
    let body = serde_json::to_value(&snapshot).unwrap();
    assert!(body["forecasts"]["1721000"]["days"][0]["eto_provider_mm_day"].is_null());

    let as_string = serde_json::to_string(&body).unwrap();
    let reparsed: Value = serde_json::from_str(&as_string).unwrap();
    assert_eq!(reparsed, body);
}
