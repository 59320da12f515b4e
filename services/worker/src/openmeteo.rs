//! Batched Open-Meteo forecast client.
//!
//! Fetches hourly forecast variables plus the provider's own ETo for up to
//! 50 coordinates per request, with retry and exponential backoff. A failed
//! batch never aborts the run: its cities are reported as failures and the
//! remaining batches proceed.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{NaiveDateTime, TimeZone, Utc};
use chrono_tz::America::Sao_Paulo;
use futures::stream::{self, StreamExt};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};

use matopiba_core::model::CityFailure;
use matopiba_core::{CityRef, CityRegistry, ForecastError, ForecastResult, HourlySeries};

/// Provider limit on coordinates per request.
pub const BATCH_SIZE: usize = 50;

/// Forecast horizon: today plus tomorrow.
pub const FORECAST_DAYS: u32 = 2;

/// Bounded in-flight batch requests, a courtesy limit toward the provider.
const MAX_CONCURRENT_BATCHES: usize = 4;

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(4);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Hourly variables requested from the provider.
const HOURLY_VARS: &str = "temperature_2m,relative_humidity_2m,dew_point_2m,wind_speed_10m,\
                           shortwave_radiation,precipitation,et0_fao_evapotranspiration";

/// One location's payload. The provider returns a JSON array for
/// multi-coordinate requests and a bare object for a single coordinate.
#[derive(Debug, Deserialize)]
struct LocationResponse {
    hourly: HourlyBlock,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ProviderResponse {
    Many(Vec<LocationResponse>),
    One(Box<LocationResponse>),
}

/// Parallel hourly arrays aligned by index.
#[derive(Debug, Deserialize)]
struct HourlyBlock {
    time: Vec<String>,
    #[serde(default)]
    temperature_2m: Vec<Option<f64>>,
    #[serde(default)]
    relative_humidity_2m: Vec<Option<f64>>,
    #[serde(default)]
    dew_point_2m: Vec<Option<f64>>,
    #[serde(default)]
    wind_speed_10m: Vec<Option<f64>>,
    #[serde(default)]
    shortwave_radiation: Vec<Option<f64>>,
    #[serde(default)]
    precipitation: Vec<Option<f64>>,
    #[serde(default)]
    et0_fao_evapotranspiration: Vec<Option<f64>>,
}

/// Result of fetching the whole registry.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub series: BTreeMap<String, HourlySeries>,
    pub failures: Vec<CityFailure>,
}

#[derive(Debug, Default)]
struct BatchOutcome {
    series: Vec<(String, HourlySeries)>,
    failures: Vec<CityFailure>,
}

/// HTTP client for the forecast provider.
pub struct ForecastClient {
    http: Client,
    base_url: String,
}

impl ForecastClient {
    pub fn new(base_url: &str) -> ForecastResult<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| {
                ForecastError::TransientNetwork(format!("failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch hourly forecasts for every city in the registry.
    ///
    /// Batches run concurrently, bounded by a small in-flight limit. The
    /// outcome maps city codes to their series; cities from failed batches
    /// land in `failures` with the error kind.
    pub async fn fetch_all(&self, registry: &CityRegistry) -> FetchOutcome {
        let batches: Vec<&[CityRef]> = registry.batches(BATCH_SIZE).collect();
        info!(
            batches = batches.len(),
            cities = registry.len(),
            "Fetching provider forecasts"
        );

        let results = stream::iter(batches.into_iter().enumerate())
            .map(|(idx, cities)| async move {
                let outcome = self.fetch_batch(cities).await;
                (idx, cities, outcome)
            })
            .buffer_unordered(MAX_CONCURRENT_BATCHES)
            .collect::<Vec<_>>()
            .await;

        let mut outcome = FetchOutcome::default();
        for (idx, cities, result) in results {
            match result {
                Ok(batch) => {
                    for failure in &batch.failures {
                        warn!(
                            batch = idx,
                            city = %failure.city_code,
                            kind = %failure.error_kind,
                            "City dropped while parsing batch"
                        );
                    }
                    outcome.failures.extend(batch.failures);
                    for (code, series) in batch.series {
                        outcome.series.insert(code, series);
                    }
                }
                Err(e) => {
                    warn!(batch = idx, cities = cities.len(), error = %e, "Batch fetch failed");
                    outcome.failures.extend(cities.iter().map(|c| CityFailure {
                        city_code: c.code.clone(),
                        error_kind: e.kind().to_string(),
                    }));
                }
            }
        }

        let fetched = outcome.series.len();
        let rate = fetched as f64 / registry.len().max(1) as f64;
        if rate < 0.9 {
            warn!(fetched, total = registry.len(), "Low fetch success rate");
        } else {
            info!(fetched, total = registry.len(), "Fetch complete");
        }
        outcome
    }

    /// Fetch one city's hourly series, for ad-hoc inspection.
    pub async fn fetch_city(&self, city: &CityRef) -> ForecastResult<HourlySeries> {
        let batch = self.fetch_batch(std::slice::from_ref(city)).await?;
        if let Some(failure) = batch.failures.into_iter().next() {
            return Err(ForecastError::UpstreamMalformed(format!(
                "city {}: {}",
                failure.city_code, failure.error_kind
            )));
        }
        batch
            .series
            .into_iter()
            .next()
            .map(|(_, series)| series)
            .ok_or_else(|| ForecastError::UpstreamMalformed("empty batch response".to_string()))
    }

    async fn fetch_batch(&self, cities: &[CityRef]) -> ForecastResult<BatchOutcome> {
        let url = self.batch_url(cities);
        debug!(cities = cities.len(), "Requesting provider batch");
        let body = self.request_with_retry(&url).await?;
        parse_batch(cities, &body)
    }

    /// Issue one request with up to three attempts and exponential backoff.
    /// Transient network errors, timeouts, 5xx, and 429 retry; other 4xx
    /// abort the batch immediately.
    async fn request_with_retry(&self, url: &str) -> ForecastResult<String> {
        let mut delay = INITIAL_RETRY_DELAY;
        let mut attempt = 1u32;

        loop {
            let error = match self.http.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.text().await.map_err(|e| {
                            ForecastError::UpstreamMalformed(format!("body read failed: {}", e))
                        });
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        ForecastError::UpstreamRateLimited
                    } else if status.is_server_error() {
                        ForecastError::TransientNetwork(format!("HTTP {}", status))
                    } else {
                        return Err(ForecastError::UpstreamBadRequest(format!("HTTP {}", status)));
                    }
                }
                Err(e) if e.is_timeout() => ForecastError::Timeout,
                Err(e) => ForecastError::TransientNetwork(e.to_string()),
            };

            if attempt >= MAX_ATTEMPTS {
                return Err(error);
            }
            warn!(
                error = %error,
                attempt,
                delay_secs = delay.as_secs(),
                "Provider request failed, retrying"
            );
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(MAX_RETRY_DELAY);
            attempt += 1;
        }
    }

    /// Build the multi-coordinate request URL.
    ///
    /// `timezone=America/Sao_Paulo` makes the 48 returned hours exactly two
    /// local calendar days; `wind_speed_unit=ms` skips the provider's km/h
    /// default.
    fn batch_url(&self, cities: &[CityRef]) -> String {
        let latitudes = cities
            .iter()
            .map(|c| format!("{:.4}", c.latitude))
            .collect::<Vec<_>>()
            .join(",");
        let longitudes = cities
            .iter()
            .map(|c| format!("{:.4}", c.longitude))
            .collect::<Vec<_>>()
            .join(",");

        format!(
            "{}?latitude={}&longitude={}&hourly={}&models=best_match&forecast_days={}\
             &timezone=America%2FSao_Paulo&wind_speed_unit=ms",
            self.base_url, latitudes, longitudes, HOURLY_VARS, FORECAST_DAYS
        )
    }
}

fn parse_batch(cities: &[CityRef], body: &str) -> ForecastResult<BatchOutcome> {
    let parsed: ProviderResponse = serde_json::from_str(body)
        .map_err(|e| ForecastError::UpstreamMalformed(e.to_string()))?;
    let locations = match parsed {
        ProviderResponse::Many(list) => list,
        ProviderResponse::One(single) => vec![*single],
    };

    let mut outcome = BatchOutcome::default();
    for (i, city) in cities.iter().enumerate() {
        match locations.get(i) {
            Some(location) => match hourly_to_series(&location.hourly) {
                Ok(series) => outcome.series.push((city.code.clone(), series)),
                Err(e) => outcome.failures.push(CityFailure {
                    city_code: city.code.clone(),
                    error_kind: e.kind().to_string(),
                }),
            },
            None => outcome.failures.push(CityFailure {
                city_code: city.code.clone(),
                error_kind: "upstream_malformed".to_string(),
            }),
        }
    }
    Ok(outcome)
}

/// Convert one location's parallel arrays into an hourly series.
///
/// Required variables must be fully populated; a null cell drops the city.
/// Dew point stays optional per cell, precipitation nulls read as zero, and
/// missing provider ETo becomes NaN so validation can skip it.
fn hourly_to_series(block: &HourlyBlock) -> ForecastResult<HourlySeries> {
    let n = block.time.len();
    if n == 0 {
        return Err(ForecastError::UpstreamMalformed("empty hourly block".to_string()));
    }

    let timestamps_utc = block
        .time
        .iter()
        .map(|raw| {
            let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M").map_err(|e| {
                ForecastError::UpstreamMalformed(format!("bad timestamp {:?}: {}", raw, e))
            })?;
            Sao_Paulo
                .from_local_datetime(&naive)
                .single()
                .map(|local| local.with_timezone(&Utc))
                .ok_or_else(|| {
                    ForecastError::UpstreamMalformed(format!("ambiguous timestamp {:?}", raw))
                })
        })
        .collect::<ForecastResult<Vec<_>>>()?;

    let series = HourlySeries {
        timestamps_utc,
        temp_c: required_column("temperature_2m", &block.temperature_2m, n)?,
        relative_humidity_pct: required_column(
            "relative_humidity_2m",
            &block.relative_humidity_2m,
            n,
        )?,
        wind_speed_10m_ms: required_column("wind_speed_10m", &block.wind_speed_10m, n)?,
        shortwave_radiation_wm2: required_column(
            "shortwave_radiation",
            &block.shortwave_radiation,
            n,
        )?,
        precipitation_mm: lenient_column(&block.precipitation, n, 0.0),
        dew_point_c: optional_column(&block.dew_point_2m, n),
        provider_eto_mm_h: lenient_column(&block.et0_fao_evapotranspiration, n, f64::NAN),
    };
    series.check_columns()?;
    Ok(series)
}

fn required_column(name: &str, values: &[Option<f64>], n: usize) -> ForecastResult<Vec<f64>> {
    if values.len() != n {
        return Err(ForecastError::UpstreamMalformed(format!(
            "hourly column {} has {} cells, expected {}",
            name,
            values.len(),
            n
        )));
    }
    values
        .iter()
        .map(|v| {
            v.ok_or_else(|| {
                ForecastError::UpstreamMalformed(format!("null cell in hourly column {}", name))
            })
        })
        .collect()
}

fn lenient_column(values: &[Option<f64>], n: usize, fill: f64) -> Vec<f64> {
    if values.len() != n {
        return vec![fill; n];
    }
    values.iter().map(|v| v.unwrap_or(fill)).collect()
}

fn optional_column(values: &[Option<f64>], n: usize) -> Vec<Option<f64>> {
    if values.len() != n {
        return vec![None; n];
    }
    values.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use test_utils::synthetic_city;

    fn location_json(hours: usize) -> serde_json::Value {
        let time: Vec<String> = (0..hours)
            .map(|h| format!("2025-10-{:02}T{:02}:00", 9 + h / 24, h % 24))
            .collect();
        let column: Vec<f64> = (0..hours).map(|h| h as f64).collect();
        json!({
            "latitude": -10.24,
            "longitude": -48.35,
            "hourly": {
                "time": time,
                "temperature_2m": column,
                "relative_humidity_2m": column,
                "dew_point_2m": column,
                "wind_speed_10m": column,
                "shortwave_radiation": column,
                "precipitation": column,
                "et0_fao_evapotranspiration": column,
            }
        })
    }

    fn cities(n: usize) -> Vec<CityRef> {
        (0..n)
            .map(|i| {
                let mut city = synthetic_city();
                city.code = format!("17{:05}", i);
                city
            })
            .collect()
    }

    #[test]
    fn test_batch_url_shape() {
        let client = ForecastClient::new("https://api.open-meteo.com/v1/forecast").unwrap();
        let url = client.batch_url(&cities(2));

        assert!(url.starts_with("https://api.open-meteo.com/v1/forecast?"));
        assert!(url.contains("latitude=-10.2400,-10.2400"));
        assert!(url.contains("longitude=-48.3500,-48.3500"));
        assert!(url.contains("hourly=temperature_2m,"));
        assert!(url.contains("et0_fao_evapotranspiration"));
        assert!(url.contains("forecast_days=2"));
        assert!(url.contains("timezone=America%2FSao_Paulo"));
        assert!(url.contains("wind_speed_unit=ms"));
    }

    #[test]
    fn test_parse_multi_location_response() {
        let body = json!([location_json(48), location_json(48)]).to_string();
        let outcome = parse_batch(&cities(2), &body).unwrap();

        assert_eq!(outcome.series.len(), 2);
        assert!(outcome.failures.is_empty());
        let (_, series) = &outcome.series[0];
        assert_eq!(series.len(), 48);
        // 2025-10-09T00:00 America/Sao_Paulo is 03:00 UTC.
        assert_eq!(
            series.timestamps_utc[0],
            Utc.with_ymd_and_hms(2025, 10, 9, 3, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_single_location_response() {
        let body = location_json(48).to_string();
        let outcome = parse_batch(&cities(1), &body).unwrap();
        assert_eq!(outcome.series.len(), 1);
    }

    #[test]
    fn test_short_location_list_reports_missing_cities() {
        let body = json!([location_json(48)]).to_string();
        let outcome = parse_batch(&cities(3), &body).unwrap();
        assert_eq!(outcome.series.len(), 1);
        assert_eq!(outcome.failures.len(), 2);
        assert!(outcome.failures.iter().all(|f| f.error_kind == "upstream_malformed"));
    }

    #[test]
    fn test_null_cells_in_required_column_drop_city() {
        let mut location = location_json(48);
        location["hourly"]["temperature_2m"][7] = serde_json::Value::Null;
        let body = json!([location]).to_string();

        let outcome = parse_batch(&cities(1), &body).unwrap();
        assert!(outcome.series.is_empty());
        assert_eq!(outcome.failures[0].error_kind, "upstream_malformed");
    }

    #[test]
    fn test_null_provider_eto_becomes_nan() {
        let mut location = location_json(48);
        location["hourly"]["et0_fao_evapotranspiration"][0] = serde_json::Value::Null;
        let body = json!([location]).to_string();

        let outcome = parse_batch(&cities(1), &body).unwrap();
        let (_, series) = &outcome.series[0];
        assert!(series.provider_eto_mm_h[0].is_nan());
        assert!(series.provider_eto_mm_h[1].is_finite());
    }

    #[test]
    fn test_missing_dew_point_column_is_tolerated() {
        let mut location = location_json(48);
        location["hourly"]
            .as_object_mut()
            .unwrap()
            .remove("dew_point_2m");
        let body = json!([location]).to_string();

        let outcome = parse_batch(&cities(1), &body).unwrap();
        let (_, series) = &outcome.series[0];
        assert!(series.dew_point_c.iter().all(Option::is_none));
    }

    #[test]
    fn test_garbage_body_is_malformed() {
        let err = parse_batch(&cities(1), "not json").unwrap_err();
        assert_eq!(err.kind(), "upstream_malformed");
    }
}
