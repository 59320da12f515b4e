//! Read-path HTTP handlers.
//!
//! Stateless, synchronous reads against the hot cache. A cache miss is a
//! 503 with a `next_update_utc` hint; reads never reach the upstream
//! provider under any circumstance.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use matopiba_core::model::{next_run_after, RunMetadata, Snapshot};
use matopiba_core::ForecastResult;

use crate::state::AppState;

/// Hard timeout on every cache lookup; on expiry the client sees a 503.
const CACHE_LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct CacheEmptyResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_update_utc: Option<DateTime<Utc>>,
}

/// Create the read API router.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/matopiba/forecasts", get(forecasts_handler))
        .route("/api/v1/matopiba/metadata", get(metadata_handler))
        .route("/api/v1/matopiba/health", get(health_handler))
        .layer(cors)
        .layer(Extension(state))
}

/// GET /api/v1/matopiba/forecasts - Full snapshot or 503
async fn forecasts_handler(Extension(state): Extension<Arc<AppState>>) -> Response {
    let lookup = async {
        let mut cache = state.cache.lock().await;
        let snapshot = cache.get_snapshot().await?;
        // The metadata key can outlive the snapshot key; its stamped
        // next_update is the accurate 503 hint when it does.
        let metadata = cache.get_metadata().await.unwrap_or(None);
        let ttl = cache.metadata_ttl().await.unwrap_or(None);
        Ok::<_, matopiba_core::ForecastError>((snapshot, metadata, ttl))
    };

    match tokio::time::timeout(CACHE_LOOKUP_TIMEOUT, lookup).await {
        Ok(Ok((Some(snapshot), _, ttl))) => snapshot_response(&snapshot, ttl),
        Ok(Ok((None, metadata, _))) => {
            cache_empty_response(Some(next_update_hint(metadata.as_ref(), Utc::now())))
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Snapshot lookup failed");
            cache_empty_response(Some(next_update_hint(None, Utc::now())))
        }
        Err(_) => {
            warn!("Snapshot lookup timed out");
            cache_empty_response(Some(next_update_hint(None, Utc::now())))
        }
    }
}

/// GET /api/v1/matopiba/metadata - Run metadata or 503
async fn metadata_handler(Extension(state): Extension<Arc<AppState>>) -> Response {
    let lookup = async {
        let mut cache = state.cache.lock().await;
        let metadata = cache.get_metadata().await?;
        let ttl = cache.metadata_ttl().await.unwrap_or(None);
        Ok::<_, matopiba_core::ForecastError>((metadata, ttl))
    };

    match tokio::time::timeout(CACHE_LOOKUP_TIMEOUT, lookup).await {
        Ok(Ok((Some(metadata), ttl))) => metadata_response(&metadata, ttl),
        Ok(Ok((None, _))) => cache_empty_response(None),
        Ok(Err(e)) => {
            warn!(error = %e, "Metadata lookup failed");
            cache_empty_response(None)
        }
        Err(_) => {
            warn!("Metadata lookup timed out");
            cache_empty_response(None)
        }
    }
}

/// GET /api/v1/matopiba/health - Liveness without consulting the cache
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok".to_string() })
}

fn snapshot_response(snapshot: &Snapshot, ttl: Option<i64>) -> Response {
    match to_json_with_ttl(snapshot, ttl) {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(e) => {
            warn!(error = %e, "Snapshot serialization failed");
            cache_empty_response(Some(next_update_hint(
                Some(&snapshot.metadata),
                Utc::now(),
            )))
        }
    }
}

fn metadata_response(metadata: &RunMetadata, ttl: Option<i64>) -> Response {
    match to_json_with_ttl(metadata, ttl) {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(e) => {
            warn!(error = %e, "Metadata serialization failed");
            cache_empty_response(None)
        }
    }
}

/// Serialize a cache value and stamp the remaining TTL into its metadata.
fn to_json_with_ttl<T: Serialize>(
    value: &T,
    ttl: Option<i64>,
) -> ForecastResult<serde_json::Value> {
    let mut body = serde_json::to_value(value).map_err(|e| {
        matopiba_core::ForecastError::CacheUnavailable(format!("serialization failed: {}", e))
    })?;

    if let Some(ttl_seconds) = ttl {
        let target = if body.get("metadata").is_some() {
            &mut body["metadata"]
        } else {
            &mut body
        };
        if let Some(object) = target.as_object_mut() {
            object.insert("ttl_seconds".to_string(), serde_json::json!(ttl_seconds));
        }
    }
    Ok(body)
}

/// Polling hint for an empty-cache 503: the next_update the worker stamped
/// into the metadata key when that key still lives, otherwise the next
/// scheduled instant.
fn next_update_hint(metadata: Option<&RunMetadata>, now: DateTime<Utc>) -> DateTime<Utc> {
    match metadata {
        Some(metadata) => metadata.next_update_utc,
        None => next_run_after(now),
    }
}

/// 503 for an empty cache, with the polling hint when the endpoint carries one.
fn cache_empty_response(next_update_utc: Option<DateTime<Utc>>) -> Response {
    let body = CacheEmptyResponse {
        error: "cache_empty".to_string(),
        next_update_utc,
    };
    (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_handler() {
        let response = health_handler().await;
        assert_eq!(response.status, "ok");
    }

    #[test]
    fn test_cache_empty_body_shape() {
        let body = CacheEmptyResponse {
            error: "cache_empty".to_string(),
            next_update_utc: Some(Utc::now()),
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"error\":\"cache_empty\""));
        assert!(json.contains("next_update_utc"));

        let no_hint = CacheEmptyResponse { error: "cache_empty".to_string(), next_update_utc: None };
        let json = serde_json::to_string(&no_hint).unwrap();
        assert!(!json.contains("next_update_utc"));
    }

    #[test]
    fn test_ttl_is_stamped_into_metadata() {
        let snapshot = test_utils::synthetic_snapshot();
        let body = to_json_with_ttl(&snapshot, Some(1800)).unwrap();
        assert_eq!(body["metadata"]["ttl_seconds"], 1800);

        let metadata = snapshot.metadata.clone();
        let body = to_json_with_ttl(&metadata, Some(1800)).unwrap();
        assert_eq!(body["ttl_seconds"], 1800);
    }

    #[test]
    fn test_hint_uses_live_metadata_when_present() {
        // Fixture run fired at 00h UTC, so its stamped next_update is 06:00.
        let metadata = test_utils::synthetic_snapshot().metadata;
        let now = metadata.updated_at_utc + chrono::Duration::hours(7);

        let hint = next_update_hint(Some(&metadata), now);
        assert_eq!(hint, metadata.next_update_utc);
        // The schedule fallback would have pointed at a later instant.
        assert_ne!(hint, next_run_after(now));
    }

    #[test]
    fn test_hint_falls_back_to_schedule_without_metadata() {
        use chrono::TimeZone;

        let now = Utc.with_ymd_and_hms(2025, 10, 9, 1, 30, 0).unwrap();
        assert_eq!(next_update_hint(None, now), next_run_after(now));
        assert_eq!(
            next_update_hint(None, now),
            Utc.with_ymd_and_hms(2025, 10, 9, 6, 0, 0).unwrap()
        );
    }
}
