//! Redis-based hot cache for the latest forecast snapshot.
//!
//! Two keys are written on every successful run: the binary snapshot and a
//! small JSON metadata document. Both carry the same TTL, and the snapshot
//! key is written first so a reader that observes metadata always finds a
//! matching snapshot. The `:latest` suffix decouples the stored artifact
//! from the run's absolute timestamp, so readers never chase a stale key.

use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use tracing::{debug, warn};

use matopiba_core::model::{RunMetadata, Snapshot};
use matopiba_core::{ForecastError, ForecastResult};

/// Snapshot key served to read clients.
pub const KEY_FORECASTS: &str = "matopiba:forecasts:latest";

/// Metadata key served to read clients.
pub const KEY_METADATA: &str = "matopiba:metadata:latest";

/// TTL applied to both keys on every write: 6 hours.
pub const SNAPSHOT_TTL_SECS: u64 = 21_600;

/// Encode a snapshot to its binary cache representation.
///
/// MessagePack over `BTreeMap`-ordered fields, so two snapshots built from
/// identical inputs compare equal byte-for-byte.
pub fn encode_snapshot(snapshot: &Snapshot) -> ForecastResult<Vec<u8>> {
    rmp_serde::to_vec(snapshot)
        .map_err(|e| ForecastError::CacheWriteFailed(format!("snapshot encode failed: {}", e)))
}

/// Decode a snapshot from its binary cache representation.
pub fn decode_snapshot(bytes: &[u8]) -> ForecastResult<Snapshot> {
    rmp_serde::from_slice(bytes)
        .map_err(|e| ForecastError::CacheUnavailable(format!("snapshot decode failed: {}", e)))
}

/// Redis hot cache client.
pub struct SnapshotCache {
    conn: MultiplexedConnection,
}

impl SnapshotCache {
    /// Connect to Redis.
    pub async fn connect(kv_url: &str) -> ForecastResult<Self> {
        let client = Client::open(kv_url)
            .map_err(|e| ForecastError::CacheUnavailable(format!("Redis connection failed: {}", e)))?;

        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| ForecastError::CacheUnavailable(format!("Redis connection failed: {}", e)))?;

        Ok(Self { conn })
    }

    /// Publish a run's snapshot and metadata, each with the 6-hour TTL.
    ///
    /// Legacy keys from older deployments are deleted first, best effort.
    pub async fn put_snapshot(&mut self, snapshot: &Snapshot) -> ForecastResult<()> {
        let payload = encode_snapshot(snapshot)?;
        let metadata = serde_json::to_string(&snapshot.metadata)
            .map_err(|e| ForecastError::CacheWriteFailed(format!("metadata encode failed: {}", e)))?;

        if let Err(e) = self.cleanup_legacy_keys().await {
            warn!(error = %e, "Legacy cache key cleanup failed");
        }

        self.conn
            .set_ex::<_, _, ()>(KEY_FORECASTS, payload.as_slice(), SNAPSHOT_TTL_SECS)
            .await
            .map_err(|e| ForecastError::CacheWriteFailed(format!("snapshot write failed: {}", e)))?;

        self.conn
            .set_ex::<_, _, ()>(KEY_METADATA, metadata.as_str(), SNAPSHOT_TTL_SECS)
            .await
            .map_err(|e| ForecastError::CacheWriteFailed(format!("metadata write failed: {}", e)))?;

        debug!(
            bytes = payload.len(),
            ttl_secs = SNAPSHOT_TTL_SECS,
            "Snapshot written to hot cache"
        );
        Ok(())
    }

    /// Fetch the latest snapshot, if one is cached.
    pub async fn get_snapshot(&mut self) -> ForecastResult<Option<Snapshot>> {
        let bytes: Option<Vec<u8>> = self
            .conn
            .get(KEY_FORECASTS)
            .await
            .map_err(|e| ForecastError::CacheUnavailable(format!("snapshot read failed: {}", e)))?;

        bytes.map(|b| decode_snapshot(&b)).transpose()
    }

    /// Fetch the latest run metadata, if cached.
    pub async fn get_metadata(&mut self) -> ForecastResult<Option<RunMetadata>> {
        let raw: Option<String> = self
            .conn
            .get(KEY_METADATA)
            .await
            .map_err(|e| ForecastError::CacheUnavailable(format!("metadata read failed: {}", e)))?;

        raw.map(|s| {
            serde_json::from_str(&s).map_err(|e| {
                ForecastError::CacheUnavailable(format!("metadata decode failed: {}", e))
            })
        })
        .transpose()
    }

    /// Remaining TTL of the metadata key in seconds, if the key exists.
    pub async fn metadata_ttl(&mut self) -> ForecastResult<Option<i64>> {
        let ttl: i64 = self
            .conn
            .ttl(KEY_METADATA)
            .await
            .map_err(|e| ForecastError::CacheUnavailable(format!("TTL read failed: {}", e)))?;

        Ok(if ttl >= 0 { Some(ttl) } else { None })
    }

    /// Delete keys left behind by older deployments that stamped run
    /// timestamps into key names.
    async fn cleanup_legacy_keys(&mut self) -> ForecastResult<u64> {
        let mut stale = Vec::new();
        for pattern in ["matopiba:forecasts:*", "matopiba:metadata:*"] {
            let keys: Vec<String> = redis::cmd("KEYS")
                .arg(pattern)
                .query_async(&mut self.conn)
                .await
                .map_err(|e| {
                    ForecastError::CacheUnavailable(format!("pattern search failed: {}", e))
                })?;
            stale.extend(legacy_keys(keys));
        }

        if stale.is_empty() {
            return Ok(0);
        }

        let count = stale.len() as u64;
        for key in stale {
            let _: () = self.conn.del(&key).await.map_err(|e| {
                ForecastError::CacheUnavailable(format!("legacy key delete failed: {}", e))
            })?;
        }

        debug!(deleted = count, "Legacy cache keys removed");
        Ok(count)
    }
}

/// Filter a key listing down to the names that are not the `:latest` pair.
fn legacy_keys(keys: Vec<String>) -> Vec<String> {
    keys.into_iter()
        .filter(|k| k != KEY_FORECASTS && k != KEY_METADATA)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::synthetic_snapshot;

    #[test]
    fn test_encode_is_deterministic() {
        let a = encode_snapshot(&synthetic_snapshot()).unwrap();
        let b = encode_snapshot(&synthetic_snapshot()).unwrap();
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn test_snapshot_round_trips() {
        let snapshot = synthetic_snapshot();
        let bytes = encode_snapshot(&snapshot).unwrap();
        let back = decode_snapshot(&bytes).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode_snapshot(&[0xc1, 0x00, 0xff]).unwrap_err();
        assert_eq!(err.kind(), "cache_unavailable");
    }

    #[test]
    fn test_legacy_key_filter() {
        let keys = vec![
            KEY_FORECASTS.to_string(),
            KEY_METADATA.to_string(),
            "matopiba:forecasts:previous".to_string(),
            "matopiba:forecasts:2025-10-08T18:00".to_string(),
            "matopiba:metadata:previous".to_string(),
        ];
        let stale = legacy_keys(keys);
        assert_eq!(stale.len(), 3);
        assert!(stale.iter().all(|k| !k.ends_with(":latest")));
    }
}
