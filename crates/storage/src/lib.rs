//! Storage gateways for the MATOPIBA forecast services.
//!
//! Provides unified interfaces for:
//! - Redis as the hot snapshot cache served to read clients
//! - PostgreSQL as the append-only audit log of historical runs

pub mod audit;
pub mod cache;

pub use audit::{AuditLog, AuditRow, RunRecord};
pub use cache::{decode_snapshot, encode_snapshot, SnapshotCache, SNAPSHOT_TTL_SECS};
