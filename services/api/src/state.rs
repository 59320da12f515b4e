//! Application state shared across API handlers.

use tokio::sync::Mutex;

use storage::SnapshotCache;

/// Shared state: the hot cache connection behind a mutex.
///
/// Handlers are the only readers; the orchestration worker is the only
/// writer, and its atomic key-swap means no further coordination is needed.
pub struct AppState {
    pub cache: Mutex<SnapshotCache>,
}

impl AppState {
    pub fn new(cache: SnapshotCache) -> Self {
        Self { cache: Mutex::new(cache) }
    }
}
