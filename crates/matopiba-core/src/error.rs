//! Error types for the MATOPIBA forecast services.

use thiserror::Error;

/// Result type alias using ForecastError.
pub type ForecastResult<T> = Result<T, ForecastError>;

/// Primary error type for the forecast pipeline and its gateways.
#[derive(Debug, Error)]
pub enum ForecastError {
    // === Upstream errors ===
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    #[error("upstream request timed out")]
    Timeout,

    #[error("upstream rate limited")]
    UpstreamRateLimited,

    #[error("upstream rejected request: {0}")]
    UpstreamBadRequest(String),

    #[error("malformed upstream payload: {0}")]
    UpstreamMalformed(String),

    // === Computation errors ===
    #[error("missing required columns: {0}")]
    MissingColumns(String),

    #[error("insufficient hours: got {got}, need at least {need}")]
    InsufficientHours { got: usize, need: usize },

    // === Persistence errors ===
    #[error("hot cache write failed: {0}")]
    CacheWriteFailed(String),

    #[error("hot cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("audit log write failed: {0}")]
    AuditWriteFailed(String),

    // === Startup / configuration errors ===
    #[error("invalid city list: {0}")]
    CityListInvalid(String),

    #[error("missing configuration: {0}")]
    MissingConfig(String),

    // === Contention ===
    #[error("a forecast run is already in progress")]
    RunAlreadyInProgress,
}

impl ForecastError {
    /// Short machine-readable kind used in per-city failure reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TransientNetwork(_) => "transient_network",
            Self::Timeout => "timeout",
            Self::UpstreamRateLimited => "upstream_rate_limited",
            Self::UpstreamBadRequest(_) => "upstream_bad_request",
            Self::UpstreamMalformed(_) => "upstream_malformed",
            Self::MissingColumns(_) => "missing_columns",
            Self::InsufficientHours { .. } => "insufficient_hours",
            Self::CacheWriteFailed(_) => "cache_write_failed",
            Self::CacheUnavailable(_) => "cache_unavailable",
            Self::AuditWriteFailed(_) => "audit_write_failed",
            Self::CityListInvalid(_) => "city_list_invalid",
            Self::MissingConfig(_) => "missing_config",
            Self::RunAlreadyInProgress => "run_in_progress",
        }
    }

    /// Whether a failed run may be re-attempted at the task level.
    ///
    /// Only a complete upstream outage and hot-cache write failures qualify;
    /// partial fetch success and audit failures never abort a run.
    pub fn is_task_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientNetwork(_)
                | Self::Timeout
                | Self::UpstreamRateLimited
                | Self::CacheWriteFailed(_)
                | Self::CacheUnavailable(_)
        )
    }
}
