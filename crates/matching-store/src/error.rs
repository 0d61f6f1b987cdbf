//! Unified error type for `TaskStore` backends, per spec §4.1.

use thiserror::Error;

/// Errors a `TaskStore` implementation can return. Distinguished so callers
/// can route on kind rather than message text (§7: OwnershipLost, Throttled,
/// NotFound, Internal each have a distinct recovery policy upstream).
#[derive(Debug, Error, Clone)]
pub enum TaskStoreError {
    /// Optimistic-concurrency check on `RangeID` failed — ownership lost.
    #[error("condition failed: expected range_id {expected}, observed {observed}")]
    ConditionFailed { expected: i64, observed: i64 },

    /// The backend did not respond within its deadline. Retryable.
    #[error("storage timeout: {0}")]
    Timeout(String),

    /// Row absent — callers create it on demand.
    #[error("not found: {0}")]
    NotFound(String),

    /// Backend asked for backoff.
    #[error("throttled: retry after {retry_after_ms}ms")]
    Throttled { retry_after_ms: u64 },

    /// Anything else: connection failure, serialization failure, a bug.
    #[error("storage internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for TaskStoreError {
    fn from(err: serde_json::Error) -> Self {
        TaskStoreError::Internal(format!("serialization: {err}"))
    }
}

#[cfg(any(feature = "sqlite", feature = "postgres"))]
impl From<sqlx::Error> for TaskStoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => TaskStoreError::Timeout(err.to_string()),
            sqlx::Error::RowNotFound => TaskStoreError::NotFound(err.to_string()),
            other => TaskStoreError::Internal(other.to_string()),
        }
    }
}
