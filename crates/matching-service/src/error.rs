//! Error type for the RPC boundary. Engine-internal `Outcome` variants that
//! are not `Ok` are mapped here the same way the engine's own `EngineError`
//! maps into `Outcome` — by variant, not by message text.

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum MatchingServiceError {
    #[error("task list ownership changed, retry against a fresh partition (observed range {observed_range})")]
    Conflict { observed_range: i64 },

    #[error("throttled, retry after {retry_after_ms}ms")]
    Throttled { retry_after_ms: u64 },

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl<T> From<matching_types::Outcome<T>> for Result<T, MatchingServiceError> {
    fn from(outcome: matching_types::Outcome<T>) -> Self {
        match outcome {
            matching_types::Outcome::Ok(v) => Ok(v),
            matching_types::Outcome::Throttled { retry_after_ms } => {
                Err(MatchingServiceError::Throttled { retry_after_ms })
            }
            matching_types::Outcome::Conflict { observed_range } => {
                Err(MatchingServiceError::Conflict { observed_range })
            }
            matching_types::Outcome::Invalid { reason } => Err(MatchingServiceError::Invalid(reason)),
            matching_types::Outcome::Internal { cause } => Err(MatchingServiceError::Internal(cause)),
        }
    }
}

impl From<matching_store::TaskStoreError> for MatchingServiceError {
    fn from(err: matching_store::TaskStoreError) -> Self {
        MatchingServiceError::Internal(err.to_string())
    }
}

/// Pull a `T` out of an `Outcome<T>`, or a `MatchingServiceError` otherwise.
pub(crate) fn unwrap_outcome<T>(outcome: matching_types::Outcome<T>) -> Result<T, MatchingServiceError> {
    outcome.into()
}
