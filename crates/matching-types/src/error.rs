//! Unified error/outcome types for the matching engine.
//!
//! `EngineError` is the `thiserror` enum every fallible engine operation
//! propagates with `?`. `Outcome<T>` is the sum type callers at the RPC
//! boundary match on to decide retry/backoff behavior without string
//! comparison, per the "dynamic dispatch over exceptions" design note: route
//! decisions on the variant, not the message.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by engine components (TaskListManager and below).
#[derive(Debug, Error, Clone)]
pub enum EngineError {
    /// A RangeID CAS failed: this manager no longer owns the task list.
    /// Retryable by the caller against a freshly created manager.
    #[error("ownership lost: observed range_id {observed_range_id}")]
    OwnershipLost { observed_range_id: i64 },

    /// Rate limiter or persistence backend asked for backoff.
    #[error("throttled: retry after {retry_after_ms}ms")]
    Throttled { retry_after_ms: u64 },

    /// Non-retryable caller error: sticky forwarding, unknown poller
    /// cancel, malformed task-list name, etc.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// `RespondQueryTaskCompleted` reported `QueryCompletionType::Failed`;
    /// the message is whatever the decision worker set as `ErrorMessage`.
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Caller's deadline elapsed. Polls treat this as an empty result, not
    /// an error; Adds surface it to the caller.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Task list row or query target absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Persistence unavailable or an invariant was violated. The affected
    /// manager is isolated (shut down) rather than left to keep writing
    /// under a possibly-stale assumption.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::OwnershipLost { .. } | EngineError::Throttled { .. } | EngineError::Internal(_)
        )
    }
}

/// The outcome of a mutating engine operation, as a variant to match on
/// rather than an error string to parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Outcome<T> {
    Ok(T),
    Throttled { retry_after_ms: u64 },
    Conflict { observed_range: i64 },
    Invalid { reason: String },
    Internal { cause: String },
}

impl<T> Outcome<T> {
    pub fn ok(value: T) -> Self {
        Outcome::Ok(value)
    }

    pub fn throttled(retry_after: Duration) -> Self {
        Outcome::Throttled {
            retry_after_ms: retry_after.as_millis() as u64,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok(_))
    }

    pub fn into_result(self) -> Result<T, EngineError> {
        match self {
            Outcome::Ok(v) => Ok(v),
            Outcome::Throttled { retry_after_ms } => Err(EngineError::Throttled { retry_after_ms }),
            Outcome::Conflict { observed_range } => {
                Err(EngineError::OwnershipLost { observed_range_id: observed_range })
            }
            Outcome::Invalid { reason } => Err(EngineError::InvalidArgument(reason)),
            Outcome::Internal { cause } => Err(EngineError::Internal(cause)),
        }
    }
}

impl<T> From<Result<T, EngineError>> for Outcome<T> {
    fn from(result: Result<T, EngineError>) -> Self {
        match result {
            Ok(v) => Outcome::Ok(v),
            Err(EngineError::OwnershipLost { observed_range_id }) => {
                Outcome::Conflict { observed_range: observed_range_id }
            }
            Err(EngineError::Throttled { retry_after_ms }) => Outcome::Throttled { retry_after_ms },
            Err(EngineError::InvalidArgument(reason)) => Outcome::Invalid { reason },
            Err(EngineError::QueryFailed(message)) => Outcome::Invalid { reason: message },
            Err(EngineError::DeadlineExceeded) => Outcome::Invalid {
                reason: "deadline exceeded".to_string(),
            },
            Err(EngineError::NotFound(what)) => Outcome::Invalid { reason: what },
            Err(EngineError::Internal(cause)) => Outcome::Internal { cause },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_round_trips_through_result() {
        let err = EngineError::OwnershipLost { observed_range_id: 7 };
        let outcome: Outcome<()> = Err(err).into();
        match outcome {
            Outcome::Conflict { observed_range } => assert_eq!(observed_range, 7),
            _ => panic!("expected Conflict"),
        }
    }

    #[test]
    fn ok_outcome_unwraps() {
        let outcome = Outcome::ok(42);
        assert_eq!(outcome.into_result().unwrap(), 42);
    }
}
