//! Convenience re-exports for downstream crates.

pub use crate::config::MatchingConfig;
pub use crate::error::{EngineError, Outcome};
pub use crate::identity::{TaskListIdentity, TaskListKind, TaskListType};
pub use crate::query::{QueryCompletion, QueryCompletionType, QueryId, QueryPayload, QueryTaskInfo};
pub use crate::task::{
    DeliveryState, InFlightTask, PollerInfo, TaskIdBlock, TaskInfo, TaskListState, WorkflowExecution,
};
