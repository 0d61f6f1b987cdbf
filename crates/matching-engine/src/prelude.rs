//! Convenience re-exports for downstream crates.

pub use crate::forwarder::{Forwarder, ForwarderConfig, ParentClient};
pub use crate::manager::{DescribeResult, ManagerState, NewTask, PolledTask, TaskListManager};
pub use crate::matcher::{Matched, MatchedItem};
pub use crate::router::EngineRouter;

pub use matching_store::TaskStore;
pub use matching_types::{
    EngineError, MatchingConfig, Outcome, QueryCompletion, QueryCompletionType, QueryId, QueryPayload,
    QueryTaskInfo, TaskInfo, TaskListIdentity, TaskListKind, TaskListType, WorkflowExecution,
};
