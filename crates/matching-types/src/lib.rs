//! Core types shared across the matching engine: task-list identity,
//! persisted task/state models, query-task values, the unified error and
//! outcome types, and typed configuration.

pub mod config;
pub mod error;
pub mod identity;
pub mod prelude;
pub mod query;
pub mod task;

pub use config::MatchingConfig;
pub use error::{EngineError, Outcome};
pub use identity::{TaskListIdentity, TaskListKind, TaskListType};
pub use query::{QueryCompletion, QueryCompletionType, QueryId, QueryPayload, QueryTaskInfo};
pub use task::{
    DeliveryState, InFlightTask, PollerInfo, TaskIdBlock, TaskInfo, TaskListState, WorkflowExecution,
};
