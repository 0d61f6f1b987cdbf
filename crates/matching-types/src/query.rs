//! Query-task value types.
//!
//! Query tasks are ephemeral: never persisted, matched the same way as a
//! normal task, and answered on a completion channel keyed by `QueryId`.
//! The completion channel itself is a runtime primitive (`tokio::oneshot`)
//! and lives in `matching-engine`, not here.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::task::WorkflowExecution;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryId(pub Uuid);

impl QueryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for QueryId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryPayload {
    pub query_type: String,
    pub args: Option<Value>,
}

/// Outcome of `RespondQueryTaskCompleted`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QueryCompletionType {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryCompletion {
    pub completion_type: QueryCompletionType,
    pub query_result: Option<Value>,
    pub error_message: Option<String>,
}

/// The non-persisted record describing one outstanding query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryTaskInfo {
    pub query_id: QueryId,
    pub workflow_execution: WorkflowExecution,
    pub payload: QueryPayload,
}
