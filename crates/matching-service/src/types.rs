//! Request/response DTOs for the RPC surface in spec §6. One struct per
//! request and response shape named after the RPC it belongs to.

use serde::{Deserialize, Serialize};

use matching_types::{
    PollerInfo, QueryCompletion, QueryId, QueryPayload, TaskInfo, TaskListKind, TaskListType,
    WorkflowExecution,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddTaskRequest {
    pub domain_id: String,
    pub task_list: String,
    pub task_list_type: TaskListType,
    pub task_list_kind: TaskListKind,
    pub workflow_execution: WorkflowExecution,
    pub schedule_id: i64,
    pub schedule_to_start_timeout_seconds: u32,
    /// Set by a child partition escalating this add to its parent; absent
    /// for a caller-originated request.
    pub forwarded_from: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskListMetadata {
    pub max_tasks_per_second: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollRequest {
    pub domain_id: String,
    pub task_list: String,
    pub task_list_type: TaskListType,
    pub task_list_kind: TaskListKind,
    pub poller_id: String,
    pub metadata: TaskListMetadata,
    pub forwarded_from: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PolledTaskResponse {
    Task(TaskInfo),
    Query(matching_types::QueryTaskInfo),
    Empty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryWorkflowRequest {
    pub domain_id: String,
    pub task_list: String,
    pub task_list_kind: TaskListKind,
    pub workflow_execution: WorkflowExecution,
    pub query: QueryPayload,
    pub forwarded_from: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RespondQueryTaskCompletedRequest {
    pub domain_id: String,
    pub task_list: String,
    pub task_list_kind: TaskListKind,
    pub query_id: QueryId,
    pub completion: QueryCompletion,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelOutstandingPollRequest {
    pub domain_id: String,
    pub task_list: String,
    pub task_list_type: TaskListType,
    pub task_list_kind: TaskListKind,
    pub poller_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescribeTaskListRequest {
    pub domain_id: String,
    pub task_list: String,
    pub task_list_type: TaskListType,
    pub task_list_kind: TaskListKind,
    pub include_task_list_status: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskListStatus {
    pub backlog_count_hint: u64,
    pub read_level: i64,
    pub ack_level: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescribeTaskListResponse {
    pub pollers: Vec<PollerInfo>,
    pub task_list_status: Option<TaskListStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListTaskListPartitionsRequest {
    pub domain_id: String,
    pub task_list: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskListPartition {
    pub key: String,
    pub owner_host_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListTaskListPartitionsResponse {
    pub activity_task_list_partitions: Vec<TaskListPartition>,
    pub decision_task_list_partitions: Vec<TaskListPartition>,
}
