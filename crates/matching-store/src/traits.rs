//! The `TaskStore` trait: the thin interface the core consumes over task
//! rows and task-list metadata rows (spec §4.1). Implementations must be
//! `Send + Sync` for use across async contexts.

use async_trait::async_trait;
use matching_types::{TaskInfo, TaskListIdentity, TaskListKind, TaskListState};

use crate::error::TaskStoreError;

/// A lease acquisition result: the current state plus the CAS token to
/// present on the next write. The token and `state.range_id` are always
/// equal immediately after a successful lease or update — kept as separate
/// fields so call sites read like the spec's `(state, cas-token)` pair
/// rather than reaching into `state.range_id` implicitly.
#[derive(Debug, Clone)]
pub struct Lease {
    pub state: TaskListState,
    pub cas_token: i64,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Acquire or re-acquire ownership of a task list, bumping `RangeID`.
    /// Creates the row with a fresh state if none exists.
    async fn lease_task_list(
        &self,
        id: &TaskListIdentity,
        kind: TaskListKind,
    ) -> Result<Lease, TaskStoreError>;

    /// CAS update of the task-list metadata row. Fails with
    /// `ConditionFailed` if `cas_token` no longer matches the stored
    /// `RangeID`.
    async fn update_task_list(
        &self,
        id: &TaskListIdentity,
        state: TaskListState,
        cas_token: i64,
    ) -> Result<(), TaskStoreError>;

    /// Append new task rows, rejecting if `cas_token` is stale (the writer
    /// no longer owns the list it is writing into).
    async fn create_tasks(
        &self,
        id: &TaskListIdentity,
        tasks: &[TaskInfo],
        cas_token: i64,
    ) -> Result<(), TaskStoreError>;

    /// Page unacked tasks starting at `read_level` (exclusive), up to
    /// `batch_size` rows, ordered by `task_id`.
    async fn get_tasks(
        &self,
        id: &TaskListIdentity,
        read_level: i64,
        batch_size: u32,
    ) -> Result<Vec<TaskInfo>, TaskStoreError>;

    /// Delete every task row with `task_id <= ack_level`.
    async fn complete_tasks_less_than(
        &self,
        id: &TaskListIdentity,
        ack_level: i64,
    ) -> Result<u64, TaskStoreError>;

    /// Count of task rows currently stored for this list (backlog hint).
    async fn task_count(&self, id: &TaskListIdentity) -> Result<u64, TaskStoreError>;
}
