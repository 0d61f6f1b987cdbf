//! In-memory `TaskStore` backend — development, testing, and single-process
//! deployments. Tasks are stored in a `BTreeMap` behind a `tokio::RwLock`
//! so they stay delivered in `task_id` order for `get_tasks`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use matching_types::{TaskInfo, TaskListIdentity, TaskListKind, TaskListState};

use crate::error::TaskStoreError;
use crate::traits::{Lease, TaskStore};

struct ListEntry {
    state: TaskListState,
    tasks: BTreeMap<i64, TaskInfo>,
}

/// In-memory `TaskStore`. Suitable for development and unit/integration
/// tests; not durable across process restarts.
#[derive(Clone)]
pub struct InMemoryTaskStore {
    lists: Arc<RwLock<HashMap<TaskListIdentity, ListEntry>>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self {
            lists: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    fn backend_name(&self) -> &'static str {
        "in-memory"
    }

    async fn lease_task_list(
        &self,
        id: &TaskListIdentity,
        kind: TaskListKind,
    ) -> Result<Lease, TaskStoreError> {
        let mut lists = self.lists.write().await;
        let entry = lists.entry(id.clone()).or_insert_with(|| ListEntry {
            state: TaskListState::fresh(kind, Utc::now()),
            tasks: BTreeMap::new(),
        });
        entry.state.range_id += 1;
        entry.state.last_updated = Utc::now();
        Ok(Lease {
            state: entry.state.clone(),
            cas_token: entry.state.range_id,
        })
    }

    async fn update_task_list(
        &self,
        id: &TaskListIdentity,
        state: TaskListState,
        cas_token: i64,
    ) -> Result<(), TaskStoreError> {
        let mut lists = self.lists.write().await;
        let entry = lists
            .get_mut(id)
            .ok_or_else(|| TaskStoreError::NotFound(id.to_string()))?;
        if entry.state.range_id != cas_token {
            return Err(TaskStoreError::ConditionFailed {
                expected: cas_token,
                observed: entry.state.range_id,
            });
        }
        entry.state = state;
        Ok(())
    }

    async fn create_tasks(
        &self,
        id: &TaskListIdentity,
        tasks: &[TaskInfo],
        cas_token: i64,
    ) -> Result<(), TaskStoreError> {
        let mut lists = self.lists.write().await;
        let entry = lists
            .get_mut(id)
            .ok_or_else(|| TaskStoreError::NotFound(id.to_string()))?;
        if entry.state.range_id != cas_token {
            return Err(TaskStoreError::ConditionFailed {
                expected: cas_token,
                observed: entry.state.range_id,
            });
        }
        for task in tasks {
            entry.tasks.insert(task.task_id, task.clone());
        }
        Ok(())
    }

    async fn get_tasks(
        &self,
        id: &TaskListIdentity,
        read_level: i64,
        batch_size: u32,
    ) -> Result<Vec<TaskInfo>, TaskStoreError> {
        let lists = self.lists.read().await;
        let Some(entry) = lists.get(id) else {
            return Ok(Vec::new());
        };
        Ok(entry
            .tasks
            .range((read_level + 1)..)
            .take(batch_size as usize)
            .map(|(_, t)| t.clone())
            .collect())
    }

    async fn complete_tasks_less_than(
        &self,
        id: &TaskListIdentity,
        ack_level: i64,
    ) -> Result<u64, TaskStoreError> {
        let mut lists = self.lists.write().await;
        let Some(entry) = lists.get_mut(id) else {
            return Ok(0);
        };
        let keep = entry.tasks.split_off(&(ack_level + 1));
        let removed = entry.tasks.len() as u64;
        entry.tasks = keep;
        Ok(removed)
    }

    async fn task_count(&self, id: &TaskListIdentity) -> Result<u64, TaskStoreError> {
        let lists = self.lists.read().await;
        Ok(lists.get(id).map(|e| e.tasks.len() as u64).unwrap_or(0))
    }
}
