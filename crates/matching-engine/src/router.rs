//! `EngineRouter` — the crate's entry point: owns the
//! `TaskListIdentity -> TaskListManager` registry, creates managers on
//! demand, and wires non-root managers' `Forwarder` to their parent
//! partition through an in-process `ParentClient` (spec §4.7, §4.8).
//!
//! The map itself follows the same `Arc<RwLock<HashMap>>` shape the rest of
//! this corpus uses for its in-memory registries: a single lock, held only
//! long enough to look up or insert an `Arc<TaskListManager>`, never across
//! the manager's own async work.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use matching_store::TaskStore;
use matching_types::{
    EngineError, MatchingConfig, Outcome, QueryCompletion, QueryId, QueryPayload, TaskListIdentity,
    TaskListKind, WorkflowExecution,
};

use crate::forwarder::{Forwarder, ForwarderConfig, ParentClient};
use crate::manager::{DescribeResult, ManagerState, NewTask, PolledTask, TaskListManager};
use crate::matcher::MatchedItem;

/// In-process implementation of `ParentClient`: forwards by looking the
/// parent partition's manager back up through the router rather than
/// holding a direct reference, so managers never point at each other.
struct RouterParentClient {
    router: Arc<RouterInner>,
    parent_id: TaskListIdentity,
}

#[async_trait]
impl ParentClient for RouterParentClient {
    async fn forward_add_task(
        &self,
        task: matching_types::TaskInfo,
        forwarded_from: String,
    ) -> Result<bool, EngineError> {
        let parent = self
            .router
            .get_or_create(self.parent_id.clone(), TaskListKind::Normal)
            .await?;
        Ok(parent.matcher_try_deliver_task(task, Some(forwarded_from)))
    }

    async fn forward_add_query(
        &self,
        query: matching_types::QueryTaskInfo,
        forwarded_from: String,
    ) -> Result<bool, EngineError> {
        let parent = self
            .router
            .get_or_create(self.parent_id.clone(), TaskListKind::Normal)
            .await?;
        Ok(parent.matcher_try_deliver_query(query, Some(forwarded_from)))
    }

    async fn forward_poll(
        &self,
        _forwarded_from: String,
        deadline: Duration,
    ) -> Result<Option<MatchedItem>, EngineError> {
        let parent = self
            .router
            .get_or_create(self.parent_id.clone(), TaskListKind::Normal)
            .await?;
        Ok(parent.matcher_poll(deadline).await)
    }
}

struct RouterInner {
    store: Arc<dyn TaskStore>,
    config: MatchingConfig,
    managers: RwLock<HashMap<TaskListIdentity, Arc<TaskListManager>>>,
}

impl RouterInner {
    async fn get_or_create(
        self: &Arc<Self>,
        id: TaskListIdentity,
        kind: TaskListKind,
    ) -> Result<Arc<TaskListManager>, EngineError> {
        if let Some(manager) = self.managers.read().await.get(&id) {
            if manager.state() != ManagerState::Stopped {
                return Ok(manager.clone());
            }
        }

        let mut managers = self.managers.write().await;
        if let Some(manager) = managers.get(&id) {
            if manager.state() != ManagerState::Stopped {
                return Ok(manager.clone());
            }
        }

        let forwarder = if id.is_root() {
            None
        } else {
            let parent_partition = id.partition / self.config.forwarder_max_children_per_node.max(1);
            let parent_id = id.child(parent_partition);
            let parent_client: Arc<dyn ParentClient> = Arc::new(RouterParentClient {
                router: self.clone(),
                parent_id,
            });
            Some(Arc::new(Forwarder::new(
                parent_client,
                id.wire_name(),
                ForwarderConfig {
                    max_outstanding_tasks: self.config.forwarder_max_outstanding_tasks,
                    max_outstanding_polls: self.config.forwarder_max_outstanding_polls,
                    max_rate_per_second: self.config.forwarder_max_rate_per_second,
                },
            )))
        };

        let manager =
            TaskListManager::start(id.clone(), kind, self.store.clone(), &self.config, forwarder).await?;
        managers.insert(id, manager.clone());
        Ok(manager)
    }

    /// Periodic sweep dropping `Stopped` managers from the map, keeping the
    /// router's own footprint bounded by active partitions rather than every
    /// partition ever touched.
    async fn sweep_stopped(&self) {
        let mut managers = self.managers.write().await;
        let before = managers.len();
        managers.retain(|_, m| m.state() != ManagerState::Stopped);
        let removed = before - managers.len();
        if removed > 0 {
            info!(removed, "router reclaimed stopped task list managers");
        }
    }
}

/// Entry point for callers outside this crate (typically `matching-service`).
/// Cloning is cheap; all state lives behind the inner `Arc`.
#[derive(Clone)]
pub struct EngineRouter {
    inner: Arc<RouterInner>,
}

/// Only ever reports this process, since every partition a router can
/// actually own lives behind its own in-process `EngineRouter`.
fn local_host_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

impl EngineRouter {
    pub fn new(store: Arc<dyn TaskStore>, config: MatchingConfig) -> Self {
        let inner = Arc::new(RouterInner {
            store,
            config,
            managers: RwLock::new(HashMap::new()),
        });
        let sweeper = inner.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(30)).await;
                sweeper.sweep_stopped().await;
            }
        });
        Self { inner }
    }

    pub async fn add_task(&self, id: TaskListIdentity, kind: TaskListKind, new_task: NewTask) -> Outcome<()> {
        match self.inner.get_or_create(id, kind).await {
            Ok(manager) => manager.add_task(new_task).await,
            Err(err) => Outcome::from(Err(err)),
        }
    }

    pub async fn poll(
        &self,
        id: TaskListIdentity,
        kind: TaskListKind,
        poller_identity: String,
        rate_hint: Option<f64>,
    ) -> Outcome<Option<PolledTask>> {
        match self.inner.get_or_create(id, kind).await {
            Ok(manager) => manager.poll(poller_identity, rate_hint, None).await,
            Err(err) => Outcome::from(Err(err)),
        }
    }

    pub async fn query_workflow(
        &self,
        id: TaskListIdentity,
        kind: TaskListKind,
        workflow_execution: WorkflowExecution,
        payload: QueryPayload,
        deadline: Duration,
    ) -> Outcome<QueryCompletion> {
        match self.inner.get_or_create(id, kind).await {
            Ok(manager) => manager.query_workflow(workflow_execution, payload, deadline).await,
            Err(err) => Outcome::from(Err(err)),
        }
    }

    pub async fn respond_query_completed(
        &self,
        id: TaskListIdentity,
        kind: TaskListKind,
        query_id: QueryId,
        completion: QueryCompletion,
    ) -> Outcome<()> {
        match self.inner.get_or_create(id, kind).await {
            Ok(manager) => manager.respond_query_completed(query_id, completion).await,
            Err(err) => Outcome::from(Err(err)),
        }
    }

    pub async fn cancel_outstanding_poll(
        &self,
        id: TaskListIdentity,
        kind: TaskListKind,
        poller_identity: &str,
    ) -> Outcome<()> {
        match self.inner.get_or_create(id, kind).await {
            Ok(manager) => manager.cancel_outstanding_poll(poller_identity).await,
            Err(err) => Outcome::from(Err(err)),
        }
    }

    pub async fn ack(&self, id: TaskListIdentity, kind: TaskListKind, task_id: i64) -> Outcome<()> {
        match self.inner.get_or_create(id, kind).await {
            Ok(manager) => {
                manager.ack(task_id);
                Outcome::ok(())
            }
            Err(err) => Outcome::from(Err(err)),
        }
    }

    pub async fn nack(&self, id: TaskListIdentity, kind: TaskListKind, task_id: i64) -> Outcome<()> {
        match self.inner.get_or_create(id, kind).await {
            Ok(manager) => {
                manager.nack(task_id);
                Outcome::ok(())
            }
            Err(err) => Outcome::from(Err(err)),
        }
    }

    pub async fn describe_task_list(&self, id: TaskListIdentity, kind: TaskListKind) -> Outcome<DescribeResult> {
        match self.inner.get_or_create(id, kind).await {
            Ok(manager) => Outcome::ok(manager.describe()),
            Err(err) => Outcome::from(Err(err)),
        }
    }

    /// Synthesizes partition metadata for a task list root from the
    /// configured partition count (spec §4.9: "returns synthetic partition
    /// metadata without instantiating every partition"). Only the manager
    /// map is consulted, never created from, so asking about a task list
    /// with no traffic yet does not spin up `NumTaskListReadPartitions`
    /// managers just to answer the query.
    pub async fn list_task_list_partitions(&self, root: &TaskListIdentity) -> Vec<(TaskListIdentity, Option<String>)> {
        let partition_count = self.inner.config.num_task_list_read_partitions.max(1);
        let managers = self.inner.managers.read().await;
        (0..partition_count)
            .map(|partition| {
                let id = root.child(partition);
                let owner = managers
                    .get(&id)
                    .filter(|m| m.state() != ManagerState::Stopped)
                    .map(|_| local_host_name());
                (id, owner)
            })
            .collect()
    }

    pub async fn shutdown_all(&self) {
        let managers: Vec<Arc<TaskListManager>> = self.inner.managers.read().await.values().cloned().collect();
        for manager in managers {
            manager.shutdown().await;
        }
    }
}
