//! `TaskListManager` — per-(domain, name, type, partition) actor owning the
//! reader/writer/ack/matcher/forwarder/rate-limiter/poller-registry stack
//! (spec §4.8).

use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use matching_store::TaskStore;
use matching_types::{
    EngineError, MatchingConfig, Outcome, QueryCompletion, QueryCompletionType, QueryId, QueryPayload,
    QueryTaskInfo, TaskInfo, TaskListIdentity, TaskListKind, WorkflowExecution,
};

use crate::ack_manager::AckManager;
use crate::cancellation::CancellationHandle;
use crate::forwarder::Forwarder;
use crate::matcher::{Matched, MatchedItem, Matcher};
use crate::poller_registry::PollerRegistry;
use crate::rate_limiter::RateLimiter;
use crate::reader::{TaskReader, TaskReaderConfig};
use crate::writer::{TaskWriter, TaskWriterConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ManagerState {
    Starting = 0,
    Running = 1,
    Draining = 2,
    Stopped = 3,
}

impl ManagerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ManagerState::Starting,
            1 => ManagerState::Running,
            2 => ManagerState::Draining,
            _ => ManagerState::Stopped,
        }
    }
}

/// What an `Add*Task` RPC carries before it becomes a persisted `TaskInfo`.
pub struct NewTask {
    pub domain_id: String,
    pub workflow_execution: WorkflowExecution,
    pub schedule_id: i64,
    pub schedule_to_start_timeout_seconds: u32,
}

#[derive(Debug, Clone)]
pub struct PolledTask {
    pub item: MatchedItem,
    pub forwarded_from: Option<String>,
}

pub struct DescribeResult {
    pub pollers: Vec<matching_types::PollerInfo>,
    pub backlog_count_hint: u64,
    pub read_level: i64,
    pub ack_level: i64,
}

pub struct TaskListManager {
    id: TaskListIdentity,
    kind: TaskListKind,
    store: Arc<dyn TaskStore>,
    ack: Arc<AckManager>,
    matcher: Arc<Matcher>,
    writer: TaskWriter,
    reader: TaskReader,
    forwarder: Option<Arc<Forwarder>>,
    local_rate_limiter: RateLimiter,
    forwarded_rate_limiter: RateLimiter,
    pollers: PollerRegistry,
    pending_queries: Mutex<std::collections::HashMap<QueryId, oneshot::Sender<QueryCompletion>>>,
    wake: Arc<Notify>,
    cancel: CancellationHandle,
    state: AtomicU8,
    last_activity_millis: AtomicI64,
    long_poll_timeout: Duration,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskListManager {
    pub async fn start(
        id: TaskListIdentity,
        kind: TaskListKind,
        store: Arc<dyn TaskStore>,
        config: &MatchingConfig,
        forwarder: Option<Arc<Forwarder>>,
    ) -> Result<Arc<Self>, EngineError> {
        let lease = store
            .lease_task_list(&id, kind)
            .await
            .map_err(|e| EngineError::Internal(e.to_string()))?;

        let ack = Arc::new(AckManager::new(lease.state.ack_level));
        let matcher = Arc::new(Matcher::new(config.reader_buffer_size));
        let cancel = CancellationHandle::new();
        let wake = Arc::new(Notify::new());

        let (writer, writer_handle) = TaskWriter::spawn(
            id.clone(),
            store.clone(),
            lease,
            TaskWriterConfig {
                range_size: config.range_size,
                batch_size: 100,
                flush_interval: Duration::from_millis(2),
            },
            cancel.clone(),
        );

        let (reader, reader_handle) = TaskReader::spawn(
            id.clone(),
            store.clone(),
            ack.clone(),
            matcher.clone(),
            wake.clone(),
            forwarder.clone(),
            TaskReaderConfig {
                batch_size: config.max_task_batch_size,
                poll_interval: Duration::from_millis(200),
                buffer_capacity: config.reader_buffer_size,
            },
            cancel.clone(),
        );

        let manager = Arc::new(Self {
            id: id.clone(),
            kind,
            store,
            ack,
            matcher,
            writer,
            reader,
            forwarder,
            local_rate_limiter: RateLimiter::new(config.max_tasks_per_second),
            forwarded_rate_limiter: RateLimiter::new(config.forwarder_max_rate_per_second),
            pollers: PollerRegistry::new(),
            pending_queries: Mutex::new(std::collections::HashMap::new()),
            wake,
            cancel,
            state: AtomicU8::new(ManagerState::Running as u8),
            last_activity_millis: AtomicI64::new(Utc::now().timestamp_millis()),
            long_poll_timeout: config.long_poll_expiration_interval,
            background: Mutex::new(vec![writer_handle, reader_handle]),
        });

        // The housekeeper and idle checker are self-governing: either may
        // itself call `stop()`, so neither handle is joined from there (that
        // would deadlock a task awaiting its own completion). They simply
        // exit on their own once `cancel` fires.
        tokio::spawn(run_ack_housekeeper(manager.clone(), config.ack_flush_interval));
        tokio::spawn(run_idle_checker(manager.clone(), idle_threshold_for(kind, config)));

        info!(task_list = %id, "task list manager started");
        Ok(manager)
    }

    pub fn identity(&self) -> &TaskListIdentity {
        &self.id
    }

    pub fn state(&self) -> ManagerState {
        ManagerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn touch(&self) {
        self.last_activity_millis
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        let now = Utc::now().timestamp_millis();
        let last = self.last_activity_millis.load(Ordering::Relaxed);
        Duration::from_millis((now - last).max(0) as u64)
    }

    /// Spec §4.6 step-by-step Add path: persist (durability), wake the
    /// reader so it hands the task to the `Matcher` immediately, and let
    /// the reader's own sync/forward/buffer resolution happen from there.
    pub async fn add_task(&self, new_task: NewTask) -> Outcome<()> {
        if self.state() == ManagerState::Stopped {
            return Outcome::Conflict { observed_range: -1 };
        }
        self.touch();
        let result: Result<(), EngineError> = async {
            self.writer
                .append(move |task_id| TaskInfo {
                    task_id,
                    domain_id: new_task.domain_id,
                    workflow_execution: new_task.workflow_execution,
                    schedule_id: new_task.schedule_id,
                    schedule_to_start_timeout_seconds: new_task.schedule_to_start_timeout_seconds,
                    created_time: Utc::now(),
                })
                .await?;
            self.wake.notify_one();
            Ok(())
        }
        .await;
        if matches!(result, Err(EngineError::OwnershipLost { .. })) {
            self.stop().await;
        }
        result.into()
    }

    /// Spec §4.6 Poll algorithm, with the non-root escalation of spec §4.7:
    /// race the local `Matcher` against a forwarded poll to the parent.
    pub async fn poll(
        &self,
        poller_identity: String,
        rate_hint: Option<f64>,
        forwarded_from: Option<String>,
    ) -> Outcome<Option<PolledTask>> {
        if self.kind == TaskListKind::Sticky && forwarded_from.is_some() {
            return Outcome::Invalid {
                reason: "sticky task lists never accept forwarded polls".to_string(),
            };
        }
        self.touch();
        if let Some(hint) = rate_hint {
            // A poller's `MaxTasksPerSecond` hint overrides the task list's
            // local dispatch rate (spec §6 Configuration: "per-poll hint
            // override"); it never touches the forwarded-task bucket.
            self.local_rate_limiter.set_rate(hint);
        }
        let poll_cancel = self.pollers.register(poller_identity.clone(), rate_hint, Utc::now());
        let combined = self.cancel.clone();

        let matched = tokio::select! {
            biased;
            _ = combined.cancelled() => None,
            _ = poll_cancel.cancelled() => None,
            result = self.race_local_and_forwarded(&forwarded_from) => result,
        };
        self.pollers.deregister(&poller_identity);

        match matched {
            None => Outcome::ok(None),
            Some(matched) => {
                let limiter = if matched.forwarded_from.is_some() {
                    &self.forwarded_rate_limiter
                } else {
                    &self.local_rate_limiter
                };
                if !limiter.try_acquire() {
                    let retry_after_ms = limiter.retry_after().as_millis() as u64;
                    match matched.item {
                        MatchedItem::Task(task) => self.matcher.buffer_only(task),
                        MatchedItem::Query(query) => self.matcher.buffer_query(query),
                    }
                    return Outcome::Throttled { retry_after_ms };
                }
                if let MatchedItem::Task(task) = &matched.item {
                    self.ack.mark_delivered(task.task_id, poller_identity, Utc::now());
                }
                Outcome::ok(Some(PolledTask {
                    item: matched.item,
                    forwarded_from: matched.forwarded_from,
                }))
            }
        }
    }

    async fn race_local_and_forwarded(&self, forwarded_from: &Option<String>) -> Option<Matched> {
        match (&self.forwarder, forwarded_from) {
            // Already-forwarded polls must not forward again (cycle guard).
            (Some(forwarder), None) => {
                tokio::select! {
                    m = self.matcher.poll(self.long_poll_timeout, &self.cancel) => m,
                    f = forwarder.try_forward_poll(self.long_poll_timeout) => {
                        match f {
                            Some(Ok(Some(item))) => Some(Matched { item, forwarded_from: None }),
                            Some(Ok(None)) | Some(Err(_)) => None,
                            // No forward budget available right now; the local
                            // select arm above was cancelled, so wait out the
                            // full deadline locally instead of returning empty early.
                            None => self.matcher.poll(self.long_poll_timeout, &self.cancel).await,
                        }
                    }
                }
            }
            _ => self.matcher.poll(self.long_poll_timeout, &self.cancel).await,
        }
    }

    pub async fn cancel_outstanding_poll(&self, poller_identity: &str) -> Outcome<()> {
        if self.pollers.cancel(poller_identity) {
            Outcome::ok(())
        } else {
            Outcome::Invalid {
                reason: format!("no outstanding poll registered for poller {poller_identity}"),
            }
        }
    }

    pub async fn query_workflow(
        &self,
        workflow_execution: WorkflowExecution,
        payload: QueryPayload,
        deadline: Duration,
    ) -> Outcome<QueryCompletion> {
        self.touch();
        let query_id = QueryId::new();
        let (tx, rx) = oneshot::channel();
        self.pending_queries.lock().unwrap().insert(query_id, tx);

        let query = QueryTaskInfo {
            query_id,
            workflow_execution,
            payload,
        };

        let delivered = if let Some(forwarder) = &self.forwarder {
            if self.matcher.try_deliver_sync(MatchedItem::Query(query.clone()), None) {
                true
            } else {
                matches!(forwarder.try_forward_query(query.clone()).await, Ok(true))
            }
        } else {
            self.matcher.try_deliver_sync(MatchedItem::Query(query.clone()), None)
        };
        if !delivered {
            self.matcher.buffer_query(query);
        }

        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(completion)) => match completion.completion_type {
                QueryCompletionType::Failed => {
                    let message = completion.error_message.clone().unwrap_or_default();
                    Outcome::from(Err(EngineError::QueryFailed(message)))
                }
                QueryCompletionType::Completed => Outcome::ok(completion),
            },
            Ok(Err(_)) | Err(_) => {
                self.pending_queries.lock().unwrap().remove(&query_id);
                Outcome::Invalid {
                    reason: "deadline exceeded waiting for query completion".to_string(),
                }
            }
        }
    }

    pub async fn respond_query_completed(&self, query_id: QueryId, completion: QueryCompletion) -> Outcome<()> {
        match self.pending_queries.lock().unwrap().remove(&query_id) {
            Some(tx) => {
                let _ = tx.send(completion);
                Outcome::ok(())
            }
            None => Outcome::Invalid {
                reason: "no outstanding query with that id".to_string(),
            },
        }
    }

    /// Entry point for a child partition's forwarded task add: tries a
    /// synchronous hand-off against this manager's own waiting pollers only,
    /// never buffers (the forwarding child still owns durability for it).
    pub fn matcher_try_deliver_task(&self, task: TaskInfo, forwarded_from: Option<String>) -> bool {
        self.matcher.try_deliver_sync(MatchedItem::Task(task), forwarded_from)
    }

    pub fn matcher_try_deliver_query(&self, query: matching_types::QueryTaskInfo, forwarded_from: Option<String>) -> bool {
        self.matcher
            .try_deliver_sync(MatchedItem::Query(query), forwarded_from)
    }

    /// Entry point for a child partition's forwarded poll: waits on this
    /// manager's own `Matcher` up to `deadline`, without forwarding further
    /// up the tree (that escalation already happened at the child).
    pub async fn matcher_poll(&self, deadline: Duration) -> Option<MatchedItem> {
        self.matcher
            .poll(deadline, &self.cancel)
            .await
            .map(|matched| matched.item)
    }

    pub fn ack(&self, task_id: i64) {
        self.ack.ack(task_id);
    }

    /// Returns the task to `Buffered` and hands it straight back to the
    /// `Matcher` so it is redelivered to the next poller rather than waiting
    /// for the reader to reload it from storage.
    pub fn nack(&self, task_id: i64) {
        if let Some(task) = self.ack.nack(task_id) {
            self.redeliver(task);
        }
    }

    /// Hand an already-persisted task back to the `Matcher`: try an
    /// already-waiting poller first (the same priority order as a fresh
    /// offer), falling back to the local buffer only if nobody is waiting.
    fn redeliver(&self, task: TaskInfo) {
        if !self.matcher.try_deliver_sync(MatchedItem::Task(task.clone()), None) {
            self.matcher.buffer_only(task);
        }
    }

    pub fn describe(&self) -> DescribeResult {
        DescribeResult {
            pollers: self.pollers.snapshot(),
            backlog_count_hint: self.matcher.backlog_hint() as u64 + self.ack.outstanding_count() as u64,
            read_level: self.reader.read_level(),
            ack_level: self.ack.ack_level(),
        }
    }

    pub async fn shutdown(self: &Arc<Self>) {
        self.state.store(ManagerState::Draining as u8, Ordering::Release);
        let _ = self.writer.flush_ack_level(self.ack.ack_level()).await;
        self.stop().await;
    }

    async fn stop(&self) {
        self.state.store(ManagerState::Stopped as u8, Ordering::Release);
        self.cancel.cancel();
        let handles = std::mem::take(&mut *self.background.lock().unwrap());
        for handle in handles {
            let _ = handle.await;
        }
    }
}

fn idle_threshold_for(kind: TaskListKind, config: &MatchingConfig) -> Duration {
    match kind {
        TaskListKind::Sticky => config.sticky_poller_timeout,
        TaskListKind::Normal => config.idle_tasklist_check_interval,
    }
}

async fn run_ack_housekeeper(manager: Arc<TaskListManager>, interval: Duration) {
    loop {
        tokio::select! {
            _ = manager.cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
        if manager.state() == ManagerState::Stopped {
            return;
        }
        let expired = manager.ack.expire_deliveries(Utc::now());
        for task in expired {
            warn!(task_list = %manager.id, task_id = task.task_id, "delivery TTL elapsed, implicitly nacked");
            manager.redeliver(task);
        }
        let ack_level = manager.ack.ack_level();
        if let Err(err) = manager.writer.flush_ack_level(ack_level).await {
            if matches!(err, EngineError::OwnershipLost { .. }) {
                manager.stop().await;
                return;
            }
        }
        if ack_level > 0 {
            if let Err(err) = manager.store.complete_tasks_less_than(&manager.id, ack_level).await {
                warn!(task_list = %manager.id, %err, "failed to trim acked backlog");
            }
        }
    }
}

async fn run_idle_checker(manager: Arc<TaskListManager>, threshold: Duration) {
    loop {
        tokio::select! {
            _ = manager.cancel.cancelled() => return,
            _ = tokio::time::sleep(threshold / 4 + Duration::from_millis(1)) => {}
        }
        if manager.state() == ManagerState::Stopped {
            return;
        }
        if manager.idle_for() >= threshold && manager.pollers.is_empty() {
            info!(task_list = %manager.id, "task list manager idle past threshold, draining");
            manager.shutdown().await;
            return;
        }
    }
}
