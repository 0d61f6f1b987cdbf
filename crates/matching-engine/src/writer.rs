//! `TaskWriter` — monotonic TaskID allocation and batched persistence
//! (spec §4.2).
//!
//! Owns a pending queue of add-requests, draining it on a configurable
//! batch size or flush interval so a burst of concurrent `Add` calls costs
//! one `CreateTasks` round-trip instead of one each, while a single add
//! under light load still flushes within one `flush_interval` tick.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};

use matching_store::{Lease, TaskStore};
use matching_types::{EngineError, TaskIdBlock, TaskInfo, TaskListIdentity, TaskListState};

use crate::cancellation::CancellationHandle;

type BuildFn = Box<dyn FnOnce(i64) -> TaskInfo + Send + 'static>;

struct PendingAdd {
    build: BuildFn,
    respond: oneshot::Sender<Result<TaskInfo, EngineError>>,
}

/// `TaskWriter` is the sole writer of the task-list metadata row (spec §5:
/// "each TaskListManager has a single writer for its TaskListState row"), so
/// ack-level flushes ride the same queue as appends instead of opening a
/// second writer that would race it on `RangeID`.
enum WriterMsg {
    Append(PendingAdd),
    FlushAck {
        ack_level: i64,
        respond: oneshot::Sender<Result<(), EngineError>>,
    },
}

/// Handle held by `TaskListManager`; the allocation/flush loop runs in a
/// spawned background task.
pub struct TaskWriter {
    queue_tx: mpsc::Sender<WriterMsg>,
    fatal: Arc<Mutex<Option<EngineError>>>,
}

pub struct TaskWriterConfig {
    pub range_size: i64,
    pub batch_size: usize,
    pub flush_interval: Duration,
}

impl TaskWriter {
    /// Spawns the background batching loop and returns the handle plus its
    /// `JoinHandle` (owned by the caller for lifecycle management).
    pub fn spawn(
        id: TaskListIdentity,
        store: Arc<dyn TaskStore>,
        lease: Lease,
        config: TaskWriterConfig,
        cancel: CancellationHandle,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let (queue_tx, queue_rx) = mpsc::channel(1024);
        let fatal = Arc::new(Mutex::new(None));
        let loop_fatal = fatal.clone();
        let handle = tokio::spawn(async move {
            run_writer_loop(id, store, lease, config, queue_rx, loop_fatal, cancel).await;
        });
        (Self { queue_tx, fatal }, handle)
    }

    /// Allocate an id and persist a task built from it. `build` receives the
    /// freshly allocated `TaskID`.
    pub async fn append(
        &self,
        build: impl FnOnce(i64) -> TaskInfo + Send + 'static,
    ) -> Result<TaskInfo, EngineError> {
        if let Some(err) = self.fatal.lock().unwrap().clone() {
            return Err(err);
        }
        let (respond, rx) = oneshot::channel();
        self.queue_tx
            .send(WriterMsg::Append(PendingAdd {
                build: Box::new(build),
                respond,
            }))
            .await
            .map_err(|_| EngineError::Internal("task writer loop stopped".to_string()))?;
        rx.await.map_err(|_| EngineError::Internal("task writer dropped response".to_string()))?
    }

    /// Persist a new `ack_level` on the task-list metadata row, called
    /// periodically by the `AckManager` housekeeper. Routed through the
    /// writer's own loop so it shares the one CAS token in flight.
    pub async fn flush_ack_level(&self, ack_level: i64) -> Result<(), EngineError> {
        if let Some(err) = self.fatal.lock().unwrap().clone() {
            return Err(err);
        }
        let (respond, rx) = oneshot::channel();
        self.queue_tx
            .send(WriterMsg::FlushAck { ack_level, respond })
            .await
            .map_err(|_| EngineError::Internal("task writer loop stopped".to_string()))?;
        rx.await.map_err(|_| EngineError::Internal("task writer dropped response".to_string()))?
    }

    pub fn is_fatally_stopped(&self) -> bool {
        self.fatal.lock().unwrap().is_some()
    }
}

async fn run_writer_loop(
    id: TaskListIdentity,
    store: Arc<dyn TaskStore>,
    lease: Lease,
    config: TaskWriterConfig,
    mut queue_rx: mpsc::Receiver<WriterMsg>,
    fatal: Arc<Mutex<Option<EngineError>>>,
    cancel: CancellationHandle,
) {
    let mut state = lease.state;
    let mut cas_token = lease.cas_token;
    let mut block = TaskIdBlock::empty_at(state.ack_level);

    loop {
        let first = tokio::select! {
            _ = cancel.cancelled() => return,
            item = queue_rx.recv() => match item {
                Some(item) => item,
                None => return,
            },
        };

        let first = match first {
            WriterMsg::FlushAck { ack_level, respond } => {
                let result = flush_ack(&id, &store, &mut state, cas_token, ack_level).await;
                if let Err(err) = &result {
                    if matches!(err, EngineError::OwnershipLost { .. }) {
                        let _ = respond.send(result);
                        *fatal.lock().unwrap() = Some(err.clone());
                        return;
                    }
                }
                let _ = respond.send(result);
                continue;
            }
            WriterMsg::Append(p) => p,
        };

        let mut batch = vec![first];
        let mut flushes = Vec::new();
        let deadline = tokio::time::sleep(config.flush_interval);
        tokio::pin!(deadline);
        while batch.len() < config.batch_size {
            tokio::select! {
                biased;
                item = queue_rx.recv() => match item {
                    Some(WriterMsg::Append(p)) => batch.push(p),
                    Some(WriterMsg::FlushAck { ack_level, respond }) => flushes.push((ack_level, respond)),
                    None => break,
                },
                _ = &mut deadline => break,
            }
        }

        let mut tasks = Vec::with_capacity(batch.len());
        let mut responders = Vec::with_capacity(batch.len());
        let mut alloc_err = None;
        for pending in batch {
            if block.is_exhausted() {
                match reserve_next_block(&id, &store, &mut state, cas_token, config.range_size).await {
                    Ok(new_token) => {
                        cas_token = new_token;
                        block = TaskIdBlock {
                            start_id: (cas_token - 1) * config.range_size,
                            end_id: cas_token * config.range_size,
                        };
                    }
                    Err(err) => {
                        alloc_err = Some(err);
                        responders.push((pending.respond, None));
                        continue;
                    }
                }
            }
            let task_id = block.take_next().expect("block refilled above");
            tasks.push((pending.build)(task_id));
            responders.push((pending.respond, Some(tasks.len() - 1)));
        }

        let mut lost_ownership = false;
        if !tasks.is_empty() {
            match store.create_tasks(&id, &tasks, cas_token).await {
                Ok(()) => {
                    for (respond, idx) in responders {
                        if let Some(idx) = idx {
                            let _ = respond.send(Ok(tasks[idx].clone()));
                        }
                    }
                }
                Err(err) => {
                    let engine_err = map_store_error(err);
                    lost_ownership = matches!(engine_err, EngineError::OwnershipLost { .. });
                    for (respond, idx) in responders {
                        if idx.is_some() {
                            let _ = respond.send(Err(engine_err.clone()));
                        }
                    }
                    if lost_ownership {
                        error!(task_list = %id, "task writer lost ownership, stopping");
                    }
                }
            }
        } else if let Some(err) = alloc_err {
            lost_ownership = matches!(err, EngineError::OwnershipLost { .. });
            for (respond, _) in responders {
                let _ = respond.send(Err(err.clone()));
            }
        }

        for (ack_level, respond) in flushes {
            if lost_ownership {
                let _ = respond.send(Err(EngineError::OwnershipLost {
                    observed_range_id: state.range_id,
                }));
                continue;
            }
            let result = flush_ack(&id, &store, &mut state, cas_token, ack_level).await;
            if matches!(result, Err(EngineError::OwnershipLost { .. })) {
                lost_ownership = true;
            }
            let _ = respond.send(result);
        }

        if lost_ownership {
            *fatal.lock().unwrap() = Some(EngineError::OwnershipLost {
                observed_range_id: state.range_id,
            });
            return;
        }
    }
}

async fn flush_ack(
    id: &TaskListIdentity,
    store: &Arc<dyn TaskStore>,
    state: &mut TaskListState,
    cas_token: i64,
    ack_level: i64,
) -> Result<(), EngineError> {
    state.ack_level = ack_level;
    state.last_updated = Utc::now();
    store
        .update_task_list(id, state.clone(), cas_token)
        .await
        .map_err(map_store_error)
}

async fn reserve_next_block(
    id: &TaskListIdentity,
    store: &Arc<dyn TaskStore>,
    state: &mut TaskListState,
    cas_token: i64,
    range_size: i64,
) -> Result<i64, EngineError> {
    let next_range_id = cas_token + 1;
    state.range_id = next_range_id;
    state.last_updated = Utc::now();
    let mut attempt = 0u32;
    loop {
        match store.update_task_list(id, state.clone(), cas_token).await {
            Ok(()) => return Ok(next_range_id),
            Err(matching_store::TaskStoreError::ConditionFailed { observed, .. }) => {
                return Err(EngineError::OwnershipLost {
                    observed_range_id: observed,
                });
            }
            Err(matching_store::TaskStoreError::Throttled { retry_after_ms }) => {
                attempt += 1;
                if attempt > 5 {
                    return Err(EngineError::Throttled { retry_after_ms });
                }
                warn!(task_list = %id, attempt, "task writer throttled reserving next block");
                tokio::time::sleep(Duration::from_millis(retry_after_ms)).await;
            }
            Err(err) => return Err(EngineError::Internal(err.to_string())),
        }
        if range_size <= 0 {
            return Err(EngineError::Internal("range_size must be positive".to_string()));
        }
    }
}

fn map_store_error(err: matching_store::TaskStoreError) -> EngineError {
    match err {
        matching_store::TaskStoreError::ConditionFailed { observed, .. } => {
            EngineError::OwnershipLost {
                observed_range_id: observed,
            }
        }
        matching_store::TaskStoreError::Throttled { retry_after_ms } => {
            EngineError::Throttled { retry_after_ms }
        }
        matching_store::TaskStoreError::NotFound(what) => EngineError::NotFound(what),
        matching_store::TaskStoreError::Timeout(msg) => {
            EngineError::Internal(format!("storage timeout: {msg}"))
        }
        matching_store::TaskStoreError::Internal(msg) => EngineError::Internal(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matching_store::InMemoryTaskStore;
    use matching_types::{TaskListKind, TaskListType, WorkflowExecution};

    fn build(schedule_id: i64) -> impl FnOnce(i64) -> TaskInfo {
        move |task_id| TaskInfo {
            task_id,
            domain_id: "d1".to_string(),
            workflow_execution: WorkflowExecution {
                workflow_id: "wf".to_string(),
                run_id: "run".to_string(),
            },
            schedule_id,
            schedule_to_start_timeout_seconds: 30,
            created_time: Utc::now(),
        }
    }

    #[tokio::test]
    async fn allocates_monotonic_ids_across_batches() {
        let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        let id = TaskListIdentity::root("d1", "tl", TaskListType::Activity);
        let lease = store.lease_task_list(&id, TaskListKind::Normal).await.unwrap();
        let cancel = CancellationHandle::new();
        let (writer, _handle) = TaskWriter::spawn(
            id.clone(),
            store.clone(),
            lease,
            TaskWriterConfig {
                range_size: 4,
                batch_size: 10,
                flush_interval: Duration::from_millis(5),
            },
            cancel.clone(),
        );

        let a = writer.append(build(1)).await.unwrap();
        let b = writer.append(build(2)).await.unwrap();
        assert!(b.task_id > a.task_id);

        // drain the block (size 4, already used 2) to force a block reservation.
        let c = writer.append(build(3)).await.unwrap();
        let d = writer.append(build(4)).await.unwrap();
        let e = writer.append(build(5)).await.unwrap();
        assert!(e.task_id > d.task_id && d.task_id > c.task_id);
        cancel.cancel();
    }

    #[tokio::test]
    async fn ownership_loss_is_surfaced_and_sticky() {
        let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        let id = TaskListIdentity::root("d1", "tl", TaskListType::Activity);
        let lease = store.lease_task_list(&id, TaskListKind::Normal).await.unwrap();
        // A second lease bumps range_id, invalidating the first holder's cas_token.
        let _ = store.lease_task_list(&id, TaskListKind::Normal).await.unwrap();

        let cancel = CancellationHandle::new();
        let (writer, handle) = TaskWriter::spawn(
            id.clone(),
            store.clone(),
            lease,
            TaskWriterConfig {
                range_size: 1,
                batch_size: 10,
                flush_interval: Duration::from_millis(5),
            },
            cancel.clone(),
        );

        let result = writer.append(build(1)).await;
        assert!(matches!(result, Err(EngineError::OwnershipLost { .. })));
        let _ = handle.await;
        assert!(writer.is_fatally_stopped());
    }

    #[tokio::test]
    async fn flush_ack_level_persists_through_the_same_writer() {
        let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        let id = TaskListIdentity::root("d1", "tl", TaskListType::Activity);
        let lease = store.lease_task_list(&id, TaskListKind::Normal).await.unwrap();
        let cancel = CancellationHandle::new();
        let (writer, _handle) = TaskWriter::spawn(
            id.clone(),
            store.clone(),
            lease,
            TaskWriterConfig {
                range_size: 100,
                batch_size: 10,
                flush_interval: Duration::from_millis(5),
            },
            cancel.clone(),
        );

        writer.append(build(1)).await.unwrap();
        writer.flush_ack_level(1).await.unwrap();

        let state = store.lease_task_list(&id, TaskListKind::Normal).await.unwrap().state;
        assert_eq!(state.ack_level, 1);
        cancel.cancel();
    }
}
