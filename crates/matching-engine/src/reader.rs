//! `TaskReader` — background loader paging unacked tasks from storage into
//! the `AckManager`/`Matcher` in-memory pipeline (spec §4.3).

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

use matching_store::TaskStore;
use matching_types::TaskListIdentity;

use crate::ack_manager::AckManager;
use crate::cancellation::CancellationHandle;
use crate::forwarder::Forwarder;
use crate::matcher::{MatchedItem, Matcher};

pub struct TaskReaderConfig {
    pub batch_size: u32,
    pub poll_interval: Duration,
    pub buffer_capacity: usize,
}

/// Shared wake signal: `TaskWriter`/anything that just persisted new rows
/// calls `notify_one()` for the fast-path wake described in spec §4.3.
pub type WakeSignal = Arc<Notify>;

pub struct TaskReader {
    read_level: Arc<AtomicI64>,
}

impl TaskReader {
    pub fn read_level(&self) -> i64 {
        self.read_level.load(Ordering::Acquire)
    }

    /// Spawns the reader loop. `ack` and `matcher` are shared with the rest
    /// of the owning `TaskListManager`.
    pub fn spawn(
        id: TaskListIdentity,
        store: Arc<dyn TaskStore>,
        ack: Arc<AckManager>,
        matcher: Arc<Matcher>,
        wake: WakeSignal,
        forwarder: Option<Arc<Forwarder>>,
        config: TaskReaderConfig,
        cancel: CancellationHandle,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let read_level = Arc::new(AtomicI64::new(ack.ack_level()));
        let loop_read_level = read_level.clone();
        let handle = tokio::spawn(async move {
            run_reader_loop(id, store, ack, matcher, wake, forwarder, config, loop_read_level, cancel).await;
        });
        (Self { read_level }, handle)
    }
}

async fn run_reader_loop(
    id: TaskListIdentity,
    store: Arc<dyn TaskStore>,
    ack: Arc<AckManager>,
    matcher: Arc<Matcher>,
    wake: WakeSignal,
    forwarder: Option<Arc<Forwarder>>,
    config: TaskReaderConfig,
    read_level: Arc<AtomicI64>,
    cancel: CancellationHandle,
) {
    let mut consecutive_errors = 0u32;
    loop {
        if ack.outstanding_count() >= config.buffer_capacity {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = wake.notified() => {}
                _ = tokio::time::sleep(config.poll_interval) => {}
            }
            continue;
        }

        let level = read_level.load(Ordering::Acquire);
        match store.get_tasks(&id, level, config.batch_size).await {
            Ok(tasks) => {
                consecutive_errors = 0;
                if tasks.is_empty() {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = wake.notified() => {}
                        _ = tokio::time::sleep(config.poll_interval) => {}
                    }
                    continue;
                }
                let mut max_id = level;
                for task in tasks {
                    max_id = max_id.max(task.task_id);
                    ack.add_task(task.clone());
                    offer_with_forward(&matcher, &ack, &forwarder, task).await;
                }
                read_level.store(max_id, Ordering::Release);
                debug!(task_list = %id, read_level = max_id, "task reader advanced");
            }
            Err(err) => {
                consecutive_errors += 1;
                let backoff = jittered_backoff(consecutive_errors);
                if consecutive_errors >= 10 {
                    error!(task_list = %id, %err, "task reader pausing after repeated persistence errors");
                } else {
                    warn!(task_list = %id, %err, attempt = consecutive_errors, "task reader retrying after persistence error");
                }
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }
}

/// Offer algorithm, producer side (spec §4.6): try a local sync hand-off
/// first; if this is a non-root partition with forward budget, escalate to
/// the parent next; only then fall back to the local buffer.
async fn offer_with_forward(
    matcher: &Matcher,
    ack: &AckManager,
    forwarder: &Option<Arc<Forwarder>>,
    task: matching_types::TaskInfo,
) {
    let task_id = task.task_id;
    if matcher.try_deliver_sync(MatchedItem::Task(task.clone()), None) {
        return;
    }
    if let Some(forwarder) = forwarder {
        if matches!(forwarder.try_forward_add(task.clone()).await, Ok(true)) {
            ack.mark_delivered(task_id, "forwarded-to-parent".to_string(), Utc::now());
            return;
        }
    }
    matcher.buffer_only(task);
}

fn jittered_backoff(attempt: u32) -> Duration {
    use rand::Rng;
    let base_ms = 50u64.saturating_mul(1 << attempt.min(8));
    let jitter = rand::thread_rng().gen_range(0..=base_ms / 4 + 1);
    Duration::from_millis((base_ms + jitter).min(5_000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use matching_store::InMemoryTaskStore;
    use matching_types::{TaskListKind, TaskListType, WorkflowExecution};
    use std::time::Duration as StdDuration;

    fn task(id: i64) -> matching_types::TaskInfo {
        matching_types::TaskInfo {
            task_id: id,
            domain_id: "d1".to_string(),
            workflow_execution: WorkflowExecution {
                workflow_id: "wf".to_string(),
                run_id: "run".to_string(),
            },
            schedule_id: id,
            schedule_to_start_timeout_seconds: 30,
            created_time: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn loads_persisted_tasks_into_ack_manager() {
        let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        let id = TaskListIdentity::root("d1", "tl", TaskListType::Activity);
        let lease = store.lease_task_list(&id, TaskListKind::Normal).await.unwrap();
        store
            .create_tasks(&id, &[task(1), task(2), task(3)], lease.cas_token)
            .await
            .unwrap();

        let ack = Arc::new(AckManager::new(0));
        let matcher = Arc::new(Matcher::new(1000));
        let wake = Arc::new(Notify::new());
        let cancel = CancellationHandle::new();

        let (reader, handle) = TaskReader::spawn(
            id.clone(),
            store.clone(),
            ack.clone(),
            matcher.clone(),
            wake,
            None,
            TaskReaderConfig {
                batch_size: 100,
                poll_interval: StdDuration::from_millis(10),
                buffer_capacity: 1000,
            },
            cancel.clone(),
        );

        tokio::time::sleep(StdDuration::from_millis(60)).await;
        assert_eq!(reader.read_level(), 3);
        assert_eq!(ack.outstanding_count(), 3);

        cancel.cancel();
        let _ = handle.await;
    }
}
