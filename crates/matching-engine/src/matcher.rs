//! `Matcher` — single-partition producer/consumer hand-off (spec §4.6, "the
//! heart" of the engine).
//!
//! Purely channel/queue-coordinated: the only locks held are brief
//! `std::sync::Mutex` sections around a `VecDeque`, never spanning an
//! `.await`. A waiting poller registers a `oneshot` in the waiter queue;
//! `deliver` walks that queue trying each waiter in turn, silently skipping
//! one whose receiver has already been dropped (poller gave up or was
//! cancelled) rather than failing the offer.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::warn;

use matching_types::{QueryTaskInfo, TaskInfo};

use crate::cancellation::CancellationHandle;

#[derive(Debug, Clone)]
pub enum MatchedItem {
    Task(TaskInfo),
    Query(QueryTaskInfo),
}

/// A delivered item plus provenance: `Some(name)` when it crossed the
/// forwarding tree from a child partition.
#[derive(Debug, Clone)]
pub struct Matched {
    pub item: MatchedItem,
    pub forwarded_from: Option<String>,
}

pub struct Matcher {
    local_tasks: Mutex<VecDeque<TaskInfo>>,
    local_queries: Mutex<VecDeque<QueryTaskInfo>>,
    waiters: Mutex<VecDeque<oneshot::Sender<Matched>>>,
    buffer_capacity: usize,
}

impl Matcher {
    pub fn new(buffer_capacity: usize) -> Self {
        Self {
            local_tasks: Mutex::new(VecDeque::new()),
            local_queries: Mutex::new(VecDeque::new()),
            waiters: Mutex::new(VecDeque::new()),
            buffer_capacity,
        }
    }

    /// Walk the waiter queue, delivering `item` to the first live receiver.
    /// Returns the item back if no waiter accepted it.
    fn deliver(&self, mut item: Matched) -> Option<Matched> {
        loop {
            let next = self.waiters.lock().unwrap().pop_front();
            match next {
                None => return Some(item),
                Some(tx) => match tx.send(item) {
                    Ok(()) => return None,
                    Err(returned) => item = returned,
                },
            }
        }
    }

    /// Try to hand `item` directly to an already-waiting poller. Does not
    /// buffer on failure — used for the forwarded-task escalation path,
    /// where the receiving partition has no storage backing for the task if
    /// it can't match it synchronously.
    pub fn try_deliver_sync(&self, item: MatchedItem, forwarded_from: Option<String>) -> bool {
        self.deliver(Matched { item, forwarded_from }).is_none()
    }

    /// Push a task straight into the local buffer with no delivery attempt —
    /// the reader's last resort once a sync hand-off, and a forward to the
    /// parent if one was available, have both already been tried.
    pub fn buffer_only(&self, task: TaskInfo) {
        let mut queue = self.local_tasks.lock().unwrap();
        if queue.len() >= self.buffer_capacity {
            warn!(
                task_id = task.task_id,
                capacity = self.buffer_capacity,
                "matcher local buffer over its soft capacity; still accepting (task is durable)"
            );
        }
        queue.push_back(task);
    }

    /// A query never came from storage; if no waiter and no forward budget,
    /// the caller still buffers it locally (bounded by the caller's own
    /// deadline, since queries aren't durable and will simply expire).
    pub fn buffer_query(&self, query: QueryTaskInfo) {
        self.local_queries.lock().unwrap().push_back(query);
    }

    /// Consumer side: try local buffers first, then wait up to `deadline`
    /// for a direct hand-off, honoring `cancel`.
    pub async fn poll(&self, deadline: Duration, cancel: &CancellationHandle) -> Option<Matched> {
        if let Some(task) = self.local_tasks.lock().unwrap().pop_front() {
            return Some(Matched {
                item: MatchedItem::Task(task),
                forwarded_from: None,
            });
        }
        if let Some(query) = self.local_queries.lock().unwrap().pop_front() {
            return Some(Matched {
                item: MatchedItem::Query(query),
                forwarded_from: None,
            });
        }

        let (tx, rx) = oneshot::channel();
        self.waiters.lock().unwrap().push_back(tx);

        // Close the registration race: something may have been offered
        // between the checks above and registering the waiter.
        if let Some(task) = self.local_tasks.lock().unwrap().pop_front() {
            return Some(Matched {
                item: MatchedItem::Task(task),
                forwarded_from: None,
            });
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = rx => result.ok(),
            _ = tokio::time::sleep(deadline) => None,
        }
    }

    pub fn backlog_hint(&self) -> usize {
        self.local_tasks.lock().unwrap().len()
    }

    pub fn waiting_poller_count(&self) -> usize {
        self.waiters.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use matching_types::WorkflowExecution;

    fn task(id: i64) -> TaskInfo {
        TaskInfo {
            task_id: id,
            domain_id: "d1".to_string(),
            workflow_execution: WorkflowExecution {
                workflow_id: "wf".to_string(),
                run_id: "run".to_string(),
            },
            schedule_id: id,
            schedule_to_start_timeout_seconds: 30,
            created_time: Utc::now(),
        }
    }

    #[tokio::test]
    async fn sync_hand_off_to_waiting_poller() {
        let matcher = std::sync::Arc::new(Matcher::new(10));
        let cancel = CancellationHandle::new();
        let poller_matcher = matcher.clone();
        let poller_cancel = cancel.clone();
        let poll_task = tokio::spawn(async move {
            poller_matcher.poll(Duration::from_millis(200), &poller_cancel).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matcher.try_deliver_sync(MatchedItem::Task(task(42)), None));

        let matched = poll_task.await.unwrap().expect("expected a sync match");
        match matched.item {
            MatchedItem::Task(t) => assert_eq!(t.task_id, 42),
            _ => panic!("expected a task"),
        }
        assert!(matched.forwarded_from.is_none());
    }

    #[tokio::test]
    async fn offer_without_waiter_buffers_locally() {
        let matcher = Matcher::new(10);
        assert!(!matcher.try_deliver_sync(MatchedItem::Task(task(1)), None));
        matcher.buffer_only(task(1));
        assert_eq!(matcher.backlog_hint(), 1);
        let matched = matcher
            .poll(Duration::from_millis(50), &CancellationHandle::new())
            .await
            .unwrap();
        match matched.item {
            MatchedItem::Task(t) => assert_eq!(t.task_id, 1),
            _ => panic!("expected a task"),
        }
    }

    #[tokio::test]
    async fn poll_times_out_when_empty() {
        let matcher = Matcher::new(10);
        let result = matcher.poll(Duration::from_millis(20), &CancellationHandle::new()).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn cancellation_returns_poll_immediately() {
        let matcher = std::sync::Arc::new(Matcher::new(10));
        let cancel = CancellationHandle::new();
        let poller_cancel = cancel.clone();
        let poller_matcher = matcher.clone();
        let poll_task = tokio::spawn(async move {
            poller_matcher.poll(Duration::from_secs(60), &poller_cancel).await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_millis(50), poll_task)
            .await
            .expect("poll should return promptly on cancellation")
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn try_deliver_sync_does_not_buffer_on_failure() {
        let matcher = Matcher::new(10);
        let delivered = matcher.try_deliver_sync(MatchedItem::Task(task(1)), Some("child".to_string()));
        assert!(!delivered);
        assert_eq!(matcher.backlog_hint(), 0);
    }
}
