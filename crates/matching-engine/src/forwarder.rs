//! `Forwarder` — k-ary tree escalation of tasks/polls from a child partition
//! to its parent (spec §4.7).
//!
//! Speaks only to a `ParentClient` abstraction, never to another manager's
//! fields directly — the re-architecture guidance in spec §9 calls this out
//! explicitly to avoid cyclic references between managers. `EngineRouter`
//! supplies the concrete `ParentClient` (an in-process call into the
//! parent's `TaskListManager`), but `Forwarder` itself has no knowledge of
//! how the call is actually carried.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use matching_types::{EngineError, QueryTaskInfo, TaskInfo};

use crate::matcher::MatchedItem;
use crate::rate_limiter::RateLimiter;

/// What the forwarder needs from "the parent", decoupled from any concrete
/// transport or manager reference.
#[async_trait]
pub trait ParentClient: Send + Sync {
    async fn forward_add_task(
        &self,
        task: TaskInfo,
        forwarded_from: String,
    ) -> Result<bool, EngineError>;

    async fn forward_add_query(
        &self,
        query: QueryTaskInfo,
        forwarded_from: String,
    ) -> Result<bool, EngineError>;

    async fn forward_poll(
        &self,
        forwarded_from: String,
        deadline: Duration,
    ) -> Result<Option<MatchedItem>, EngineError>;
}

pub struct ForwarderConfig {
    pub max_outstanding_tasks: u32,
    pub max_outstanding_polls: u32,
    pub max_rate_per_second: f64,
}

/// Owned by a non-root `TaskListManager`. Absent for root (partition 0)
/// managers and for sticky task lists, which must never forward.
pub struct Forwarder {
    parent: Arc<dyn ParentClient>,
    child_wire_name: String,
    task_tokens: Semaphore,
    poll_tokens: Semaphore,
    rate_limiter: RateLimiter,
    rejected_by_rate: AtomicU32,
}

impl Forwarder {
    pub fn new(parent: Arc<dyn ParentClient>, child_wire_name: String, config: ForwarderConfig) -> Self {
        Self {
            parent,
            child_wire_name,
            task_tokens: Semaphore::new(config.max_outstanding_tasks as usize),
            poll_tokens: Semaphore::new(config.max_outstanding_polls as usize),
            rate_limiter: RateLimiter::new(config.max_rate_per_second),
            rejected_by_rate: AtomicU32::new(0),
        }
    }

    /// Attempt to escalate a task add to the parent. `Ok(true)` means the
    /// parent matched it synchronously; `Ok(false)` means no budget/rate
    /// token was available or the parent had no waiter, so the caller
    /// should fall back to local buffering.
    pub async fn try_forward_add(&self, task: TaskInfo) -> Result<bool, EngineError> {
        if !self.rate_limiter.try_acquire() {
            self.rejected_by_rate.fetch_add(1, Ordering::Relaxed);
            return Ok(false);
        }
        let Ok(_permit) = self.task_tokens.try_acquire() else {
            return Ok(false);
        };
        self.parent
            .forward_add_task(task, self.child_wire_name.clone())
            .await
    }

    pub async fn try_forward_query(&self, query: QueryTaskInfo) -> Result<bool, EngineError> {
        if !self.rate_limiter.try_acquire() {
            self.rejected_by_rate.fetch_add(1, Ordering::Relaxed);
            return Ok(false);
        }
        let Ok(_permit) = self.task_tokens.try_acquire() else {
            return Ok(false);
        };
        self.parent
            .forward_add_query(query, self.child_wire_name.clone())
            .await
    }

    /// Attempt to escalate an empty local poll to the parent. Returns `None`
    /// if no budget token was available (caller should just keep waiting
    /// locally) or if the parent had nothing to offer before `deadline`.
    pub async fn try_forward_poll(&self, deadline: Duration) -> Option<Result<Option<MatchedItem>, EngineError>> {
        let _permit = self.poll_tokens.try_acquire().ok()?;
        Some(self.parent.forward_poll(self.child_wire_name.clone(), deadline).await)
    }

    pub fn rejected_by_rate_count(&self) -> u32 {
        self.rejected_by_rate.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::Matcher;
    use chrono::Utc;
    use matching_types::WorkflowExecution;
    use std::sync::Mutex;

    struct FakeParent {
        matcher: Arc<Matcher>,
        seen_forwarded_from: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ParentClient for FakeParent {
        async fn forward_add_task(&self, task: TaskInfo, forwarded_from: String) -> Result<bool, EngineError> {
            self.seen_forwarded_from.lock().unwrap().push(forwarded_from.clone());
            Ok(self.matcher.try_deliver_sync(MatchedItem::Task(task), Some(forwarded_from)))
        }

        async fn forward_add_query(&self, query: QueryTaskInfo, forwarded_from: String) -> Result<bool, EngineError> {
            Ok(self.matcher.try_deliver_sync(MatchedItem::Query(query), Some(forwarded_from)))
        }

        async fn forward_poll(&self, _forwarded_from: String, deadline: Duration) -> Result<Option<MatchedItem>, EngineError> {
            let cancel = crate::cancellation::CancellationHandle::new();
            Ok(self.matcher.poll(deadline, &cancel).await.map(|m| m.item))
        }
    }

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
    async fn forwarded_add_matches_against_parent_waiter_and_tags_origin() {
        let parent_matcher = Arc::new(Matcher::new(10));
        let parent = Arc::new(FakeParent {
            matcher: parent_matcher.clone(),
            seen_forwarded_from: Mutex::new(Vec::new()),
        });
        let forwarder = Forwarder::new(
            parent.clone(),
            "/_sys/tlC/3".to_string(),
            ForwarderConfig {
                max_outstanding_tasks: 10,
                max_outstanding_polls: 10,
                max_rate_per_second: 1000.0,
            },
        );

        let poller = tokio::spawn({
            let parent_matcher = parent_matcher.clone();
            async move {
                parent_matcher
                    .poll(Duration::from_millis(200), &crate::cancellation::CancellationHandle::new())
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let delivered = forwarder.try_forward_add(task(7)).await.unwrap();
        assert!(delivered);

        let matched = poller.await.unwrap().expect("parent should have matched");
        assert_eq!(matched.forwarded_from.as_deref(), Some("/_sys/tlC/3"));
        match matched.item {
            MatchedItem::Task(t) => assert_eq!(t.task_id, 7),
            _ => panic!("expected task"),
        }
    }

    #[tokio::test]
    async fn forward_fails_without_a_waiting_parent_poller() {
        let parent_matcher = Arc::new(Matcher::new(10));
        let parent = Arc::new(FakeParent {
            matcher: parent_matcher,
            seen_forwarded_from: Mutex::new(Vec::new()),
        });
        let forwarder = Forwarder::new(
            parent,
            "/_sys/tlC/3".to_string(),
            ForwarderConfig {
                max_outstanding_tasks: 10,
                max_outstanding_polls: 10,
                max_rate_per_second: 1000.0,
            },
        );
        let delivered = forwarder.try_forward_add(task(1)).await.unwrap();
        assert!(!delivered, "no waiter at parent; caller must fall back to local buffering");
    }

    #[tokio::test]
    async fn rate_limit_exhaustion_rejects_without_calling_parent() {
        let parent_matcher = Arc::new(Matcher::new(10));
        let parent = Arc::new(FakeParent {
            matcher: parent_matcher,
            seen_forwarded_from: Mutex::new(Vec::new()),
        });
        let forwarder = Forwarder::new(
            parent.clone(),
            "/_sys/tlC/3".to_string(),
            ForwarderConfig {
                max_outstanding_tasks: 10,
                max_outstanding_polls: 10,
                max_rate_per_second: 1.0,
            },
        );
        assert!(!forwarder.try_forward_add(task(1)).await.unwrap());
        assert!(!forwarder.try_forward_add(task(2)).await.unwrap());
        assert_eq!(parent.seen_forwarded_from.lock().unwrap().len(), 1);
        assert_eq!(forwarder.rejected_by_rate_count(), 1);
    }
}
