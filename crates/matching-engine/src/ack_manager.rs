//! `AckManager` — per-task-list sequence bookkeeping (spec §4.4).
//!
//! Owns an ordered `TaskID -> state` map and computes the ack watermark: the
//! highest `TaskID` such that every id at or below it is `Acked`. Delivery
//! timeouts are tracked with a second-granularity bucket map keyed by
//! deadline rather than one timer per in-flight task (spec §9 design note).

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use matching_types::{DeliveryState, InFlightTask, TaskInfo};

struct Inner {
    tasks: BTreeMap<i64, InFlightTask>,
    /// unix-second deadline -> task ids delivered with that deadline.
    timer_wheel: HashMap<i64, Vec<i64>>,
    ack_level: i64,
}

/// Tracks in-flight delivery state for one `TaskListManager`. All mutating
/// methods are synchronous and cheap; callers hold no lock across an await.
pub struct AckManager {
    inner: Mutex<Inner>,
}

impl AckManager {
    pub fn new(ack_level: i64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                tasks: BTreeMap::new(),
                timer_wheel: HashMap::new(),
                ack_level,
            }),
        }
    }

    /// Register a freshly loaded task as `Buffered`.
    pub fn add_task(&self, info: TaskInfo) {
        let mut inner = self.inner.lock().unwrap();
        inner.tasks.insert(info.task_id, InFlightTask::buffered(info));
    }

    /// Mark a task `Delivered` and schedule its TTL bucket.
    pub fn mark_delivered(&self, task_id: i64, poller_identity: String, now: DateTime<Utc>) {
        let mut inner = self.inner.lock().unwrap();
        let Some(task) = inner.tasks.get_mut(&task_id) else {
            return;
        };
        task.state = DeliveryState::Delivered;
        task.delivered_at = Some(now);
        task.poller_identity = Some(poller_identity);
        let deadline = now.timestamp() + task.info.schedule_to_start_timeout_seconds as i64;
        inner.timer_wheel.entry(deadline).or_default().push(task_id);
    }

    /// Idempotent: a second ack of the same id is a no-op, matching spec §8's
    /// "idempotence of Ack" law.
    pub fn ack(&self, task_id: i64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(task) = inner.tasks.get_mut(&task_id) {
            task.state = DeliveryState::Acked;
        }
        Self::advance_watermark(&mut inner);
    }

    /// Returns a task to `Buffered` for redelivery (explicit nack, poller
    /// timeout, or delivery-TTL expiry). Returns the task's info so the
    /// caller can push it back onto the `Matcher`'s buffer — `AckManager`
    /// tracks delivery state only, it does not itself hold a handle to the
    /// matcher.
    pub fn nack(&self, task_id: i64) -> Option<TaskInfo> {
        let mut inner = self.inner.lock().unwrap();
        let task = inner.tasks.get_mut(&task_id)?;
        if task.state == DeliveryState::Acked {
            return None;
        }
        task.state = DeliveryState::Buffered;
        task.delivered_at = None;
        task.poller_identity = None;
        Some(task.info.clone())
    }

    /// Sweep the timer wheel for buckets at or before `now`; any task still
    /// `Delivered` (not yet acked) is implicitly nacked back to `Buffered`.
    /// Returns the tasks that were redelivered this sweep so the caller can
    /// hand them back to the `Matcher`.
    pub fn expire_deliveries(&self, now: DateTime<Utc>) -> Vec<TaskInfo> {
        let mut inner = self.inner.lock().unwrap();
        let now_secs = now.timestamp();
        let due: Vec<i64> = inner
            .timer_wheel
            .keys()
            .filter(|&&deadline| deadline <= now_secs)
            .copied()
            .collect();
        let mut expired = Vec::new();
        for deadline in due {
            let Some(task_ids) = inner.timer_wheel.remove(&deadline) else {
                continue;
            };
            for task_id in task_ids {
                if let Some(task) = inner.tasks.get_mut(&task_id) {
                    if task.state == DeliveryState::Delivered {
                        task.state = DeliveryState::Buffered;
                        task.delivered_at = None;
                        task.poller_identity = None;
                        expired.push(task.info.clone());
                    }
                }
            }
        }
        expired
    }

    /// Advance `ack_level` as far as the contiguous prefix of `Acked` tasks
    /// allows, dropping those entries (they're safe to delete from storage).
    fn advance_watermark(inner: &mut Inner) {
        loop {
            let Some((&lowest, task)) = inner.tasks.iter().next() else {
                break;
            };
            if task.state != DeliveryState::Acked {
                break;
            }
            inner.ack_level = lowest;
            inner.tasks.remove(&lowest);
        }
    }

    pub fn ack_level(&self) -> i64 {
        self.inner.lock().unwrap().ack_level
    }

    pub fn outstanding_count(&self) -> usize {
        self.inner.lock().unwrap().tasks.len()
    }

    /// Snapshot of a task's current state, for tests and `DescribeTaskList`.
    pub fn state_of(&self, task_id: i64) -> Option<DeliveryState> {
        self.inner.lock().unwrap().tasks.get(&task_id).map(|t| t.state)
    }
}
