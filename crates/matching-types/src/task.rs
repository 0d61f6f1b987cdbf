//! Task and task-list-state persistence models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::TaskListKind;

/// A workflow execution reference (not owned by this crate's persistence —
/// history holds the payload, this is a pointer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub workflow_id: String,
    pub run_id: String,
}

/// Persisted task row: a pointer into workflow history, never the payload
/// itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    /// Monotonic within (TaskList, Type).
    pub task_id: i64,
    pub domain_id: String,
    pub workflow_execution: WorkflowExecution,
    /// History-event id this task corresponds to.
    pub schedule_id: i64,
    pub schedule_to_start_timeout_seconds: u32,
    pub created_time: DateTime<Utc>,
}

/// Half-open task-id range `[start_id, end_id)` reserved for one manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskIdBlock {
    pub start_id: i64,
    pub end_id: i64,
}

impl TaskIdBlock {
    pub fn empty_at(id: i64) -> Self {
        Self {
            start_id: id,
            end_id: id,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.start_id >= self.end_id
    }

    pub fn remaining(&self) -> i64 {
        (self.end_id - self.start_id).max(0)
    }

    /// Take the next id from the block, advancing `start_id`. Returns `None`
    /// if the block is exhausted.
    pub fn take_next(&mut self) -> Option<i64> {
        if self.is_exhausted() {
            return None;
        }
        let id = self.start_id;
        self.start_id += 1;
        Some(id)
    }
}

/// Persisted task-list metadata row, one per `TaskListIdentity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskListState {
    /// Monotonic lease counter. Bumped on every ownership change; a mismatch
    /// on write means the holder lost ownership.
    pub range_id: i64,
    /// Highest task id such that every id at or below it is acked.
    pub ack_level: i64,
    pub kind: TaskListKind,
    pub last_updated: DateTime<Utc>,
}

impl TaskListState {
    pub fn fresh(kind: TaskListKind, now: DateTime<Utc>) -> Self {
        Self {
            range_id: 0,
            ack_level: 0,
            kind,
            last_updated: now,
        }
    }
}

/// Delivery state of an in-flight task, owned by the `AckManager` until
/// terminal. Transitions are monotonic except `Delivered -> Buffered` on
/// poller timeout or explicit nack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryState {
    Buffered,
    Delivered,
    Acked,
    Nacked,
    Expired,
}

/// In-memory bookkeeping for a task between load and ack/expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InFlightTask {
    pub info: TaskInfo,
    pub state: DeliveryState,
    pub delivered_at: Option<DateTime<Utc>>,
    pub poller_identity: Option<String>,
}

impl InFlightTask {
    pub fn buffered(info: TaskInfo) -> Self {
        Self {
            info,
            state: DeliveryState::Buffered,
            delivered_at: None,
            poller_identity: None,
        }
    }
}

/// Small LRU-style record of a connected poller, used for `DescribeTaskList`
/// responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerInfo {
    pub identity: String,
    pub last_access_time: DateTime<Utc>,
    pub rate_per_second_hint: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_take_next_advances_and_exhausts() {
        let mut block = TaskIdBlock {
            start_id: 10,
            end_id: 12,
        };
        assert_eq!(block.take_next(), Some(10));
        assert_eq!(block.take_next(), Some(11));
        assert_eq!(block.take_next(), None);
        assert!(block.is_exhausted());
    }

    #[test]
    fn empty_block_is_exhausted() {
        let block = TaskIdBlock::empty_at(5);
        assert!(block.is_exhausted());
        assert_eq!(block.remaining(), 0);
    }
}
