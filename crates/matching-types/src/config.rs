//! Typed configuration covering every option in spec §6's configuration
//! table, deserializable from YAML/TOML for operators, constructible with
//! `Default` for tests.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// How many partitions producers fan out to, per domain (read side).
    pub num_task_list_read_partitions: u32,
    /// How many partitions pollers fan in from, per domain (write side).
    pub num_task_list_write_partitions: u32,
    /// Fan-in factor `k` of the forwarding tree.
    pub forwarder_max_children_per_node: u32,
    /// Concurrent forward budget: outstanding forwarded tasks.
    pub forwarder_max_outstanding_tasks: u32,
    /// Concurrent forward budget: outstanding forwarded polls.
    pub forwarder_max_outstanding_polls: u32,
    /// Token-bucket rate for forwards, in forwards/second.
    pub forwarder_max_rate_per_second: f64,
    /// `GetTasks` page size.
    pub max_task_batch_size: u32,
    /// TaskID block reservation size.
    pub range_size: i64,
    /// Max duration a poll blocks.
    #[serde(with = "duration_secs")]
    pub long_poll_expiration_interval: Duration,
    /// Inactivity threshold before a manager drains and releases its lease.
    #[serde(with = "duration_secs")]
    pub idle_tasklist_check_interval: Duration,
    /// Default dispatch rate per task list, absent a poller hint override.
    pub max_tasks_per_second: f64,
    /// Sticky task lists drain after this much poller silence (resolves the
    /// "sticky eviction timer" open question — see DESIGN.md).
    #[serde(with = "duration_secs")]
    pub sticky_poller_timeout: Duration,
    /// Bound on the in-memory read buffer per task list.
    pub reader_buffer_size: usize,
    /// How often the ack-level/backlog watermark is flushed to storage.
    #[serde(with = "duration_secs")]
    pub ack_flush_interval: Duration,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            num_task_list_read_partitions: 1,
            num_task_list_write_partitions: 1,
            forwarder_max_children_per_node: 4,
            forwarder_max_outstanding_tasks: 200,
            forwarder_max_outstanding_polls: 200,
            forwarder_max_rate_per_second: 100.0,
            max_task_batch_size: 100,
            range_size: 1000,
            long_poll_expiration_interval: Duration::from_secs(60),
            idle_tasklist_check_interval: Duration::from_secs(5 * 60),
            max_tasks_per_second: 100_000.0,
            sticky_poller_timeout: Duration::from_secs(10),
            reader_buffer_size: 1000,
            ack_flush_interval: Duration::from_secs(10),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs))
    }
}
