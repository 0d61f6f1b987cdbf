//! The matching engine: per-task-list actors that durably buffer tasks,
//! hand them off to long-polling workers, and escalate backlog through a
//! forwarding tree when a single partition can't keep up (spec §4).
//!
//! `EngineRouter` is the crate's entry point — it owns the
//! `TaskListIdentity -> TaskListManager` map and is the only thing callers
//! outside this crate should construct directly.

pub mod ack_manager;
pub mod cancellation;
pub mod forwarder;
pub mod manager;
pub mod matcher;
pub mod poller_registry;
pub mod prelude;
pub mod rate_limiter;
pub mod reader;
pub mod router;
pub mod writer;

pub use manager::{DescribeResult, ManagerState, NewTask, PolledTask, TaskListManager};
pub use matcher::{Matched, MatchedItem};
pub use router::EngineRouter;
