//! Task-list identity and partition naming.
//!
//! Partition identity is stored as data (root name + index), never parsed
//! back out of a string on the hot path. The `/_sys/<root>/<N>` form exists
//! only at the RPC boundary for compatibility with external callers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which work a task list carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskListType {
    Decision,
    Activity,
}

/// Sticky task lists are pinned to a single worker instance for cache
/// locality; they are never forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskListKind {
    Normal,
    Sticky,
}

/// Identity of a single task-list partition. Immutable for the lifetime of
/// the `TaskListManager` that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskListIdentity {
    pub domain_id: String,
    pub name: String,
    pub task_type: TaskListType,
    pub partition: u32,
}

impl TaskListIdentity {
    pub fn root(domain_id: impl Into<String>, name: impl Into<String>, task_type: TaskListType) -> Self {
        Self {
            domain_id: domain_id.into(),
            name: name.into(),
            task_type,
            partition: 0,
        }
    }

    pub fn child(&self, partition: u32) -> Self {
        Self {
            domain_id: self.domain_id.clone(),
            name: self.name.clone(),
            task_type: self.task_type,
            partition,
        }
    }

    pub fn is_root(&self) -> bool {
        self.partition == 0
    }

    /// Render the `/_sys/<root>/<N>` wire form used at the RPC boundary.
    /// N = 0 uses the bare root name.
    pub fn wire_name(&self) -> String {
        if self.partition == 0 {
            self.name.clone()
        } else {
            format!("/_sys/{}/{}", self.name, self.partition)
        }
    }

    /// Parse the `/_sys/<root>/<N>` wire form back into a root name and
    /// partition index. Returns `(name, 0)` for a bare name.
    pub fn parse_wire_name(wire_name: &str) -> (String, u32) {
        if let Some(rest) = wire_name.strip_prefix("/_sys/") {
            if let Some((root, idx)) = rest.rsplit_once('/') {
                if let Ok(n) = idx.parse::<u32>() {
                    return (root.to_string(), n);
                }
            }
        }
        (wire_name.to_string(), 0)
    }
}

impl fmt::Display for TaskListIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{:?}",
            self.domain_id,
            self.wire_name(),
            self.task_type
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_partition_is_bare_name() {
        let id = TaskListIdentity::root("d1", "orders", TaskListType::Activity);
        assert_eq!(id.wire_name(), "orders");
        assert!(id.is_root());
    }

    #[test]
    fn child_partition_uses_sys_form() {
        let id = TaskListIdentity::root("d1", "orders", TaskListType::Activity).child(3);
        assert_eq!(id.wire_name(), "/_sys/orders/3");
        assert!(!id.is_root());
    }

    #[test]
    fn wire_name_round_trips() {
        let (name, idx) = TaskListIdentity::parse_wire_name("/_sys/orders/3");
        assert_eq!(name, "orders");
        assert_eq!(idx, 3);

        let (name, idx) = TaskListIdentity::parse_wire_name("orders");
        assert_eq!(name, "orders");
        assert_eq!(idx, 0);
    }

    #[test]
    fn malformed_sys_form_falls_back_to_bare_name() {
        let (name, idx) = TaskListIdentity::parse_wire_name("/_sys/orders/not-a-number");
        assert_eq!(name, "/_sys/orders/not-a-number");
        assert_eq!(idx, 0);
    }
}
