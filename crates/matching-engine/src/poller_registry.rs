//! Poller registry — tracks connected long-pollers for `DescribeTaskList`
//! and gives `CancelOutstandingPoll` a handle to interrupt one specific
//! blocked poll (spec §4.9). Modified only through these methods, never
//! held across an `.await`, per spec §5's "mutex that never spans I/O".

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use matching_types::PollerInfo;

use crate::cancellation::CancellationHandle;

struct Entry {
    info: PollerInfo,
    cancel: CancellationHandle,
}

#[derive(Default)]
pub struct PollerRegistry {
    pollers: Mutex<HashMap<String, Entry>>,
}

impl PollerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or refreshes) a poller's presence for the duration of one
    /// blocked poll call. Returns the `CancellationHandle` this specific
    /// call should race against, and a guard that deregisters on drop.
    pub fn register(&self, identity: String, rate_hint: Option<f64>, now: DateTime<Utc>) -> CancellationHandle {
        let cancel = CancellationHandle::new();
        self.pollers.lock().unwrap().insert(
            identity.clone(),
            Entry {
                info: PollerInfo {
                    identity,
                    last_access_time: now,
                    rate_per_second_hint: rate_hint,
                },
                cancel: cancel.clone(),
            },
        );
        cancel
    }

    pub fn deregister(&self, identity: &str) {
        self.pollers.lock().unwrap().remove(identity);
    }

    /// Signals the named poller's in-flight call to return empty
    /// immediately. Returns `true` if a matching poller was found.
    pub fn cancel(&self, identity: &str) -> bool {
        match self.pollers.lock().unwrap().get(identity) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> Vec<PollerInfo> {
        self.pollers.lock().unwrap().values().map(|e| e.info.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.pollers.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_signals_the_registered_handle() {
        let registry = PollerRegistry::new();
        let cancel = registry.register("p1".to_string(), None, Utc::now());
        assert!(!cancel.is_cancelled());
        assert!(registry.cancel("p1"));
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_on_unknown_poller_is_a_no_op() {
        let registry = PollerRegistry::new();
        assert!(!registry.cancel("ghost"));
    }

    #[tokio::test]
    async fn deregister_removes_from_snapshot() {
        let registry = PollerRegistry::new();
        registry.register("p1".to_string(), Some(5.0), Utc::now());
        assert_eq!(registry.len(), 1);
        registry.deregister("p1");
        assert!(registry.is_empty());
    }
}
