//! Convenience re-exports for downstream crates.

pub use crate::error::TaskStoreError;
pub use crate::traits::{Lease, TaskStore};

#[cfg(feature = "in-memory")]
pub use crate::in_memory::InMemoryTaskStore;
#[cfg(feature = "postgres")]
pub use crate::postgres::{PostgresStoreConfig, PostgresTaskStore};
#[cfg(feature = "sqlite")]
pub use crate::sqlite::{SqliteStoreConfig, SqliteTaskStore};
