//! `TaskStore` — the thin persistence abstraction the matching engine
//! consumes for task rows and task-list metadata rows (spec §4.1).
//!
//! Swappable backends behind one trait: `InMemoryTaskStore` for development
//! and tests, `SqliteTaskStore` for single-instance durability,
//! `PostgresTaskStore` for multi-instance durability.

pub mod error;
#[cfg(feature = "in-memory")]
pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod prelude;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod traits;


pub use error::TaskStoreError;
#[cfg(feature = "in-memory")]
pub use in_memory::InMemoryTaskStore;
#[cfg(feature = "postgres")]
pub use postgres::{PostgresStoreConfig, PostgresTaskStore};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteStoreConfig, SqliteTaskStore};
pub use traits::{Lease, TaskStore};

pub use matching_types::{TaskInfo, TaskListIdentity, TaskListKind, TaskListState};


#[cfg(all(test, feature = "sqlite"))]
mod parity_sqlite {
    use super::*;
    use sqlite::SqliteStoreConfig;
    use tempfile::tempdir;

    async fn store() -> (SqliteTaskStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = SqliteStoreConfig {
            database_path: dir.path().join("parity.db"),
            ..Default::default()
        };
        (SqliteTaskStore::connect(config).await.unwrap(), dir)
    }

    #[tokio::test]
    async fn lease_then_cas_write() {
        let (store, _dir) = store().await;
        parity_tests::test_lease_then_cas_write(&store, "sqlite-1").await;
    }

    #[tokio::test]
    async fn pagination_is_task_id_ordered() {
        let (store, _dir) = store().await;
        parity_tests::test_pagination_is_task_id_ordered(&store, "sqlite-2").await;
    }

    #[tokio::test]
    async fn complete_tasks_less_than_trims_backlog() {
        let (store, _dir) = store().await;
        parity_tests::test_complete_tasks_less_than_trims_backlog(&store, "sqlite-3").await;
    }
}
