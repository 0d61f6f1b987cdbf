//! SQLite `TaskStore` backend.
//!
//! Single-instance production backend: durable across restarts, CAS
//! enforced with a conditional `UPDATE ... WHERE range_id = ?`.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use matching_types::{TaskInfo, TaskListIdentity, TaskListKind, TaskListState, WorkflowExecution};

use crate::error::TaskStoreError;
use crate::traits::{Lease, TaskStore};

#[derive(Debug, Clone)]
pub struct SqliteStoreConfig {
    pub database_path: PathBuf,
    pub max_connections: u32,
    pub create_if_missing: bool,
}

impl Default for SqliteStoreConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("matching.db"),
            max_connections: 10,
            create_if_missing: true,
        }
    }
}

pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    pub async fn connect(config: SqliteStoreConfig) -> Result<Self, TaskStoreError> {
        let options = SqliteConnectOptions::new()
            .filename(&config.database_path)
            .create_if_missing(config.create_if_missing);

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|e| TaskStoreError::Internal(format!("connect: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), TaskStoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS task_list_state (
                domain_id TEXT NOT NULL,
                name TEXT NOT NULL,
                task_type TEXT NOT NULL,
                partition INTEGER NOT NULL,
                range_id INTEGER NOT NULL,
                ack_level INTEGER NOT NULL,
                kind TEXT NOT NULL,
                last_updated TEXT NOT NULL,
                PRIMARY KEY (domain_id, name, task_type, partition)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                domain_id TEXT NOT NULL,
                name TEXT NOT NULL,
                task_type TEXT NOT NULL,
                partition INTEGER NOT NULL,
                task_id INTEGER NOT NULL,
                workflow_id TEXT NOT NULL,
                run_id TEXT NOT NULL,
                schedule_id INTEGER NOT NULL,
                schedule_to_start_timeout_seconds INTEGER NOT NULL,
                created_time TEXT NOT NULL,
                PRIMARY KEY (domain_id, name, task_type, partition, task_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn task_type_str(id: &TaskListIdentity) -> &'static str {
        match id.task_type {
            matching_types::TaskListType::Decision => "decision",
            matching_types::TaskListType::Activity => "activity",
        }
    }

    fn kind_str(kind: TaskListKind) -> &'static str {
        match kind {
            TaskListKind::Normal => "normal",
            TaskListKind::Sticky => "sticky",
        }
    }

    fn parse_kind(s: &str) -> TaskListKind {
        match s {
            "sticky" => TaskListKind::Sticky,
            _ => TaskListKind::Normal,
        }
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn lease_task_list(
        &self,
        id: &TaskListIdentity,
        kind: TaskListKind,
    ) -> Result<Lease, TaskStoreError> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();
        let task_type = Self::task_type_str(id);

        let existing = sqlx::query(
            "SELECT range_id, ack_level, kind, last_updated FROM task_list_state
             WHERE domain_id = ? AND name = ? AND task_type = ? AND partition = ?",
        )
        .bind(&id.domain_id)
        .bind(&id.name)
        .bind(task_type)
        .bind(id.partition)
        .fetch_optional(&mut *tx)
        .await?;

        let next_range_id = match &existing {
            Some(row) => row.try_get::<i64, _>("range_id")? + 1,
            None => 1,
        };
        let ack_level = existing
            .as_ref()
            .map(|r| r.try_get::<i64, _>("ack_level"))
            .transpose()?
            .unwrap_or(0);
        let stored_kind = existing
            .as_ref()
            .map(|r| r.try_get::<String, _>("kind"))
            .transpose()?
            .map(|s| Self::parse_kind(&s))
            .unwrap_or(kind);

        sqlx::query(
            "INSERT INTO task_list_state (domain_id, name, task_type, partition, range_id, ack_level, kind, last_updated)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(domain_id, name, task_type, partition)
             DO UPDATE SET range_id = excluded.range_id, last_updated = excluded.last_updated",
        )
        .bind(&id.domain_id)
        .bind(&id.name)
        .bind(task_type)
        .bind(id.partition)
        .bind(next_range_id)
        .bind(ack_level)
        .bind(Self::kind_str(stored_kind))
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let state = TaskListState {
            range_id: next_range_id,
            ack_level,
            kind: stored_kind,
            last_updated: now,
        };
        debug!(task_list = %id, range_id = next_range_id, "leased task list");
        Ok(Lease {
            state,
            cas_token: next_range_id,
        })
    }

    async fn update_task_list(
        &self,
        id: &TaskListIdentity,
        state: TaskListState,
        cas_token: i64,
    ) -> Result<(), TaskStoreError> {
        let task_type = Self::task_type_str(id);
        let result = sqlx::query(
            "UPDATE task_list_state SET range_id = ?, ack_level = ?, kind = ?, last_updated = ?
             WHERE domain_id = ? AND name = ? AND task_type = ? AND partition = ? AND range_id = ?",
        )
        .bind(state.range_id)
        .bind(state.ack_level)
        .bind(Self::kind_str(state.kind))
        .bind(state.last_updated.to_rfc3339())
        .bind(&id.domain_id)
        .bind(&id.name)
        .bind(task_type)
        .bind(id.partition)
        .bind(cas_token)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let observed = sqlx::query(
                "SELECT range_id FROM task_list_state WHERE domain_id = ? AND name = ? AND task_type = ? AND partition = ?",
            )
            .bind(&id.domain_id)
            .bind(&id.name)
            .bind(task_type)
            .bind(id.partition)
            .fetch_optional(&self.pool)
            .await?;

            return match observed {
                Some(row) => Err(TaskStoreError::ConditionFailed {
                    expected: cas_token,
                    observed: row.try_get("range_id")?,
                }),
                None => Err(TaskStoreError::NotFound(id.to_string())),
            };
        }
        Ok(())
    }

    async fn create_tasks(
        &self,
        id: &TaskListIdentity,
        tasks: &[TaskInfo],
        cas_token: i64,
    ) -> Result<(), TaskStoreError> {
        let task_type = Self::task_type_str(id);
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT range_id FROM task_list_state WHERE domain_id = ? AND name = ? AND task_type = ? AND partition = ?",
        )
        .bind(&id.domain_id)
        .bind(&id.name)
        .bind(task_type)
        .bind(id.partition)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| TaskStoreError::NotFound(id.to_string()))?;

        let observed: i64 = row.try_get("range_id")?;
        if observed != cas_token {
            return Err(TaskStoreError::ConditionFailed {
                expected: cas_token,
                observed,
            });
        }

        for task in tasks {
            sqlx::query(
                "INSERT OR REPLACE INTO tasks
                 (domain_id, name, task_type, partition, task_id, workflow_id, run_id, schedule_id, schedule_to_start_timeout_seconds, created_time)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&id.domain_id)
            .bind(&id.name)
            .bind(task_type)
            .bind(id.partition)
            .bind(task.task_id)
            .bind(&task.workflow_execution.workflow_id)
            .bind(&task.workflow_execution.run_id)
            .bind(task.schedule_id)
            .bind(task.schedule_to_start_timeout_seconds as i64)
            .bind(task.created_time.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_tasks(
        &self,
        id: &TaskListIdentity,
        read_level: i64,
        batch_size: u32,
    ) -> Result<Vec<TaskInfo>, TaskStoreError> {
        let task_type = Self::task_type_str(id);
        let rows = sqlx::query(
            "SELECT task_id, workflow_id, run_id, schedule_id, schedule_to_start_timeout_seconds, created_time
             FROM tasks
             WHERE domain_id = ? AND name = ? AND task_type = ? AND partition = ? AND task_id > ?
             ORDER BY task_id ASC
             LIMIT ?",
        )
        .bind(&id.domain_id)
        .bind(&id.name)
        .bind(task_type)
        .bind(id.partition)
        .bind(read_level)
        .bind(batch_size as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            let created_time: String = row.try_get("created_time")?;
            let created_time = DateTime::parse_from_rfc3339(&created_time)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|e| {
                    warn!("failed to parse created_time: {e}");
                    Utc::now()
                });
            tasks.push(TaskInfo {
                task_id: row.try_get("task_id")?,
                domain_id: id.domain_id.clone(),
                workflow_execution: WorkflowExecution {
                    workflow_id: row.try_get("workflow_id")?,
                    run_id: row.try_get("run_id")?,
                },
                schedule_id: row.try_get("schedule_id")?,
                schedule_to_start_timeout_seconds: row
                    .try_get::<i64, _>("schedule_to_start_timeout_seconds")?
                    as u32,
                created_time,
            });
        }
        Ok(tasks)
    }

    async fn complete_tasks_less_than(
        &self,
        id: &TaskListIdentity,
        ack_level: i64,
    ) -> Result<u64, TaskStoreError> {
        let task_type = Self::task_type_str(id);
        let result = sqlx::query(
            "DELETE FROM tasks WHERE domain_id = ? AND name = ? AND task_type = ? AND partition = ? AND task_id <= ?",
        )
        .bind(&id.domain_id)
        .bind(&id.name)
        .bind(task_type)
        .bind(id.partition)
        .bind(ack_level)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn task_count(&self, id: &TaskListIdentity) -> Result<u64, TaskStoreError> {
        let task_type = Self::task_type_str(id);
        let row = sqlx::query(
            "SELECT COUNT(*) as c FROM tasks WHERE domain_id = ? AND name = ? AND task_type = ? AND partition = ?",
        )
        .bind(&id.domain_id)
        .bind(&id.name)
        .bind(task_type)
        .bind(id.partition)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>("c")? as u64)
    }
}
