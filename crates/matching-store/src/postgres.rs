//! PostgreSQL `TaskStore` backend.
//!
//! Multi-instance production backend: every `TaskListManager` process
//! shares the same durable store, coordinated purely through `RangeID` CAS
//! (`UPDATE ... WHERE range_id = $N`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::debug;

use matching_types::{TaskInfo, TaskListIdentity, TaskListKind, TaskListState, WorkflowExecution};

use crate::error::TaskStoreError;
use crate::traits::{Lease, TaskStore};

#[derive(Debug, Clone)]
pub struct PostgresStoreConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

impl Default for PostgresStoreConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost:5432/matching".to_string(),
            max_connections: 20,
            min_connections: 2,
        }
    }
}

pub struct PostgresTaskStore {
    pool: PgPool,
}

impl PostgresTaskStore {
    pub async fn connect(config: PostgresStoreConfig) -> Result<Self, TaskStoreError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.database_url)
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
                range_id BIGINT NOT NULL,
                ack_level BIGINT NOT NULL,
                kind TEXT NOT NULL,
                last_updated TIMESTAMPTZ NOT NULL,
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
                task_id BIGINT NOT NULL,
                workflow_id TEXT NOT NULL,
                run_id TEXT NOT NULL,
                schedule_id BIGINT NOT NULL,
                schedule_to_start_timeout_seconds INTEGER NOT NULL,
                created_time TIMESTAMPTZ NOT NULL,
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
impl TaskStore for PostgresTaskStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
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
            "SELECT range_id, ack_level, kind FROM task_list_state
             WHERE domain_id = $1 AND name = $2 AND task_type = $3 AND partition = $4
             FOR UPDATE",
        )
        .bind(&id.domain_id)
        .bind(&id.name)
        .bind(task_type)
        .bind(id.partition as i32)
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
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (domain_id, name, task_type, partition)
             DO UPDATE SET range_id = EXCLUDED.range_id, last_updated = EXCLUDED.last_updated",
        )
        .bind(&id.domain_id)
        .bind(&id.name)
        .bind(task_type)
        .bind(id.partition as i32)
        .bind(next_range_id)
        .bind(ack_level)
        .bind(Self::kind_str(stored_kind))
        .bind(now)
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
            "UPDATE task_list_state SET range_id = $1, ack_level = $2, kind = $3, last_updated = $4
             WHERE domain_id = $5 AND name = $6 AND task_type = $7 AND partition = $8 AND range_id = $9",
        )
        .bind(state.range_id)
        .bind(state.ack_level)
        .bind(Self::kind_str(state.kind))
        .bind(state.last_updated)
        .bind(&id.domain_id)
        .bind(&id.name)
        .bind(task_type)
        .bind(id.partition as i32)
        .bind(cas_token)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let observed = sqlx::query(
                "SELECT range_id FROM task_list_state WHERE domain_id = $1 AND name = $2 AND task_type = $3 AND partition = $4",
            )
            .bind(&id.domain_id)
            .bind(&id.name)
            .bind(task_type)
            .bind(id.partition as i32)
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
            "SELECT range_id FROM task_list_state WHERE domain_id = $1 AND name = $2 AND task_type = $3 AND partition = $4",
        )
        .bind(&id.domain_id)
        .bind(&id.name)
        .bind(task_type)
        .bind(id.partition as i32)
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
                "INSERT INTO tasks
                 (domain_id, name, task_type, partition, task_id, workflow_id, run_id, schedule_id, schedule_to_start_timeout_seconds, created_time)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                 ON CONFLICT (domain_id, name, task_type, partition, task_id) DO NOTHING",
            )
            .bind(&id.domain_id)
            .bind(&id.name)
            .bind(task_type)
            .bind(id.partition as i32)
            .bind(task.task_id)
            .bind(&task.workflow_execution.workflow_id)
            .bind(&task.workflow_execution.run_id)
            .bind(task.schedule_id)
            .bind(task.schedule_to_start_timeout_seconds as i32)
            .bind(task.created_time)
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
             WHERE domain_id = $1 AND name = $2 AND task_type = $3 AND partition = $4 AND task_id > $5
             ORDER BY task_id ASC
             LIMIT $6",
        )
        .bind(&id.domain_id)
        .bind(&id.name)
        .bind(task_type)
        .bind(id.partition as i32)
        .bind(read_level)
        .bind(batch_size as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            let created_time: DateTime<Utc> = row.try_get("created_time")?;
            tasks.push(TaskInfo {
                task_id: row.try_get("task_id")?,
                domain_id: id.domain_id.clone(),
                workflow_execution: WorkflowExecution {
                    workflow_id: row.try_get("workflow_id")?,
                    run_id: row.try_get("run_id")?,
                },
                schedule_id: row.try_get("schedule_id")?,
                schedule_to_start_timeout_seconds: row
                    .try_get::<i32, _>("schedule_to_start_timeout_seconds")?
                    as u32,
                created_time,
            });
        }
        if tasks.is_empty() {
            debug!(task_list = %id, read_level, "get_tasks returned no rows above read_level");
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
            "DELETE FROM tasks WHERE domain_id = $1 AND name = $2 AND task_type = $3 AND partition = $4 AND task_id <= $5",
        )
        .bind(&id.domain_id)
        .bind(&id.name)
        .bind(task_type)
        .bind(id.partition as i32)
        .bind(ack_level)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn task_count(&self, id: &TaskListIdentity) -> Result<u64, TaskStoreError> {
        let task_type = Self::task_type_str(id);
        let row = sqlx::query(
            "SELECT COUNT(*) as c FROM tasks WHERE domain_id = $1 AND name = $2 AND task_type = $3 AND partition = $4",
        )
        .bind(&id.domain_id)
        .bind(&id.name)
        .bind(task_type)
        .bind(id.partition as i32)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>("c")? as u64)
    }
}
