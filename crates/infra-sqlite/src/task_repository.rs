// SQLite TaskStateRepository Implementation

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use opsplan_core::domain::{TaskId, TaskState, TaskStatus, TaskSummary};
use opsplan_core::error::{AppError, Result};
use opsplan_core::port::{TaskStateRepository, TimeProvider};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;

pub struct SqliteTaskStateRepository {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteTaskStateRepository {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }
}

#[async_trait]
impl TaskStateRepository for SqliteTaskStateRepository {
    async fn insert(&self, state: &TaskState) -> Result<()> {
        let state_json = serde_json::to_string(state)?;

        sqlx::query(
            r#"
            INSERT INTO task_states (
                task_id, task, status, current_step, total_steps,
                start_time, end_time, version, state_json, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&state.task_id)
        .bind(&state.task)
        .bind(state.status.as_str())
        .bind(state.current_step as i64)
        .bind(state.total_steps as i64)
        .bind(state.start_time)
        .bind(state.end_time)
        .bind(state.version as i64)
        .bind(&state_json)
        .bind(self.time_provider.now_millis())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn find_by_id(&self, task_id: &TaskId) -> Result<Option<TaskState>> {
        let row = sqlx::query_as::<_, TaskStateRow>(
            "SELECT version, state_json FROM task_states WHERE task_id = ?",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(TaskStateRow::into_state).transpose()
    }

    async fn update(&self, state: &TaskState, expected_version: u64) -> Result<bool> {
        let state_json = serde_json::to_string(state)?;

        // Compare-and-swap on version; terminal rows are frozen
        let result = sqlx::query(
            r#"
            UPDATE task_states
            SET task = ?, status = ?, current_step = ?, total_steps = ?,
                end_time = ?, version = ?, state_json = ?, updated_at = ?
            WHERE task_id = ?
              AND version = ?
              AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(&state.task)
        .bind(state.status.as_str())
        .bind(state.current_step as i64)
        .bind(state.total_steps as i64)
        .bind(state.end_time)
        .bind(state.version as i64)
        .bind(&state_json)
        .bind(self.time_provider.now_millis())
        .bind(&state.task_id)
        .bind(expected_version as i64)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let written = result.rows_affected() == 1;
        if !written {
            debug!(
                task_id = %state.task_id,
                expected_version = expected_version,
                "Conditional update matched no row"
            );
        }
        Ok(written)
    }

    async fn find_by_status(&self, status: TaskStatus) -> Result<Vec<TaskState>> {
        let rows = sqlx::query_as::<_, TaskStateRow>(
            "SELECT version, state_json FROM task_states WHERE status = ? ORDER BY start_time ASC",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(TaskStateRow::into_state).collect()
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<TaskSummary>> {
        let rows = sqlx::query_as::<_, TaskSummaryRow>(
            r#"
            SELECT task_id, task, status, current_step, total_steps, start_time, end_time
            FROM task_states
            ORDER BY start_time DESC, task_id DESC
            LIMIT ?
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(TaskSummaryRow::into_summary).collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TaskStateRow {
    version: i64,
    state_json: String,
}

impl TaskStateRow {
    fn into_state(self) -> Result<TaskState> {
        let mut state: TaskState = serde_json::from_str(&self.state_json)?;
        // The column is what the compare-and-swap checks
        state.version = self.version as u64;
        Ok(state)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TaskSummaryRow {
    task_id: String,
    task: String,
    status: String,
    current_step: i64,
    total_steps: i64,
    start_time: i64,
    end_time: Option<i64>,
}

impl TaskSummaryRow {
    fn into_summary(self) -> Result<TaskSummary> {
        let status = TaskStatus::parse(&self.status).ok_or_else(|| {
            AppError::Database(format!(
                "Unknown status '{}' for task {}",
                self.status, self.task_id
            ))
        })?;

        Ok(TaskSummary {
            task_id: self.task_id,
            task: self.task,
            status,
            current_step: self.current_step as usize,
            total_steps: self.total_steps as usize,
            start_time: self.start_time,
            end_time: self.end_time,
        })
    }
}
