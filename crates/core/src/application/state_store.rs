// Task State Store
//
// Read-modify-write operations over the repository port. Every write is a
// compare-and-swap on the record version; a lost race reloads and retries.

use crate::application::constants::DEFAULT_MAX_CONFLICT_RETRIES;
use crate::domain::{
    Adaptation, CommandResult, DomainError, Plan, PlanResult, Role, TaskId, TaskState, TaskStatus,
    TaskSummary,
};
use crate::error::{AppError, Result};
use crate::port::{TaskStateRepository, TimeProvider};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct TaskStateStore {
    repo: Arc<dyn TaskStateRepository>,
    time_provider: Arc<dyn TimeProvider>,
    max_attempts: u32,
}

impl TaskStateStore {
    pub fn new(repo: Arc<dyn TaskStateRepository>, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            repo,
            time_provider,
            max_attempts: DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }

    /// Attempts per mutator before giving up with `Conflict` (minimum 1)
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Create and persist a fresh `initializing` record
    pub async fn create(&self, task_id: &str, task: &str) -> Result<TaskState> {
        self.create_with(task_id, task, |_, _| Ok(())).await
    }

    /// Create a record whose initial contents are filled in by `seed` before
    /// the single insert; nothing is persisted if `seed` fails.
    pub async fn create_with<F>(&self, task_id: &str, task: &str, seed: F) -> Result<TaskState>
    where
        F: FnOnce(&mut TaskState, i64) -> crate::domain::error::Result<()>,
    {
        let now = self.time_provider.now_millis();
        let mut state = TaskState::new(task_id, task, now);
        seed(&mut state, now)?;
        self.repo.insert(&state).await?;
        info!(task_id = %task_id, "Task state created");
        Ok(state)
    }

    pub async fn get(&self, task_id: &str) -> Result<TaskState> {
        self.repo
            .find_by_id(&task_id.to_string())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("task {}", task_id)))
    }

    /// Write a whole record.
    ///
    /// Succeeds only if `state.version` still matches the stored record; the
    /// version is bumped in place on success. Returns `false` on a stale
    /// version, a missing record or a terminal stored record.
    pub async fn save(&self, state: &mut TaskState) -> Result<bool> {
        let expected = state.version;
        state.version = expected + 1;
        let written = self.repo.update(state, expected).await?;
        if !written {
            state.version = expected;
            debug!(task_id = %state.task_id, version = expected, "Save rejected");
        }
        Ok(written)
    }

    pub async fn record_command(&self, task_id: &str, result: CommandResult) -> Result<bool> {
        self.mutate(task_id, "record_command", |state| {
            state.record_command(result.clone())
        })
        .await
    }

    pub async fn record_adaptation(&self, task_id: &str, adaptation: Adaptation) -> Result<bool> {
        self.mutate(task_id, "record_adaptation", |state| {
            state.record_adaptation(adaptation.clone())
        })
        .await
    }

    pub async fn set_variable(
        &self,
        task_id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<bool> {
        self.mutate(task_id, "set_variable", |state| {
            state.set_variable(key, value.clone())
        })
        .await
    }

    /// `None` for a missing task or a missing key
    pub async fn get_variable(&self, task_id: &str, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self
            .repo
            .find_by_id(&task_id.to_string())
            .await?
            .and_then(|state| state.variable(key).cloned()))
    }

    pub async fn append_conversation(&self, task_id: &str, role: Role, content: &str) -> Result<bool> {
        self.mutate(task_id, "append_conversation", |state| {
            state.push_message(role, content, self.time_provider.now_millis())
        })
        .await
    }

    /// Attach the plan, fix `total_steps` and move to `running`
    pub async fn update_plan(&self, task_id: &str, plan: Plan) -> Result<bool> {
        self.mutate(task_id, "update_plan", |state| state.attach_plan(plan.clone()))
            .await
    }

    /// 1-based number of the step being executed
    pub async fn update_step(&self, task_id: &str, step: usize) -> Result<bool> {
        self.mutate(task_id, "update_step", |state| state.set_current_step(step))
            .await
    }

    pub async fn record_plan_result(&self, task_id: &str, result: PlanResult) -> Result<bool> {
        self.mutate(task_id, "record_plan_result", |state| {
            state.record_plan_result(result.clone())
        })
        .await
    }

    /// Terminal transition; `false` if the task is missing or already terminal
    pub async fn complete(&self, task_id: &str, success: bool) -> Result<bool> {
        let completed = self
            .mutate(task_id, "complete", |state| {
                state.complete(success, self.time_provider.now_millis())
            })
            .await?;
        if completed {
            info!(task_id = %task_id, success = success, "Task completed");
        }
        Ok(completed)
    }

    /// Newest first
    pub async fn list_tasks(&self, limit: usize) -> Result<Vec<TaskSummary>> {
        self.repo.list_recent(limit).await
    }

    pub async fn find_by_status(&self, status: TaskStatus) -> Result<Vec<TaskState>> {
        self.repo.find_by_status(status).await
    }

    async fn mutate<F>(&self, task_id: &str, operation: &'static str, mut apply: F) -> Result<bool>
    where
        F: FnMut(&mut TaskState) -> crate::domain::error::Result<()>,
    {
        let id = task_id.to_string();

        for attempt in 1..=self.max_attempts {
            let Some(mut state) = self.repo.find_by_id(&id).await? else {
                debug!(task_id = %task_id, operation, "Task not found");
                return Ok(false);
            };
            if state.is_terminal() {
                debug!(task_id = %task_id, operation, status = %state.status, "Task is terminal");
                return Ok(false);
            }

            match apply(&mut state) {
                Ok(()) => {}
                Err(DomainError::TerminalTask(_)) => return Ok(false),
                Err(e) => return Err(e.into()),
            }

            if self.save(&mut state).await? {
                return Ok(true);
            }
            debug!(task_id = %task_id, operation, attempt, "Version conflict, retrying");
        }

        warn!(
            task_id = %task_id,
            operation,
            attempts = self.max_attempts,
            "Giving up after repeated version conflicts"
        );
        Err(AppError::Conflict(format!(
            "{} on task {} lost {} consecutive races",
            operation, task_id, self.max_attempts
        )))
    }
}
