// Task State Domain Model

use crate::domain::error::{DomainError, Result};
use crate::domain::execution::{Adaptation, CommandResult, PlanResult};
use crate::domain::plan::Plan;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Task ID (UUID v4)
pub type TaskId = String;

/// Task status. Transitions only move forward:
/// `Initializing -> Running -> {Completed, Failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Initializing,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Initializing => "initializing",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "initializing" => Some(TaskStatus::Initializing),
            "running" => Some(TaskStatus::Running),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: i64, // epoch ms
}

/// Durable root entity, one per task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    pub task_id: TaskId,
    pub task: String,
    pub status: TaskStatus,
    pub current_step: usize,
    pub total_steps: usize,
    pub start_time: i64,       // epoch ms
    pub end_time: Option<i64>, // epoch ms, set iff terminal

    pub execution_plan: Option<Plan>,
    pub executed_commands: Vec<String>,
    /// Latest result per command string; ordering lives in `executed_commands`
    pub command_outputs: BTreeMap<String, CommandResult>,
    pub variables: BTreeMap<String, serde_json::Value>,
    pub adaptations: Vec<Adaptation>,
    pub conversation_history: Vec<ConversationMessage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_result: Option<PlanResult>,

    /// Optimistic concurrency counter, bumped by every successful save
    #[serde(default)]
    pub version: u64,
}

/// Lightweight listing entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub task_id: TaskId,
    pub task: String,
    pub status: TaskStatus,
    pub current_step: usize,
    pub total_steps: usize,
    pub start_time: i64,
    pub end_time: Option<i64>,
}

impl TaskState {
    /// Create a new task record
    ///
    /// # Arguments
    ///
    /// * `task_id` - Unique task ID (injected, not generated)
    /// * `task` - Natural-language description
    /// * `now_millis` - Creation timestamp (injected, not system time)
    pub fn new(task_id: impl Into<String>, task: impl Into<String>, now_millis: i64) -> Self {
        Self {
            task_id: task_id.into(),
            task: task.into(),
            status: TaskStatus::Initializing,
            current_step: 0,
            total_steps: 0,
            start_time: now_millis,
            end_time: None,
            execution_plan: None,
            executed_commands: Vec::new(),
            command_outputs: BTreeMap::new(),
            variables: BTreeMap::new(),
            adaptations: Vec::new(),
            conversation_history: Vec::new(),
            plan_result: None,
            version: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn ensure_mutable(&self) -> Result<()> {
        if self.is_terminal() {
            return Err(DomainError::TerminalTask(self.task_id.clone()));
        }
        Ok(())
    }

    /// Attach (or replace) the plan and move to `Running`.
    ///
    /// Replacement is only accepted before anything ran, so `total_steps` never
    /// changes under an executing plan.
    pub fn attach_plan(&mut self, plan: Plan) -> Result<()> {
        self.ensure_mutable()?;
        if self.execution_plan.is_some()
            && (self.current_step > 0 || !self.executed_commands.is_empty())
        {
            return Err(DomainError::PlanLocked(self.task_id.clone()));
        }
        self.total_steps = plan.total_steps();
        self.current_step = 0;
        self.execution_plan = Some(plan);
        self.status = TaskStatus::Running;
        Ok(())
    }

    pub fn set_current_step(&mut self, step: usize) -> Result<()> {
        self.ensure_mutable()?;
        if step > self.total_steps {
            return Err(DomainError::StepOutOfRange {
                step,
                total: self.total_steps,
            });
        }
        self.current_step = step;
        Ok(())
    }

    pub fn record_command(&mut self, result: CommandResult) -> Result<()> {
        self.ensure_mutable()?;
        self.executed_commands.push(result.command.clone());
        self.command_outputs.insert(result.command.clone(), result);
        Ok(())
    }

    pub fn record_adaptation(&mut self, adaptation: Adaptation) -> Result<()> {
        self.ensure_mutable()?;
        self.adaptations.push(adaptation);
        Ok(())
    }

    pub fn record_plan_result(&mut self, result: PlanResult) -> Result<()> {
        self.ensure_mutable()?;
        self.plan_result = Some(result);
        Ok(())
    }

    pub fn set_variable(&mut self, key: impl Into<String>, value: serde_json::Value) -> Result<()> {
        self.ensure_mutable()?;
        self.variables.insert(key.into(), value);
        Ok(())
    }

    pub fn variable(&self, key: &str) -> Option<&serde_json::Value> {
        self.variables.get(key)
    }

    pub fn push_message(
        &mut self,
        role: Role,
        content: impl Into<String>,
        now_millis: i64,
    ) -> Result<()> {
        self.ensure_mutable()?;
        self.conversation_history.push(ConversationMessage {
            role,
            content: content.into(),
            timestamp: now_millis,
        });
        Ok(())
    }

    /// Transition to a terminal status with explicit timestamp
    pub fn complete(&mut self, success: bool, now_millis: i64) -> Result<()> {
        let to = if success {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        if self.is_terminal() {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        self.end_time = Some(now_millis);
        Ok(())
    }

    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            task_id: self.task_id.clone(),
            task: self.task.clone(),
            status: self.status,
            current_step: self.current_step,
            total_steps: self.total_steps,
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::plan::Step;

    fn two_step_plan() -> Plan {
        Plan::new("install nginx")
            .with_step(Step::new("install", ["zypper install -y nginx"]))
            .with_step(Step::new("start", ["systemctl start nginx"]))
    }

    #[test]
    fn test_new_task_is_initializing() {
        let state = TaskState::new("task-1", "check memory", 1000);
        assert_eq!(state.status, TaskStatus::Initializing);
        assert_eq!(state.start_time, 1000);
        assert!(state.end_time.is_none());
        assert_eq!(state.version, 0);
    }

    #[test]
    fn test_attach_plan_fixes_total_steps() {
        let mut state = TaskState::new("task-1", "install nginx", 1000);
        state.attach_plan(two_step_plan()).unwrap();

        assert_eq!(state.status, TaskStatus::Running);
        assert_eq!(state.total_steps, 2);
        assert_eq!(state.current_step, 0);
    }

    #[test]
    fn test_replan_rejected_after_execution_started() {
        let mut state = TaskState::new("task-1", "install nginx", 1000);
        state.attach_plan(two_step_plan()).unwrap();
        state.set_current_step(1).unwrap();

        let err = state.attach_plan(Plan::new("other")).unwrap_err();
        assert!(matches!(err, DomainError::PlanLocked(_)));
        assert_eq!(state.total_steps, 2);
    }

    #[test]
    fn test_replan_allowed_before_execution() {
        let mut state = TaskState::new("task-1", "install nginx", 1000);
        state.attach_plan(two_step_plan()).unwrap();
        state
            .attach_plan(Plan::new("smaller").with_step(Step::new("only", ["true"])))
            .unwrap();
        assert_eq!(state.total_steps, 1);
    }

    #[test]
    fn test_current_step_bounded_by_total() {
        let mut state = TaskState::new("task-1", "install nginx", 1000);
        state.attach_plan(two_step_plan()).unwrap();

        assert!(state.set_current_step(2).is_ok());
        assert!(matches!(
            state.set_current_step(3),
            Err(DomainError::StepOutOfRange { step: 3, total: 2 })
        ));
    }

    #[test]
    fn test_command_outputs_keep_latest_result() {
        let mut state = TaskState::new("task-1", "probe", 1000);
        state
            .record_command(CommandResult::completed("systemctl is-active nginx", 3, "", "", 0.1))
            .unwrap();
        state
            .record_command(CommandResult::completed("systemctl is-active nginx", 0, "active", "", 0.1))
            .unwrap();

        assert_eq!(state.executed_commands.len(), 2);
        assert_eq!(state.command_outputs.len(), 1);
        assert_eq!(state.command_outputs["systemctl is-active nginx"].exit_code, 0);
    }

    #[test]
    fn test_complete_sets_end_time_once() {
        let mut state = TaskState::new("task-1", "check disk", 1000);
        state.complete(false, 5000).unwrap();

        assert_eq!(state.status, TaskStatus::Failed);
        assert_eq!(state.end_time, Some(5000));

        let err = state.complete(true, 6000).unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
        assert_eq!(state.end_time, Some(5000));
    }

    #[test]
    fn test_terminal_task_rejects_mutation() {
        let mut state = TaskState::new("task-1", "check disk", 1000);
        state.complete(true, 2000).unwrap();

        assert!(state.set_variable("vm_id", serde_json::json!("vm-1")).is_err());
        assert!(state.push_message(Role::User, "again", 3000).is_err());
        assert!(state.attach_plan(two_step_plan()).is_err());
        assert!(state.variables.is_empty());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&TaskStatus::Initializing).unwrap();
        assert_eq!(json, "\"initializing\"");
        assert_eq!(TaskStatus::parse("failed"), Some(TaskStatus::Failed));
        assert_eq!(TaskStatus::parse("FAILED"), None);
    }
}
