// Task Lifecycle Coordinator
//
// Single entry point for creating tasks. Planning and execution run in a
// detached tokio task per task; whatever happens there, the task ends in a
// terminal status.

use crate::application::classifier::AdaptationClassifier;
use crate::application::constants::VM_ID_VARIABLE;
use crate::application::executor::{ExecutionObserver, PlanExecutor};
use crate::application::fallback_planner::fallback_plan;
use crate::application::state_store::TaskStateStore;
use crate::domain::{Adaptation, CommandResult, Plan, PlanResult, Role, Step, StepResult, TaskId};
use crate::error::{AppError, Result};
use crate::port::{ExecutionTargets, IdProvider, Planner};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Handle to a task whose planning/execution runs in the background
pub struct TaskTicket {
    pub task_id: TaskId,
    handle: JoinHandle<()>,
}

impl TaskTicket {
    /// Wait until the task reached a terminal status
    pub async fn finished(self) {
        if let Err(e) = self.handle.await {
            error!(task_id = %self.task_id, error = %e, "Task supervisor aborted");
        }
    }
}

#[derive(Clone)]
pub struct TaskLifecycleCoordinator {
    store: Arc<TaskStateStore>,
    planner: Arc<dyn Planner>,
    targets: Arc<dyn ExecutionTargets>,
    id_provider: Arc<dyn IdProvider>,
    classifier: AdaptationClassifier,
    command_timeout: Duration,
}

impl TaskLifecycleCoordinator {
    pub fn new(
        store: Arc<TaskStateStore>,
        planner: Arc<dyn Planner>,
        targets: Arc<dyn ExecutionTargets>,
        id_provider: Arc<dyn IdProvider>,
        classifier: AdaptationClassifier,
        command_timeout: Duration,
    ) -> Self {
        Self {
            store,
            planner,
            targets,
            id_provider,
            classifier,
            command_timeout,
        }
    }

    pub fn store(&self) -> &Arc<TaskStateStore> {
        &self.store
    }

    /// Persist a new task and start planning (and, if `execute`, execution)
    /// in the background.
    pub async fn create_task(&self, description: &str, execute: bool) -> Result<TaskTicket> {
        self.create_task_with(description, execute, BTreeMap::new())
            .await
    }

    /// Like [`create_task`](Self::create_task), seeding task variables first
    /// (`vm_id` selects a remote target).
    pub async fn create_task_with(
        &self,
        description: &str,
        execute: bool,
        variables: BTreeMap<String, serde_json::Value>,
    ) -> Result<TaskTicket> {
        let description = description.trim();
        if description.is_empty() {
            return Err(AppError::Validation(
                "task description cannot be empty".to_string(),
            ));
        }

        let task_id = self.id_provider.generate_id();
        self.store
            .create_with(&task_id, description, |state, now| {
                state.push_message(Role::User, description, now)?;
                for (key, value) in variables {
                    state.set_variable(key, value)?;
                }
                Ok(())
            })
            .await?;

        info!(task_id = %task_id, execute = execute, "Task created");

        let this = self.clone();
        let id = task_id.clone();
        let handle = tokio::spawn(async move { this.supervise(id, execute).await });

        Ok(TaskTicket { task_id, handle })
    }

    /// Runs the task in its own tokio task so a panic anywhere below ends as
    /// `failed` instead of leaving the record `running`.
    async fn supervise(&self, task_id: TaskId, execute: bool) {
        let this = self.clone();
        let id = task_id.clone();
        let outcome = tokio::spawn(async move { this.run_task(&id, execute).await }).await;

        let failure = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(e)) => {
                error!(task_id = %task_id, error = %e, "Task failed");
                format!("Task execution failed: {}", e)
            }
            Err(join_err) if join_err.is_panic() => {
                error!(task_id = %task_id, "Task panicked");
                "Task execution panicked".to_string()
            }
            Err(join_err) => {
                warn!(task_id = %task_id, error = %join_err, "Task cancelled");
                "Task execution was cancelled".to_string()
            }
        };

        if let Err(e) = self
            .store
            .append_conversation(&task_id, Role::System, &failure)
            .await
        {
            warn!(task_id = %task_id, error = %e, "Failed to record failure message");
        }
        match self.store.complete(&task_id, false).await {
            Ok(true) => {}
            Ok(false) => warn!(task_id = %task_id, "Task was already terminal"),
            Err(e) => error!(task_id = %task_id, error = %e, "Failed to mark task as failed"),
        }
    }

    /// Plan, then execute if requested, then complete.
    pub async fn run_task(&self, task_id: &str, execute: bool) -> Result<()> {
        let state = self.store.get(task_id).await?;
        let plan = self.obtain_plan(task_id, &state.task).await;

        if !self.store.update_plan(task_id, plan.clone()).await? {
            return Err(AppError::InvalidState(format!(
                "task {} no longer accepts a plan",
                task_id
            )));
        }
        info!(task_id = %task_id, total_steps = plan.total_steps(), "Plan attached");

        if !execute {
            info!(task_id = %task_id, "Plan only, skipping execution");
            self.store.complete(task_id, true).await?;
            return Ok(());
        }

        let target = self
            .store
            .get_variable(task_id, VM_ID_VARIABLE)
            .await?
            .and_then(|v| v.as_str().map(str::to_string));
        let runner = self.targets.runner_for(target.as_deref());
        let executor = PlanExecutor::new(runner, self.classifier.clone(), self.command_timeout);

        let observer = StoreObserver::new(Arc::clone(&self.store), task_id);
        let result = executor.execute_observed(&plan, &observer).await;
        let summary = summarize(&result);
        let success = result.success;

        if let Err(progress) = observer.into_result() {
            // Keep what did run; the supervisor fails the task
            if let Err(e) = self.store.record_plan_result(task_id, result).await {
                warn!(task_id = %task_id, error = %e, "Failed to record partial plan result");
            }
            return Err(progress);
        }

        self.store.record_plan_result(task_id, result).await?;
        self.store
            .append_conversation(task_id, Role::Assistant, &summary)
            .await?;
        self.store.complete(task_id, success).await?;
        Ok(())
    }

    async fn obtain_plan(&self, task_id: &str, description: &str) -> Plan {
        match self.planner.generate_plan(description, None).await {
            Ok(plan) if plan.total_steps() > 0 => plan,
            Ok(_) => {
                warn!(task_id = %task_id, "Planner returned no steps, using fallback plan");
                fallback_plan(description)
            }
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Planner failed, using fallback plan");
                fallback_plan(description)
            }
        }
    }
}

fn summarize(result: &PlanResult) -> String {
    let mut summary = format!(
        "Executed {}/{} steps of '{}': {}",
        result.steps_executed,
        result.steps_total,
        result.task,
        if result.success { "succeeded" } else { "failed" }
    );
    if let Some(failed) = result.failed_step().and_then(StepResult::failure) {
        let stderr = failed.stderr.trim();
        if stderr.is_empty() {
            summary.push_str(&format!(" (`{}` exited {})", failed.command, failed.exit_code));
        } else {
            summary.push_str(&format!(
                " (`{}` exited {}: {})",
                failed.command, failed.exit_code, stderr
            ));
        }
    }
    summary
}

/// Mirrors execution progress into the task record while the plan runs.
///
/// The first persistence problem halts the plan and is reported after
/// execution.
struct StoreObserver {
    store: Arc<TaskStateStore>,
    task_id: TaskId,
    first_error: Mutex<Option<AppError>>,
}

impl StoreObserver {
    fn new(store: Arc<TaskStateStore>, task_id: &str) -> Self {
        Self {
            store,
            task_id: task_id.to_string(),
            first_error: Mutex::new(None),
        }
    }

    fn note(&self, outcome: Result<bool>) {
        let problem = match outcome {
            Ok(true) => return,
            Ok(false) => AppError::InvalidState(format!(
                "task {} stopped accepting progress updates",
                self.task_id
            )),
            Err(e) => e,
        };
        if let Ok(mut slot) = self.first_error.lock() {
            if slot.is_none() {
                warn!(task_id = %self.task_id, error = %problem, "Progress update failed");
                *slot = Some(problem);
            }
        }
    }

    fn healthy(&self) -> bool {
        self.first_error
            .lock()
            .map(|slot| slot.is_none())
            .unwrap_or(false)
    }

    fn into_result(self) -> Result<()> {
        match self.first_error.into_inner() {
            Ok(Some(e)) => Err(e),
            Ok(None) => Ok(()),
            Err(_) => Err(AppError::Internal("progress observer poisoned".to_string())),
        }
    }
}

#[async_trait]
impl ExecutionObserver for StoreObserver {
    async fn step_started(&self, number: usize, _step: &Step) {
        let outcome = self.store.update_step(&self.task_id, number).await;
        self.note(outcome);
    }

    async fn command_finished(&self, result: &CommandResult) {
        let outcome = self.store.record_command(&self.task_id, result.clone()).await;
        self.note(outcome);
    }

    async fn adaptation(&self, adaptation: &Adaptation) {
        let outcome = self
            .store
            .record_adaptation(&self.task_id, adaptation.clone())
            .await;
        self.note(outcome);
    }

    fn should_continue(&self) -> bool {
        self.healthy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskStatus, EXIT_TIMEOUT};
    use crate::port::command_runner::mocks::{MockOutcome, ScriptedRunner};
    use crate::port::id_provider::mocks::SequentialIdProvider;
    use crate::port::planner::mocks::{FixedPlanner, UnavailablePlanner};
    use crate::port::task_repository::mocks::InMemoryTaskStateRepository;
    use crate::port::time_provider::mocks::SteppingClock;
    use crate::port::StaticTargets;
    use serde_json::json;

    struct Harness {
        coordinator: TaskLifecycleCoordinator,
        repo: Arc<InMemoryTaskStateRepository>,
        runner: Arc<ScriptedRunner>,
    }

    fn harness(planner: Arc<dyn Planner>, runner: ScriptedRunner) -> Harness {
        let repo = Arc::new(InMemoryTaskStateRepository::new());
        let store = Arc::new(TaskStateStore::new(
            repo.clone(),
            Arc::new(SteppingClock::starting_at(10_000)),
        ));
        let runner = Arc::new(runner);
        let coordinator = TaskLifecycleCoordinator::new(
            store,
            planner,
            Arc::new(StaticTargets::new(runner.clone())),
            Arc::new(SequentialIdProvider::new()),
            AdaptationClassifier::default(),
            Duration::from_secs(5),
        );
        Harness {
            coordinator,
            repo,
            runner,
        }
    }

    #[tokio::test]
    async fn test_plan_only_task_completes_without_running() {
        let h = harness(Arc::new(UnavailablePlanner), ScriptedRunner::new());

        let ticket = h.coordinator.create_task("check memory", false).await.unwrap();
        let task_id = ticket.task_id.clone();
        ticket.finished().await;

        let state = h.coordinator.store().get(&task_id).await.unwrap();
        assert_eq!(state.status, TaskStatus::Completed);
        assert_eq!(state.total_steps, 1);
        assert!(state.executed_commands.is_empty());
        assert_eq!(h.runner.call_count(), 0);
        assert_eq!(state.conversation_history[0].role, Role::User);
        assert_eq!(state.conversation_history[0].content, "check memory");
    }

    #[tokio::test]
    async fn test_executed_task_records_progress() {
        let h = harness(Arc::new(UnavailablePlanner), ScriptedRunner::new());

        let ticket = h.coordinator.create_task("show disk usage", true).await.unwrap();
        let task_id = ticket.task_id.clone();
        ticket.finished().await;

        let state = h.coordinator.store().get(&task_id).await.unwrap();
        assert_eq!(state.status, TaskStatus::Completed);
        assert_eq!(state.current_step, 1);
        assert_eq!(state.executed_commands, vec!["df -h", "echo $?", "df -h"]);
        assert!(state.end_time.is_some());
        assert!(state.plan_result.unwrap().success);
        assert_eq!(state.conversation_history.last().unwrap().role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_nginx_install_adaptation() {
        let plan = Plan::new("install nginx").with_step(
            Step::new("Start nginx", ["nginx -v", "systemctl start nginx"]).analyzed(),
        );
        let h = harness(
            Arc::new(FixedPlanner::new(plan)),
            ScriptedRunner::new().on(
                "nginx -v",
                MockOutcome::FailOnce {
                    exit_code: 127,
                    stderr: "sh: 1: nginx: command not found".to_string(),
                },
            ),
        );

        let ticket = h.coordinator.create_task("install nginx", true).await.unwrap();
        let task_id = ticket.task_id.clone();
        ticket.finished().await;

        let state = h.coordinator.store().get(&task_id).await.unwrap();
        assert_eq!(state.status, TaskStatus::Completed);
        assert_eq!(state.adaptations.len(), 1);
        assert_eq!(
            state.executed_commands,
            vec![
                "nginx -v",
                "sudo apt-get update && sudo apt-get install -y nginx",
                "systemctl start nginx",
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_step_marks_task_failed_with_details() {
        let plan = Plan::new("deploy")
            .with_step(Step::new("prepare", ["echo ready"]))
            .with_step(Step::new("start", ["systemctl start app"]))
            .with_step(Step::new("check", ["curl localhost"]));
        let h = harness(
            Arc::new(FixedPlanner::new(plan)),
            ScriptedRunner::new().fail("systemctl", 5, "Unit app.service not found."),
        );

        let ticket = h.coordinator.create_task("deploy app", true).await.unwrap();
        let task_id = ticket.task_id.clone();
        ticket.finished().await;

        let state = h.coordinator.store().get(&task_id).await.unwrap();
        assert_eq!(state.status, TaskStatus::Failed);
        let result = state.plan_result.unwrap();
        assert_eq!(result.steps_executed, 1);
        assert_eq!(result.steps_results.len(), 2);
        assert_eq!(
            result.failed_step().unwrap().failure().unwrap().stderr,
            "Unit app.service not found."
        );
        assert!(state
            .conversation_history
            .last()
            .unwrap()
            .content
            .contains("Unit app.service not found."));
    }

    #[tokio::test]
    async fn test_timeout_fails_task() {
        let plan = Plan::new("wait").with_step(Step::new("wait", ["sleep 600"]));
        let h = harness(
            Arc::new(FixedPlanner::new(plan)),
            ScriptedRunner::new().on("sleep", MockOutcome::TimeOut),
        );

        let ticket = h.coordinator.create_task("wait a while", true).await.unwrap();
        let task_id = ticket.task_id.clone();
        ticket.finished().await;

        let state = h.coordinator.store().get(&task_id).await.unwrap();
        assert_eq!(state.status, TaskStatus::Failed);
        assert_eq!(state.command_outputs["sleep 600"].exit_code, EXIT_TIMEOUT);
    }

    #[tokio::test]
    async fn test_empty_collaborator_plan_uses_fallback() {
        let planner = Arc::new(FixedPlanner::new(Plan::new("")));
        let h = harness(planner.clone(), ScriptedRunner::new());

        let ticket = h.coordinator.create_task("list processes", false).await.unwrap();
        let task_id = ticket.task_id.clone();
        ticket.finished().await;

        let state = h.coordinator.store().get(&task_id).await.unwrap();
        assert_eq!(planner.requests(), vec!["list processes"]);
        assert_eq!(
            state.execution_plan.unwrap().steps[0].commands,
            vec!["ps aux | head -20"]
        );
    }

    #[tokio::test]
    async fn test_panic_is_isolated_and_task_fails() {
        let plan = Plan::new("boom").with_step(Step::new("boom", ["explode"]));
        let h = harness(
            Arc::new(FixedPlanner::new(plan)),
            ScriptedRunner::new().on("explode", MockOutcome::Panic("runner exploded".to_string())),
        );

        let ticket = h.coordinator.create_task("blow up", true).await.unwrap();
        let task_id = ticket.task_id.clone();
        ticket.finished().await;

        let state = h.coordinator.store().get(&task_id).await.unwrap();
        assert_eq!(state.status, TaskStatus::Failed);
        assert_eq!(state.conversation_history.last().unwrap().role, Role::System);
    }

    #[tokio::test]
    async fn test_persistence_failure_fails_task() {
        let plan = Plan::new("greet").with_step(Step::new("step", ["echo hi"]));
        let h = harness(Arc::new(FixedPlanner::new(plan)), ScriptedRunner::new());

        let ticket = h.coordinator.create_task("say hi", true).await.unwrap();
        // Attaching the plan loses every race within the default budget
        h.repo.force_conflicts(5);
        let task_id = ticket.task_id.clone();
        ticket.finished().await;

        let state = h.coordinator.store().get(&task_id).await.unwrap();
        assert_eq!(state.status, TaskStatus::Failed);
        assert!(state.execution_plan.is_none());
        let last = state.conversation_history.last().unwrap();
        assert_eq!(last.role, Role::System);
        assert!(last.content.contains("Conflict"));
        assert_eq!(h.runner.call_count(), 0);
    }

    #[tokio::test]
    async fn test_seeded_creation_survives_conflicts() {
        let h = harness(Arc::new(UnavailablePlanner), ScriptedRunner::new());
        h.repo.force_conflicts(5);

        let ticket = h
            .coordinator
            .create_task_with(
                "check disk",
                true,
                BTreeMap::from([(VM_ID_VARIABLE.to_string(), json!("vm-9"))]),
            )
            .await
            .unwrap();
        let task_id = ticket.task_id.clone();
        ticket.finished().await;

        let state = h.coordinator.store().get(&task_id).await.unwrap();
        assert!(state.is_terminal());
        assert!(state.end_time.is_some());
        assert_eq!(state.conversation_history[0].role, Role::User);
        assert_eq!(state.conversation_history[0].content, "check disk");
        assert_eq!(state.variable(VM_ID_VARIABLE), Some(&json!("vm-9")));
    }

    /// Makes the store lose every race right after it runs a command
    struct ContendedRunner {
        repo: Arc<InMemoryTaskStateRepository>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl crate::port::CommandRunner for ContendedRunner {
        async fn run(&self, command: &str, _limit: Duration) -> CommandResult {
            self.calls.lock().unwrap().push(command.to_string());
            self.repo.force_conflicts(5);
            CommandResult::completed(command, 0, "ok", "", 0.01)
        }
    }

    #[tokio::test]
    async fn test_lost_progress_halts_and_keeps_plan_result() {
        let repo = Arc::new(InMemoryTaskStateRepository::new());
        let store = Arc::new(TaskStateStore::new(
            repo.clone(),
            Arc::new(SteppingClock::starting_at(0)),
        ));
        let runner = Arc::new(ContendedRunner {
            repo: repo.clone(),
            calls: Mutex::new(Vec::new()),
        });
        let plan = Plan::new("deploy")
            .with_step(Step::new("one", ["echo 1", "echo 2"]))
            .with_step(Step::new("two", ["echo 3"]));
        let coordinator = TaskLifecycleCoordinator::new(
            store,
            Arc::new(FixedPlanner::new(plan)),
            Arc::new(StaticTargets::new(runner.clone())),
            Arc::new(SequentialIdProvider::new()),
            AdaptationClassifier::default(),
            Duration::from_secs(5),
        );

        let ticket = coordinator.create_task("deploy", true).await.unwrap();
        let task_id = ticket.task_id.clone();
        ticket.finished().await;

        assert_eq!(*runner.calls.lock().unwrap(), vec!["echo 1"]);
        let state = coordinator.store().get(&task_id).await.unwrap();
        assert_eq!(state.status, TaskStatus::Failed);
        let result = state.plan_result.expect("partial plan result is kept");
        assert!(!result.success);
        assert_eq!(result.steps_results.len(), 1);
        assert_eq!(result.steps_results[0].commands_executed[0].command, "echo 1");
        let last = state.conversation_history.last().unwrap();
        assert_eq!(last.role, Role::System);
        assert!(last.content.contains("Conflict"));
    }

    #[tokio::test]
    async fn test_remote_target_uses_its_runner() {
        let repo = Arc::new(InMemoryTaskStateRepository::new());
        let store = Arc::new(TaskStateStore::new(
            repo,
            Arc::new(SteppingClock::starting_at(0)),
        ));
        let local = Arc::new(ScriptedRunner::new());
        let remote = Arc::new(ScriptedRunner::new());
        let coordinator = TaskLifecycleCoordinator::new(
            store,
            Arc::new(UnavailablePlanner),
            Arc::new(StaticTargets::new(local.clone()).with_target("vm-42", remote.clone())),
            Arc::new(SequentialIdProvider::new()),
            AdaptationClassifier::default(),
            Duration::from_secs(5),
        );

        let mut variables = BTreeMap::new();
        variables.insert(VM_ID_VARIABLE.to_string(), json!("vm-42"));
        let ticket = coordinator
            .create_task_with("check cpu", true, variables)
            .await
            .unwrap();
        ticket.finished().await;

        assert_eq!(local.call_count(), 0);
        assert_eq!(remote.calls()[0], "top -bn1 | head -20");
    }

    #[tokio::test]
    async fn test_blank_description_is_rejected() {
        let h = harness(Arc::new(UnavailablePlanner), ScriptedRunner::new());
        let err = h.coordinator.create_task("   ", true).await.err().unwrap();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(h.repo.is_empty());
    }
}
