// Plan Executor
//
// Walks a plan step by step. Never returns an error: every failure is
// expressed in the returned PlanResult.

use crate::application::classifier::AdaptationClassifier;
use crate::domain::plan::is_runnable;
use crate::domain::{Adaptation, CommandResult, Plan, PlanResult, Step, StepResult};
use crate::port::CommandRunner;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Progress hooks, called in execution order.
///
/// Step numbers are 1-based.
#[async_trait]
pub trait ExecutionObserver: Send + Sync {
    async fn step_started(&self, _number: usize, _step: &Step) {}

    /// Every command the runner executed, adapted and verification commands included
    async fn command_finished(&self, _result: &CommandResult) {}

    async fn adaptation(&self, _adaptation: &Adaptation) {}

    async fn step_finished(&self, _number: usize, _result: &StepResult) {}

    /// Checked before every command; `false` halts the plan without running
    /// anything further (the current step counts as failed).
    fn should_continue(&self) -> bool {
        true
    }
}

/// Observer that ignores everything
pub struct NoopObserver;

impl ExecutionObserver for NoopObserver {}

pub struct PlanExecutor {
    runner: Arc<dyn CommandRunner>,
    classifier: AdaptationClassifier,
    default_timeout: Duration,
}

impl PlanExecutor {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        classifier: AdaptationClassifier,
        default_timeout: Duration,
    ) -> Self {
        Self {
            runner,
            classifier,
            default_timeout,
        }
    }

    pub async fn execute(&self, plan: &Plan) -> PlanResult {
        self.execute_observed(plan, &NoopObserver).await
    }

    pub async fn execute_observed(
        &self,
        plan: &Plan,
        observer: &dyn ExecutionObserver,
    ) -> PlanResult {
        let mut result = PlanResult::new(plan.task.clone(), plan.total_steps());

        info!(
            task = %plan.task,
            steps_total = result.steps_total,
            "Executing plan"
        );

        for (index, step) in plan.steps.iter().enumerate() {
            let number = index + 1;
            if !observer.should_continue() {
                warn!(step = number, "Observer halted execution");
                break;
            }
            info!(step = number, name = %step.name, "Starting step");
            observer.step_started(number, step).await;

            let step_result = self
                .execute_step(step, &mut result.adaptations, observer)
                .await;
            observer.step_finished(number, &step_result).await;

            let succeeded = step_result.success;
            result.steps_results.push(step_result);

            if !succeeded {
                warn!(step = number, name = %step.name, "Step failed, stopping plan");
                break;
            }
            result.steps_executed += 1;
        }

        let verification = plan
            .verification
            .as_deref()
            .filter(|c| is_runnable(c) && observer.should_continue());
        if let Some(verification) = verification {
            let outcome = self.run(verification, self.default_timeout, observer).await;
            result.verification_result = Some(outcome);
        }

        let verified = result
            .verification_result
            .as_ref()
            .map_or(true, |v| v.success);
        result.success = result.steps_executed == result.steps_total && verified;

        info!(
            task = %plan.task,
            steps_executed = result.steps_executed,
            steps_total = result.steps_total,
            success = result.success,
            "Plan finished"
        );
        result
    }

    async fn execute_step(
        &self,
        step: &Step,
        adaptations: &mut Vec<Adaptation>,
        observer: &dyn ExecutionObserver,
    ) -> StepResult {
        // 0 means "not set"
        let timeout = step
            .timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);
        let mut step_result = StepResult::new(step.name.clone());

        for command in &step.commands {
            if !is_runnable(command) {
                debug!(command = %command, "Skipping blank or comment line");
                continue;
            }
            if !observer.should_continue() {
                step_result.success = false;
                return step_result;
            }

            let outcome = self.run(command, timeout, observer).await;
            let failed = !outcome.success;
            let adaptation = if failed && step.requires_output_analysis {
                self.classifier.classify(command, &outcome)
            } else {
                None
            };
            step_result.commands_executed.push(outcome);

            let mut recovered = false;
            if let Some(adaptation) = adaptation {
                info!(
                    command = %command,
                    reason = %adaptation.adaptation_reason,
                    adapted_command = ?adaptation.adapted_command,
                    "Adapting failed command"
                );
                observer.adaptation(&adaptation).await;

                let adapted = adaptation
                    .adapted_command
                    .as_deref()
                    .filter(|_| observer.should_continue());
                if let Some(adapted) = adapted {
                    let adapted_outcome = self.run(adapted, timeout, observer).await;
                    recovered = adapted_outcome.success && !adaptation.diagnostic;
                    step_result.commands_executed.push(adapted_outcome);
                }
                adaptations.push(adaptation);
            }

            if failed && !recovered {
                step_result.success = false;
                return step_result;
            }
        }

        if let Some(verification) = step.verification.as_deref().filter(|c| is_runnable(c)) {
            if !observer.should_continue() {
                step_result.success = false;
                return step_result;
            }
            let outcome = self.run(verification, timeout, observer).await;
            step_result.success = outcome.success;
            step_result.verification = Some(outcome);
        }

        step_result
    }

    async fn run(
        &self,
        command: &str,
        timeout: Duration,
        observer: &dyn ExecutionObserver,
    ) -> CommandResult {
        let outcome = self.runner.run(command, timeout).await;
        observer.command_finished(&outcome).await;
        outcome
    }
}
