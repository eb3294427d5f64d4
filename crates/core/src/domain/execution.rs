// Execution Result Models

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exit code for a command that never ran (spawn failure, transport error)
pub const EXIT_NOT_RUN: i32 = -1;

/// Exit code for a command killed on timeout (matches `timeout(1)`)
pub const EXIT_TIMEOUT: i32 = 124;

/// Prefix of the stdout sentinel returned when nothing was actually executed
pub const NOT_EXECUTED_MARKER: &str = "[NOT EXECUTED]";

/// Normalized outcome of one command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub command: String,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// Wall-clock seconds
    pub execution_time: f64,
}

impl CommandResult {
    /// Result of a process that ran to completion
    pub fn completed(
        command: impl Into<String>,
        exit_code: i32,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        execution_time: f64,
    ) -> Self {
        Self {
            command: command.into(),
            success: exit_code == 0,
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
            execution_time,
        }
    }

    pub fn timed_out(command: impl Into<String>, timeout: Duration, execution_time: f64) -> Self {
        Self {
            command: command.into(),
            success: false,
            stdout: String::new(),
            stderr: format!("Command timed out after {} seconds", timeout.as_secs_f64()),
            exit_code: EXIT_TIMEOUT,
            execution_time,
        }
    }

    pub fn internal_error(command: impl Into<String>, message: impl AsRef<str>) -> Self {
        Self {
            command: command.into(),
            success: false,
            stdout: String::new(),
            stderr: format!("Error executing command: {}", message.as_ref()),
            exit_code: EXIT_NOT_RUN,
            execution_time: 0.0,
        }
    }

    /// Same shape for dry-run and simulation; the mode only shows up in logs.
    pub fn not_executed(command: impl Into<String>) -> Self {
        let command = command.into();
        Self {
            stdout: format!("{} Command would be executed: {}", NOT_EXECUTED_MARKER, command),
            command,
            success: true,
            stderr: String::new(),
            exit_code: 0,
            execution_time: 0.0,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.exit_code == EXIT_TIMEOUT
    }

    pub fn was_executed(&self) -> bool {
        !self.stdout.starts_with(NOT_EXECUTED_MARKER)
    }
}

/// Substitute command proposed for a classified failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adaptation {
    pub original_command: String,
    pub error: String,
    pub adaptation_reason: String,
    /// `None` means no recovery is available
    pub adapted_command: Option<String>,
    /// Probe that explains the failure; its success never recovers the original
    #[serde(default)]
    pub diagnostic: bool,
}

impl Adaptation {
    pub fn is_recovery(&self) -> bool {
        self.adapted_command.is_some() && !self.diagnostic
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub name: String,
    pub commands_executed: Vec<CommandResult>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<CommandResult>,
}

impl StepResult {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            commands_executed: Vec::new(),
            success: true,
            verification: None,
        }
    }

    /// Last failing command (or failing verification) of this step
    pub fn failure(&self) -> Option<&CommandResult> {
        if self.success {
            return None;
        }
        self.verification
            .as_ref()
            .filter(|v| !v.success)
            .or_else(|| self.commands_executed.iter().rev().find(|c| !c.success))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    pub task: String,
    pub steps_executed: usize,
    pub steps_total: usize,
    pub success: bool,
    pub steps_results: Vec<StepResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_result: Option<CommandResult>,
    #[serde(default)]
    pub adaptations: Vec<Adaptation>,
}

impl PlanResult {
    pub fn new(task: impl Into<String>, steps_total: usize) -> Self {
        Self {
            task: task.into(),
            steps_executed: 0,
            steps_total,
            success: false,
            steps_results: Vec::new(),
            verification_result: None,
            adaptations: Vec::new(),
        }
    }

    /// The step result that stopped the plan, if any
    pub fn failed_step(&self) -> Option<&StepResult> {
        self.steps_results.iter().find(|s| !s.success)
    }

    /// Every command result in execution order, verifications included
    pub fn command_results(&self) -> impl Iterator<Item = &CommandResult> {
        self.steps_results
            .iter()
            .flat_map(|s| s.commands_executed.iter().chain(s.verification.iter()))
            .chain(self.verification_result.iter())
    }
}
