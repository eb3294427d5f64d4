// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid task state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Task {0} is terminal and cannot be modified")]
    TerminalTask(String),

    #[error("Step {step} is out of range (total steps: {total})")]
    StepOutOfRange { step: usize, total: usize },

    #[error("Cannot replace the plan of task {0} after execution started")]
    PlanLocked(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
