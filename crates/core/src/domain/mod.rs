// Domain Layer - Pure business logic and entities

pub mod error;
pub mod execution;
pub mod plan;
pub mod task;

// Re-exports
pub use error::DomainError;
pub use execution::{
    Adaptation, CommandResult, PlanResult, StepResult, EXIT_NOT_RUN, EXIT_TIMEOUT,
    NOT_EXECUTED_MARKER,
};
pub use plan::{Plan, Step};
pub use task::{ConversationMessage, Role, TaskId, TaskState, TaskStatus, TaskSummary};
