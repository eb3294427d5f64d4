// Port Layer - Interfaces for external dependencies

pub mod command_runner;
pub mod id_provider; // For deterministic testing
pub mod planner;
pub mod task_repository;
pub mod time_provider;

// Re-exports
pub use command_runner::{CommandRunner, ExecutionTargets, StaticTargets};
pub use id_provider::{IdProvider, UuidProvider};
pub use planner::Planner;
pub use task_repository::TaskStateRepository;
pub use time_provider::{SystemTimeProvider, TimeProvider};
