// Application Layer - Use Cases and Business Logic

pub mod classifier;
pub mod constants;
pub mod coordinator;
pub mod executor;
pub mod fallback_planner;
pub mod recovery;
pub mod state_store;

// Re-exports
pub use classifier::AdaptationClassifier;
pub use coordinator::{TaskLifecycleCoordinator, TaskTicket};
pub use executor::{ExecutionObserver, NoopObserver, PlanExecutor};
pub use fallback_planner::{fallback_plan, FallbackPlanner};
pub use recovery::RecoveryService;
pub use state_store::TaskStateStore;
