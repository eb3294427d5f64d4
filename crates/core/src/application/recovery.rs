// Crash recovery logic
use crate::application::state_store::TaskStateStore;
use crate::domain::{Role, TaskStatus};
use std::sync::Arc;
use tracing::{info, warn};

/// Conversation entry left on tasks closed by recovery
pub const INTERRUPTED_MESSAGE: &str = "Task interrupted: the engine restarted before it finished";

/// Crash recovery service
///
/// On daemon startup, tasks still `initializing` or `running` belong to a
/// process that is gone. Nothing resumes them, so they are closed as `failed`.
pub struct RecoveryService {
    store: Arc<TaskStateStore>,
}

impl RecoveryService {
    pub fn new(store: Arc<TaskStateStore>) -> Self {
        Self { store }
    }

    /// Fail every non-terminal task
    ///
    /// # Returns
    /// Number of tasks recovered
    pub async fn recover_interrupted_tasks(&self) -> crate::error::Result<usize> {
        info!("Starting interrupted task recovery");

        let mut recovered_count = 0;
        for status in [TaskStatus::Initializing, TaskStatus::Running] {
            for state in self.store.find_by_status(status).await? {
                info!(
                    task_id = %state.task_id,
                    status = %state.status,
                    current_step = state.current_step,
                    total_steps = state.total_steps,
                    "Recovering interrupted task"
                );

                self.store
                    .append_conversation(&state.task_id, Role::System, INTERRUPTED_MESSAGE)
                    .await?;
                if self.store.complete(&state.task_id, false).await? {
                    recovered_count += 1;
                } else {
                    warn!(task_id = %state.task_id, "Task finished while being recovered");
                }
            }
        }

        info!(recovered_count = %recovered_count, "Interrupted task recovery complete");
        Ok(recovered_count)
    }
}
