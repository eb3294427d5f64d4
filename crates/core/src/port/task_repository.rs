// Task State Repository Port (Interface)

use crate::domain::{TaskId, TaskState, TaskStatus, TaskSummary};
use crate::error::Result;
use async_trait::async_trait;

/// Persistence for TaskState records, one per task id
#[async_trait]
pub trait TaskStateRepository: Send + Sync {
    /// Insert a new record; fails with `Conflict` if the id exists
    async fn insert(&self, state: &TaskState) -> Result<()>;

    /// Find record by task id
    async fn find_by_id(&self, task_id: &TaskId) -> Result<Option<TaskState>>;

    /// Compare-and-swap write.
    ///
    /// Stores `state` only if the stored record has version `expected_version`
    /// and is not terminal. Returns `false` when nothing was written.
    async fn update(&self, state: &TaskState, expected_version: u64) -> Result<bool>;

    /// All records with the given status (startup recovery)
    async fn find_by_status(&self, status: TaskStatus) -> Result<Vec<TaskState>>;

    /// Newest first
    async fn list_recent(&self, limit: usize) -> Result<Vec<TaskSummary>>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory repository with the same compare-and-swap semantics as SQLite
    #[derive(Default)]
    pub struct InMemoryTaskStateRepository {
        records: Mutex<HashMap<TaskId, TaskState>>,
        /// Number of upcoming `update` calls to reject, simulating a concurrent writer
        forced_conflicts: AtomicUsize,
        fail_writes: Mutex<Option<String>>,
    }

    impl InMemoryTaskStateRepository {
        pub fn new() -> Self {
            Self::default()
        }

        /// Reject the next `n` updates as if another writer got there first
        pub fn force_conflicts(&self, n: usize) {
            self.forced_conflicts.store(n, Ordering::SeqCst);
        }

        /// Make every write fail with a database error
        pub fn fail_writes(&self, message: impl Into<String>) {
            *self.fail_writes.lock().unwrap() = Some(message.into());
        }

        pub fn len(&self) -> usize {
            self.records.lock().unwrap().len()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        fn check_writable(&self) -> Result<()> {
            match self.fail_writes.lock().unwrap().as_ref() {
                Some(msg) => Err(AppError::Database(msg.clone())),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl TaskStateRepository for InMemoryTaskStateRepository {
        async fn insert(&self, state: &TaskState) -> Result<()> {
            self.check_writable()?;
            let mut records = self.records.lock().unwrap();
            if records.contains_key(&state.task_id) {
                return Err(AppError::Conflict(format!(
                    "task already exists: {}",
                    state.task_id
                )));
            }
            records.insert(state.task_id.clone(), state.clone());
            Ok(())
        }

        async fn find_by_id(&self, task_id: &TaskId) -> Result<Option<TaskState>> {
            Ok(self.records.lock().unwrap().get(task_id).cloned())
        }

        async fn update(&self, state: &TaskState, expected_version: u64) -> Result<bool> {
            self.check_writable()?;
            let forced = self
                .forced_conflicts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            if forced.is_ok() {
                return Ok(false);
            }

            let mut records = self.records.lock().unwrap();
            match records.get(&state.task_id) {
                Some(stored) if stored.version == expected_version && !stored.is_terminal() => {
                    records.insert(state.task_id.clone(), state.clone());
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn find_by_status(&self, status: TaskStatus) -> Result<Vec<TaskState>> {
            let mut found: Vec<TaskState> = self
                .records
                .lock()
                .unwrap()
                .values()
                .filter(|s| s.status == status)
                .cloned()
                .collect();
            found.sort_by_key(|s| s.start_time);
            Ok(found)
        }

        async fn list_recent(&self, limit: usize) -> Result<Vec<TaskSummary>> {
            let mut all: Vec<TaskSummary> = self
                .records
                .lock()
                .unwrap()
                .values()
                .map(TaskState::summary)
                .collect();
            all.sort_by(|a, b| b.start_time.cmp(&a.start_time));
            all.truncate(limit);
            Ok(all)
        }
    }
}
