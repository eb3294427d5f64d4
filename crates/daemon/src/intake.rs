//! Task intake: one JSON request per stdin line, one JSON event per stdout line
//!
//! Request: `{"task": "check disk space", "execute": true, "vm_id": "web-1"}`
//! (`execute` defaults to false, `vm_id` is optional).

use opsplan_core::application::constants::VM_ID_VARIABLE;
use opsplan_core::application::TaskLifecycleCoordinator;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskRequest {
    pub task: String,
    #[serde(default)]
    pub execute: bool,
    #[serde(default)]
    pub vm_id: Option<String>,
}

impl TaskRequest {
    /// `Ok(None)` for blank lines
    pub fn parse(line: &str) -> Result<Option<Self>, serde_json::Error> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        serde_json::from_str(line).map(Some)
    }

    pub fn variables(&self) -> BTreeMap<String, Value> {
        self.vm_id
            .iter()
            .map(|vm_id| (VM_ID_VARIABLE.to_string(), Value::String(vm_id.clone())))
            .collect()
    }
}

fn emit(event: Value) {
    println!("{}", event);
}

/// Accept one input line
///
/// A reporter is added to `reporters` for every accepted task; it prints the
/// task summary once the task reached a terminal status.
pub async fn submit(
    coordinator: &TaskLifecycleCoordinator,
    line: &str,
    reporters: &mut JoinSet<()>,
) {
    let request = match TaskRequest::parse(line) {
        Ok(Some(request)) => request,
        Ok(None) => return,
        Err(e) => {
            warn!(error = %e, "Rejected malformed task request");
            emit(json!({"event": "rejected", "error": e.to_string()}));
            return;
        }
    };

    let ticket = match coordinator
        .create_task_with(&request.task, request.execute, request.variables())
        .await
    {
        Ok(ticket) => ticket,
        Err(e) => {
            warn!(task = %request.task, error = %e, "Task creation failed");
            emit(json!({"event": "rejected", "error": e.to_string()}));
            return;
        }
    };

    let task_id = ticket.task_id.clone();
    info!(task_id = %task_id, execute = request.execute, vm_id = ?request.vm_id, "Task accepted");
    emit(json!({"event": "accepted", "task_id": task_id}));

    let store = coordinator.store().clone();
    reporters.spawn(async move {
        ticket.finished().await;
        match store.get(&task_id).await {
            Ok(state) => emit(json!({"event": "finished", "task": state.summary()})),
            Err(e) => error!(task_id = %task_id, error = %e, "Failed to load finished task"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsplan_core::application::{AdaptationClassifier, FallbackPlanner, TaskStateStore};
    use opsplan_core::domain::TaskStatus;
    use opsplan_core::port::command_runner::mocks::ScriptedRunner;
    use opsplan_core::port::id_provider::mocks::SequentialIdProvider;
    use opsplan_core::port::task_repository::mocks::InMemoryTaskStateRepository;
    use opsplan_core::port::time_provider::mocks::SteppingClock;
    use opsplan_core::port::StaticTargets;
    use std::sync::Arc;
    use std::time::Duration;

    fn coordinator() -> TaskLifecycleCoordinator {
        let store = Arc::new(TaskStateStore::new(
            Arc::new(InMemoryTaskStateRepository::new()),
            Arc::new(SteppingClock::starting_at(1_000)),
        ));
        TaskLifecycleCoordinator::new(
            store,
            Arc::new(FallbackPlanner),
            Arc::new(StaticTargets::new(Arc::new(ScriptedRunner::new()))),
            Arc::new(SequentialIdProvider::new()),
            AdaptationClassifier::default(),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_parse_request() {
        let request = TaskRequest::parse(r#"{"task": "check disk space", "execute": true, "vm_id": "web-1"}"#)
            .unwrap()
            .unwrap();

        assert_eq!(request.task, "check disk space");
        assert!(request.execute);
        assert_eq!(
            request.variables().get(VM_ID_VARIABLE),
            Some(&Value::String("web-1".to_string()))
        );
    }

    #[test]
    fn test_parse_defaults_and_blank_lines() {
        let request = TaskRequest::parse(r#"{"task": "list files"}"#).unwrap().unwrap();
        assert!(!request.execute);
        assert!(request.variables().is_empty());

        assert_eq!(TaskRequest::parse("   ").unwrap(), None);
    }

    #[test]
    fn test_parse_rejects_malformed_input() {
        assert!(TaskRequest::parse("check disk space").is_err());
        assert!(TaskRequest::parse(r#"{"execute": true}"#).is_err());
        assert!(TaskRequest::parse(r#"{"task": "x", "run": true}"#).is_err());
    }

    #[tokio::test]
    async fn test_submit_runs_task_to_completion() {
        let coordinator = coordinator();
        let mut reporters = JoinSet::new();

        submit(&coordinator, r#"{"task": "check disk space"}"#, &mut reporters).await;
        assert_eq!(reporters.len(), 1);
        while reporters.join_next().await.is_some() {}

        let state = coordinator.store().get("task-1").await.unwrap();
        assert_eq!(state.status, TaskStatus::Completed);
        assert!(state.executed_commands.is_empty());
    }

    #[tokio::test]
    async fn test_submit_ignores_invalid_lines() {
        let coordinator = coordinator();
        let mut reporters = JoinSet::new();

        submit(&coordinator, "not json", &mut reporters).await;
        submit(&coordinator, "", &mut reporters).await;
        submit(&coordinator, r#"{"task": "   "}"#, &mut reporters).await;

        assert!(reporters.is_empty());
        assert!(coordinator.store().list_tasks(10).await.unwrap().is_empty());
    }
}
