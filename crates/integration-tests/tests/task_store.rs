//! Task state persistence against a real SQLite database
//!
//! Covers the durable record: round trips, optimistic versioning under
//! concurrent writers, frozen terminal records, restart recovery.

use std::sync::Arc;

use opsplan_core::application::recovery::INTERRUPTED_MESSAGE;
use opsplan_core::application::{RecoveryService, TaskStateStore};
use opsplan_core::domain::{
    Adaptation, CommandResult, Plan, PlanResult, Role, Step, TaskStatus,
};
use opsplan_core::port::time_provider::SystemTimeProvider;
use opsplan_infra_sqlite::{create_pool, run_migrations, SqliteTaskStateRepository};
use serde_json::json;

async fn open_store(url: &str) -> TaskStateStore {
    let pool = create_pool(url).await.unwrap();
    run_migrations(&pool).await.unwrap();
    let time_provider = Arc::new(SystemTimeProvider);
    TaskStateStore::new(
        Arc::new(SqliteTaskStateRepository::new(pool, time_provider.clone())),
        time_provider,
    )
}

fn file_url(dir: &tempfile::TempDir) -> String {
    format!("sqlite://{}", dir.path().join("opsplan.db").display())
}

#[tokio::test]
async fn test_full_record_round_trip() {
    let store = open_store("sqlite::memory:").await;
    let plan = Plan::new("install nginx")
        .with_step(Step::new("install", ["apt-get install -y nginx"]).analyzed())
        .with_verification("systemctl is-active nginx");

    store.create("t1", "install nginx").await.unwrap();
    store
        .append_conversation("t1", Role::User, "install nginx")
        .await
        .unwrap();
    store.set_variable("t1", "vm_id", json!("web-1")).await.unwrap();
    store.update_plan("t1", plan.clone()).await.unwrap();
    store.update_step("t1", 1).await.unwrap();
    store
        .record_command(
            "t1",
            CommandResult::completed("apt-get install -y nginx", 0, "done", "", 3.25),
        )
        .await
        .unwrap();
    store
        .record_adaptation(
            "t1",
            Adaptation {
                original_command: "nginx -v".to_string(),
                error: "nginx: command not found".to_string(),
                adaptation_reason: "Installing missing package nginx".to_string(),
                adapted_command: Some("apt-get install -y nginx".to_string()),
                diagnostic: false,
            },
        )
        .await
        .unwrap();
    let mut result = PlanResult::new("install nginx", 1);
    result.steps_executed = 1;
    result.success = true;
    store.record_plan_result("t1", result.clone()).await.unwrap();
    store.complete("t1", true).await.unwrap();

    let state = store.get("t1").await.unwrap();
    assert_eq!(state.status, TaskStatus::Completed);
    assert_eq!(state.execution_plan, Some(plan));
    assert_eq!(state.total_steps, 1);
    assert_eq!(state.current_step, 1);
    assert_eq!(state.variable("vm_id"), Some(&json!("web-1")));
    assert_eq!(state.executed_commands, vec!["apt-get install -y nginx"]);
    assert_eq!(
        state.command_outputs["apt-get install -y nginx"].execution_time,
        3.25
    );
    assert_eq!(state.adaptations.len(), 1);
    assert_eq!(state.plan_result, Some(result));
    assert_eq!(state.conversation_history[0].role, Role::User);
    assert!(state.end_time.unwrap() >= state.start_time);

    let listed = store.list_tasks(10).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0], state.summary());
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let url = file_url(&dir);

    {
        let store = open_store(&url).await;
        store.create("t1", "check disk space").await.unwrap();
        store.set_variable("t1", "threshold", json!(90)).await.unwrap();
    }

    let store = open_store(&url).await;
    let state = store.get("t1").await.unwrap();
    assert_eq!(state.task, "check disk space");
    assert_eq!(state.variable("threshold"), Some(&json!(90)));
    assert_eq!(state.version, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_lose_no_updates() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(open_store(&file_url(&dir)).await.with_max_attempts(64));
    store.create("t1", "concurrent").await.unwrap();

    let writers: Vec<_> = (0..16)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .set_variable("t1", &format!("key-{}", i), json!(i))
                    .await
            })
        })
        .collect();
    for writer in writers {
        assert!(writer.await.unwrap().unwrap());
    }

    let state = store.get("t1").await.unwrap();
    assert_eq!(state.variables.len(), 16);
    assert_eq!(state.version, 16);
    for i in 0..16 {
        assert_eq!(state.variable(&format!("key-{}", i)), Some(&json!(i)));
    }
}

#[tokio::test]
async fn test_stale_snapshot_cannot_overwrite() {
    let store = open_store("sqlite::memory:").await;
    let mut snapshot = store.create("t1", "check memory").await.unwrap();

    store.set_variable("t1", "newer", json!(true)).await.unwrap();
    snapshot.set_variable("older", json!(true)).unwrap();

    assert!(!store.save(&mut snapshot).await.unwrap());
    let state = store.get("t1").await.unwrap();
    assert!(state.variable("newer").is_some());
    assert!(state.variable("older").is_none());
}

#[tokio::test]
async fn test_terminal_record_is_frozen() {
    let store = open_store("sqlite::memory:").await;
    store.create("t1", "check memory").await.unwrap();
    assert!(store.complete("t1", false).await.unwrap());
    let frozen = store.get("t1").await.unwrap();

    assert!(!store.complete("t1", true).await.unwrap());
    assert!(!store
        .record_command("t1", CommandResult::not_executed("free -h"))
        .await
        .unwrap());
    assert!(!store
        .append_conversation("t1", Role::System, "late")
        .await
        .unwrap());

    let mut stale = frozen.clone();
    stale.status = TaskStatus::Running;
    assert!(!store.save(&mut stale).await.unwrap());

    assert_eq!(store.get("t1").await.unwrap(), frozen);
}

#[tokio::test]
async fn test_restart_recovery_fails_unfinished_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let url = file_url(&dir);

    {
        let store = open_store(&url).await;
        store.create("planned", "restart nginx").await.unwrap();
        store
            .update_plan(
                "planned",
                Plan::new("restart nginx").with_step(Step::new("restart", ["systemctl restart nginx"])),
            )
            .await
            .unwrap();
        store.create("fresh", "check disk").await.unwrap();
        store.create("done", "check memory").await.unwrap();
        store.complete("done", true).await.unwrap();
    }

    let store = Arc::new(open_store(&url).await);
    let recovered = RecoveryService::new(store.clone())
        .recover_interrupted_tasks()
        .await
        .unwrap();
    assert_eq!(recovered, 2);

    for task_id in ["planned", "fresh"] {
        let state = store.get(task_id).await.unwrap();
        assert_eq!(state.status, TaskStatus::Failed);
        assert!(state.end_time.is_some());
        let last = state.conversation_history.last().unwrap();
        assert_eq!(last.role, Role::System);
        assert_eq!(last.content, INTERRUPTED_MESSAGE);
    }
    assert_eq!(store.get("done").await.unwrap().status, TaskStatus::Completed);

    let again = RecoveryService::new(store).recover_interrupted_tasks().await.unwrap();
    assert_eq!(again, 0);
}
