//! OpsPlan Task Engine - Main Entry Point
//! Reads task requests from stdin, plans and runs them, reports on stdout

mod intake;
mod settings;

use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use opsplan_core::application::{
    AdaptationClassifier, FallbackPlanner, RecoveryService, TaskLifecycleCoordinator,
    TaskStateStore,
};
use opsplan_core::port::id_provider::UuidProvider;
use opsplan_core::port::time_provider::{SystemTimeProvider, TimeProvider};
use opsplan_infra_sqlite::{create_pool, run_migrations, SqliteTaskStateRepository};
use opsplan_infra_system::{HostTargets, ShellCommandRunner};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Console logs go to stderr (stdout carries task events); optional daily
/// rolling JSON file under `OPSPLAN_LOG_DIR`.
fn init_logging() -> Result<Option<WorkerGuard>> {
    let log_format = std::env::var("OPSPLAN_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("opsplan=info"))?;

    let (file_layer, guard) = match std::env::var("OPSPLAN_LOG_DIR") {
        Ok(dir) => {
            let appender =
                tracing_appender::rolling::daily(shellexpand::tilde(&dir).into_owned(), "opsplan.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().json().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        Err(_) => (None, None),
    };

    match log_format.as_str() {
        "json" => {
            // Production: JSON structured logging
            tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            // Development: Pretty formatting with colors
            tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer)
                .with(fmt::layer().pretty().with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(guard)
}

/// Wait for every reporter (i.e. every accepted task) to finish
async fn drain(reporters: &mut JoinSet<()>) {
    while let Some(joined) = reporters.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Task reporter failed");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize logging
    let _log_guard = init_logging()?;
    info!("OpsPlan Task Engine v{} starting...", VERSION);

    // 2. Load configuration
    let settings = settings::load()?;
    let engine = &settings.engine;
    info!(
        mode = %engine.mode,
        database_url = %settings.database_url,
        config_file = ?settings.config_file,
        remote = engine.remote.is_some(),
        "Configuration loaded"
    );

    // 3. Initialize database
    let pool = create_pool(&settings.database_url)
        .await
        .map_err(|e| anyhow!("DB pool creation failed: {}", e))?;
    run_migrations(&pool)
        .await
        .map_err(|e| anyhow!("Migration failed: {}", e))?;

    // 4. Setup dependencies (DI wiring)
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let repo = Arc::new(SqliteTaskStateRepository::new(
        pool.clone(),
        time_provider.clone(),
    ));
    let store = Arc::new(
        TaskStateStore::new(repo, time_provider.clone())
            .with_max_attempts(engine.max_conflict_retries),
    );

    // 5. Run crash recovery
    info!("Running crash recovery...");
    match RecoveryService::new(store.clone())
        .recover_interrupted_tasks()
        .await
    {
        Ok(count) => info!(recovered_tasks = count, "Crash recovery completed"),
        Err(e) => error!(error = ?e, "Crash recovery failed"),
    }

    let local_runner = Arc::new(ShellCommandRunner::new(
        engine.mode,
        engine.shell.clone(),
        time_provider.clone(),
    ));
    let targets = Arc::new(HostTargets::new(
        local_runner,
        engine.mode,
        engine.remote.clone(),
    ));
    let coordinator = TaskLifecycleCoordinator::new(
        store,
        Arc::new(FallbackPlanner),
        targets,
        Arc::new(UuidProvider),
        AdaptationClassifier::new(engine.classifier.clone()),
        engine.command_timeout(),
    );

    // 6. Intake loop
    info!("System ready. Reading task requests from stdin");
    let mut reporters = JoinSet::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut interrupted = false;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                interrupted = true;
                break;
            }
            line = lines.next_line() => {
                match line? {
                    Some(line) => intake::submit(&coordinator, &line, &mut reporters).await,
                    None => {
                        info!(pending_tasks = reporters.len(), "Input closed, waiting for running tasks");
                        break;
                    }
                }
            }
        }
    }

    // 7. Graceful shutdown
    if !interrupted {
        tokio::select! {
            _ = drain(&mut reporters) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                interrupted = true;
            }
        }
    }
    if interrupted
        && tokio::time::timeout(SHUTDOWN_GRACE, drain(&mut reporters))
            .await
            .is_err()
    {
        // Left non-terminal; the next start fails them during recovery
        warn!(
            pending_tasks = reporters.len(),
            "Tasks still running at shutdown"
        );
    }

    pool.close().await;
    info!("Shutdown complete.");

    Ok(())
}
