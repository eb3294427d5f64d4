// Local shell command runner
// reason: tokio process for async spawning, nix for process-group kill (ADR-002)
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use opsplan_core::config::ExecutionMode;
use opsplan_core::domain::{CommandResult, EXIT_NOT_RUN};
use opsplan_core::port::{CommandRunner, TimeProvider};

/// Runs commands through `<shell> -c` on this host.
///
/// In `DryRun` and `Simulate` mode nothing is spawned; the result is the
/// "not executed" sentinel.
pub struct ShellCommandRunner {
    mode: ExecutionMode,
    shell: String,
    time_provider: Arc<dyn TimeProvider>,
}

impl ShellCommandRunner {
    /// # Arguments
    /// * `mode` - Fixed for the lifetime of the runner
    /// * `shell` - Interpreter path, e.g. `/bin/sh`
    /// * `time_provider` - Time provider for duration tracking
    pub fn new(
        mode: ExecutionMode,
        shell: impl Into<String>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            mode,
            shell: shell.into(),
            time_provider,
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    fn elapsed_secs(&self, start_ms: i64) -> f64 {
        (self.time_provider.now_millis() - start_ms).max(0) as f64 / 1000.0
    }

    async fn run_live(&self, command: &str, limit: Duration) -> CommandResult {
        let start = self.time_provider.now_millis();

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group so a timeout takes down everything the shell started
        #[cfg(unix)]
        cmd.process_group(0);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(command = %command, shell = %self.shell, error = %e, "Failed to spawn shell");
                return CommandResult::internal_error(command, e.to_string());
            }
        };
        let pid = child.id();

        match timeout(limit, child.wait_with_output()).await {
            Ok(Ok(output)) => CommandResult::completed(
                command,
                output.status.code().unwrap_or(EXIT_NOT_RUN),
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr),
                self.elapsed_secs(start),
            ),
            Ok(Err(e)) => {
                warn!(command = %command, error = %e, "Failed to collect command output");
                CommandResult::internal_error(command, e.to_string())
            }
            Err(_) => {
                warn!(
                    command = %command,
                    pid = ?pid,
                    timeout_secs = limit.as_secs_f64(),
                    "Command timed out, killing process group"
                );
                kill_process_group(pid);
                CommandResult::timed_out(command, limit, self.elapsed_secs(start))
            }
        }
    }
}

/// SIGKILL the whole process group led by `pid`
fn kill_process_group(pid: Option<u32>) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
            return;
        };
        if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
            // ESRCH: group already gone
            debug!(pid = pid, error = %e, "killpg failed");
        }
    }

    #[cfg(not(unix))]
    {
        // kill_on_drop already terminated the direct child
        let _ = pid;
    }
}

#[async_trait]
impl CommandRunner for ShellCommandRunner {
    async fn run(&self, command: &str, limit: Duration) -> CommandResult {
        info!(
            command = %command,
            mode = %self.mode,
            timeout_secs = limit.as_secs_f64(),
            "Starting command"
        );

        let result = match self.mode {
            ExecutionMode::DryRun | ExecutionMode::Simulate => CommandResult::not_executed(command),
            ExecutionMode::Live => self.run_live(command, limit).await,
        };

        info!(
            command = %command,
            mode = %self.mode,
            exit_code = result.exit_code,
            success = result.success,
            execution_time = result.execution_time,
            "Command finished"
        );
        result
    }
}
