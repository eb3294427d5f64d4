// Remote command runner
// Submits commands to the command-executor service and polls for the outcome
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use opsplan_core::config::RemoteConfig;
use opsplan_core::domain::{CommandResult, EXIT_NOT_RUN, EXIT_TIMEOUT};
use opsplan_core::port::CommandRunner;

/// Slack past the command limit for the service to report the outcome
const RESULT_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize)]
struct ExecuteRequest<'a> {
    command: &'a str,
    vm_id: &'a str,
    timeout_seconds: u64,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
enum RemoteStatus {
    Pending,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl RemoteStatus {
    fn is_final(self) -> bool {
        matches!(
            self,
            RemoteStatus::Completed | RemoteStatus::Failed | RemoteStatus::TimedOut
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RemoteResult {
    status: RemoteStatus,
    #[serde(default)]
    stdout: Option<String>,
    #[serde(default)]
    stderr: Option<String>,
    #[serde(default)]
    exit_code: Option<i32>,
    #[serde(default)]
    execution_time_ms: Option<u64>,
}

/// Runs commands on one remote target (`vm_id`)
pub struct RemoteCommandRunner {
    client: Client,
    base_url: String,
    vm_id: String,
    poll_interval: Duration,
    max_polls: u32,
}

impl RemoteCommandRunner {
    pub fn new(client: Client, config: &RemoteConfig, vm_id: impl Into<String>) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            vm_id: vm_id.into(),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            max_polls: config.max_polls,
        }
    }

    /// Hard bound on one `run`, submission and polling included
    fn deadline(limit: Duration) -> Duration {
        limit + RESULT_GRACE
    }

    /// Enough polls to cover `limit`, never fewer than configured
    fn polls_for(&self, limit: Duration) -> u32 {
        let interval_ms = self.poll_interval.as_millis().max(1);
        let needed = limit.as_millis().div_ceil(interval_ms);
        u32::try_from(needed).unwrap_or(u32::MAX).max(self.max_polls)
    }

    async fn submit(&self, command: &str, limit: Duration) -> Result<String, reqwest::Error> {
        let request = ExecuteRequest {
            command,
            vm_id: &self.vm_id,
            timeout_seconds: limit.as_secs().max(1),
        };

        let response: SubmitResponse = self
            .client
            .post(format!("{}/execute/vm", self.base_url))
            .timeout(Self::deadline(limit))
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.id)
    }

    /// `None` when the poll budget ran out before a final status
    async fn poll(&self, id: &str, limit: Duration) -> Result<Option<RemoteResult>, reqwest::Error> {
        let url = format!("{}/result/{}", self.base_url, id);

        for attempt in 1..=self.polls_for(limit) {
            tokio::time::sleep(self.poll_interval).await;

            let result: RemoteResult = self
                .client
                .get(&url)
                .timeout(Self::deadline(limit))
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            debug!(id = %id, attempt, status = ?result.status, "Polled remote command");
            if result.status.is_final() {
                return Ok(Some(result));
            }
        }
        Ok(None)
    }
}

/// Normalize a remote outcome; `None` means polling gave up
fn to_command_result(command: &str, limit: Duration, remote: Option<RemoteResult>) -> CommandResult {
    let Some(remote) = remote else {
        return CommandResult::timed_out(command, limit, limit.as_secs_f64());
    };

    let execution_time = remote.execution_time_ms.unwrap_or(0) as f64 / 1000.0;
    if remote.status == RemoteStatus::TimedOut {
        let mut result = CommandResult::timed_out(command, limit, execution_time);
        if let Some(stderr) = remote.stderr.filter(|s| !s.trim().is_empty()) {
            result.stderr = stderr;
        }
        return result;
    }

    let exit_code = remote.exit_code.unwrap_or(EXIT_NOT_RUN);
    let mut result = CommandResult::completed(
        command,
        exit_code,
        remote.stdout.unwrap_or_default(),
        remote.stderr.unwrap_or_default(),
        execution_time,
    );
    // A `Failed` report never counts as success, whatever the exit code says
    if remote.status == RemoteStatus::Failed && result.success {
        result.success = false;
        if result.exit_code == 0 {
            result.exit_code = EXIT_NOT_RUN;
        }
    }
    result
}

#[async_trait]
impl CommandRunner for RemoteCommandRunner {
    async fn run(&self, command: &str, limit: Duration) -> CommandResult {
        info!(
            command = %command,
            vm_id = %self.vm_id,
            timeout_secs = limit.as_secs_f64(),
            "Submitting remote command"
        );

        let deadline = Self::deadline(limit);
        let exchange = async {
            let id = self.submit(command, limit).await?;
            self.poll(&id, limit).await
        };

        let result = match tokio::time::timeout(deadline, exchange).await {
            Ok(Ok(remote)) => to_command_result(command, limit, remote),
            Ok(Err(e)) => {
                warn!(command = %command, vm_id = %self.vm_id, error = %e, "Remote execution failed");
                CommandResult::internal_error(command, e.to_string())
            }
            Err(_) => {
                warn!(
                    command = %command,
                    vm_id = %self.vm_id,
                    deadline_secs = deadline.as_secs_f64(),
                    "Remote executor did not answer in time"
                );
                CommandResult::timed_out(command, limit, deadline.as_secs_f64())
            }
        };

        info!(
            command = %command,
            vm_id = %self.vm_id,
            exit_code = result.exit_code,
            success = result.success,
            "Remote command finished"
        );
        result
    }
}
