// Execution target selection
use reqwest::Client;
use std::sync::Arc;
use tracing::debug;

use opsplan_core::config::{ExecutionMode, RemoteConfig};
use opsplan_core::port::{CommandRunner, ExecutionTargets};

use crate::remote_runner::RemoteCommandRunner;

/// Local shell for the host, remote executor for tasks bound to a `vm_id`.
///
/// Remote runners are only used in `Live` mode with a configured service;
/// otherwise every target falls back to the local runner, which honours the
/// dry-run / simulate mode.
pub struct HostTargets {
    local: Arc<dyn CommandRunner>,
    mode: ExecutionMode,
    remote: Option<RemoteConfig>,
    client: Client,
}

impl HostTargets {
    pub fn new(local: Arc<dyn CommandRunner>, mode: ExecutionMode, remote: Option<RemoteConfig>) -> Self {
        Self {
            local,
            mode,
            remote,
            client: Client::new(),
        }
    }
}

impl ExecutionTargets for HostTargets {
    fn runner_for(&self, target: Option<&str>) -> Arc<dyn CommandRunner> {
        match (target, &self.remote, self.mode) {
            (Some(vm_id), Some(config), ExecutionMode::Live) => {
                debug!(vm_id = %vm_id, base_url = %config.base_url, "Using remote runner");
                Arc::new(RemoteCommandRunner::new(self.client.clone(), config, vm_id))
            }
            (Some(vm_id), _, _) => {
                debug!(vm_id = %vm_id, mode = %self.mode, "Remote target handled locally");
                Arc::clone(&self.local)
            }
            (None, _, _) => Arc::clone(&self.local),
        }
    }
}
