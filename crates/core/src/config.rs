//! Engine configuration
//!
//! Plain serde types; loading (files, environment) happens in the daemon.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::application::constants::{
    DEFAULT_COMMAND_TIMEOUT_SECS, DEFAULT_INSTALL_TEMPLATE, DEFAULT_MAX_CONFLICT_RETRIES,
    DEFAULT_NETWORK_PROBE, DEFAULT_PRIVILEGE_PREFIX, DEFAULT_REMOTE_MAX_POLLS,
    DEFAULT_REMOTE_POLL_INTERVAL_MS, DEFAULT_SHELL,
};
use crate::error::{AppError, Result};

/// How the command runner treats commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Operator asked for a preview; nothing runs
    DryRun,
    /// No execution backend configured; nothing runs
    Simulate,
    /// Commands run for real
    Live,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::DryRun => write!(f, "DRY_RUN"),
            ExecutionMode::Simulate => write!(f, "SIMULATE"),
            ExecutionMode::Live => write!(f, "LIVE"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// `{package}` is replaced with the mapped package name
    pub install_template: String,
    pub privilege_prefix: String,
    pub network_probe: String,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            install_template: DEFAULT_INSTALL_TEMPLATE.to_string(),
            privilege_prefix: DEFAULT_PRIVILEGE_PREFIX.to_string(),
            network_probe: DEFAULT_NETWORK_PROBE.to_string(),
        }
    }
}

/// Remote command-executor service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub base_url: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_REMOTE_POLL_INTERVAL_MS
}

fn default_max_polls() -> u32 {
    DEFAULT_REMOTE_MAX_POLLS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub mode: ExecutionMode,
    pub command_timeout_secs: u64,
    /// Interpreter for live commands (`<shell> -c <command>`)
    pub shell: String,
    pub max_conflict_retries: u32,
    /// Falls back to `<data dir>/opsplan.db` when unset
    pub database_url: Option<String>,
    pub classifier: ClassifierConfig,
    pub remote: Option<RemoteConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::DryRun,
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            shell: DEFAULT_SHELL.to_string(),
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
            database_url: None,
            classifier: ClassifierConfig::default(),
            remote: None,
        }
    }
}

impl EngineConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.command_timeout_secs == 0 {
            return Err(AppError::Config(
                "command_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.shell.trim().is_empty() {
            return Err(AppError::Config("shell cannot be empty".to_string()));
        }
        if !self.classifier.install_template.contains("{package}") {
            return Err(AppError::Config(
                "classifier.install_template must contain {package}".to_string(),
            ));
        }
        if let Some(remote) = &self.remote {
            if !remote.base_url.starts_with("http://") && !remote.base_url.starts_with("https://")
            {
                return Err(AppError::Config(format!(
                    "remote.base_url must be an http(s) URL: {}",
                    remote.base_url
                )));
            }
            if remote.max_polls == 0 {
                return Err(AppError::Config(
                    "remote.max_polls must be greater than zero".to_string(),
                ));
            }
        }
        Ok(())
    }
}
