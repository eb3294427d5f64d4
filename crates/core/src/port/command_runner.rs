// Command Runner Port
// Abstraction over where and how a single shell command runs

use crate::domain::CommandResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Runs one command and normalizes the outcome.
///
/// Implementations never fail to the caller: spawn errors, transport errors
/// and timeouts are folded into the returned `CommandResult`
/// (`exit_code` -1 and 124 respectively).
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str, timeout: Duration) -> CommandResult;
}

/// Picks the runner for a task's execution target
pub trait ExecutionTargets: Send + Sync {
    /// `target` is the task's `vm_id` variable, `None` for the local host
    fn runner_for(&self, target: Option<&str>) -> Arc<dyn CommandRunner>;
}

/// Fixed runner per target id, falling back to a default
pub struct StaticTargets {
    default: Arc<dyn CommandRunner>,
    by_target: HashMap<String, Arc<dyn CommandRunner>>,
}

impl StaticTargets {
    pub fn new(default: Arc<dyn CommandRunner>) -> Self {
        Self {
            default,
            by_target: HashMap::new(),
        }
    }

    pub fn with_target(mut self, target: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        self.by_target.insert(target.into(), runner);
        self
    }
}

impl ExecutionTargets for StaticTargets {
    fn runner_for(&self, target: Option<&str>) -> Arc<dyn CommandRunner> {
        target
            .and_then(|t| self.by_target.get(t))
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default))
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// Scripted response for commands matching a prefix
    #[derive(Debug, Clone)]
    pub enum MockOutcome {
        Succeed(String),
        Fail { exit_code: i32, stderr: String },
        /// Fail the first call, succeed afterwards
        FailOnce { exit_code: i32, stderr: String },
        TimeOut,
        Panic(String),
    }

    /// Runner that answers from a script instead of spawning processes.
    ///
    /// Rules are matched by command prefix in insertion order; unmatched
    /// commands succeed with empty output.
    pub struct ScriptedRunner {
        rules: Mutex<Vec<(String, MockOutcome, usize)>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self {
                rules: Mutex::new(Vec::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn on(self, prefix: impl Into<String>, outcome: MockOutcome) -> Self {
            self.rules.lock().unwrap().push((prefix.into(), outcome, 0));
            self
        }

        pub fn fail(self, prefix: impl Into<String>, exit_code: i32, stderr: impl Into<String>) -> Self {
            self.on(
                prefix,
                MockOutcome::Fail {
                    exit_code,
                    stderr: stderr.into(),
                },
            )
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl Default for ScriptedRunner {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, command: &str, timeout: Duration) -> CommandResult {
            self.calls.lock().unwrap().push(command.to_string());

            let outcome = {
                let mut rules = self.rules.lock().unwrap();
                rules
                    .iter_mut()
                    .find(|(prefix, _, _)| command.starts_with(prefix.as_str()))
                    .map(|(_, outcome, hits)| {
                        *hits += 1;
                        (outcome.clone(), *hits)
                    })
            };

            match outcome {
                None => CommandResult::completed(command, 0, "", "", 0.01),
                Some((MockOutcome::Succeed(stdout), _)) => {
                    CommandResult::completed(command, 0, stdout, "", 0.01)
                }
                Some((MockOutcome::Fail { exit_code, stderr }, _)) => {
                    CommandResult::completed(command, exit_code, "", stderr, 0.01)
                }
                Some((MockOutcome::FailOnce { exit_code, stderr }, 1)) => {
                    CommandResult::completed(command, exit_code, "", stderr, 0.01)
                }
                Some((MockOutcome::FailOnce { .. }, _)) => {
                    CommandResult::completed(command, 0, "", "", 0.01)
                }
                Some((MockOutcome::TimeOut, _)) => {
                    CommandResult::timed_out(command, timeout, timeout.as_secs_f64())
                }
                Some((MockOutcome::Panic(msg), _)) => {
                    panic!("{}", msg);
                }
            }
        }
    }
}
