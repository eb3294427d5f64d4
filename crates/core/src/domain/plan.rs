// Plan Domain Model

use serde::{Deserialize, Serialize};

/// Ordered list of steps generated for one task.
///
/// A plan is attached to a task once; afterwards it is only ever replaced as a
/// whole (see [`crate::domain::TaskState::attach_plan`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub task: String,
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Top-level check run after the step loop
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<String>,
}

/// Unit of stop-on-failure: the first command that ultimately fails skips the rest
/// of the step and every later step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<String>,
    #[serde(default)]
    pub requires_output_analysis: bool,
    /// Per-command timeout override for every command of this step; 0 keeps the default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Plan {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            steps: Vec::new(),
            verification: None,
        }
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_verification(mut self, command: impl Into<String>) -> Self {
        self.verification = Some(command.into());
        self
    }

    pub fn total_steps(&self) -> usize {
        self.steps.len()
    }

    /// All commands of all steps in plan order (verification excluded)
    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.steps
            .iter()
            .flat_map(|s| s.commands.iter().map(String::as_str))
    }
}

impl Step {
    pub fn new<I, S>(name: impl Into<String>, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            description: None,
            commands: commands.into_iter().map(Into::into).collect(),
            verification: None,
            requires_output_analysis: false,
            timeout_secs: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_verification(mut self, command: impl Into<String>) -> Self {
        self.verification = Some(command.into());
        self
    }

    pub fn analyzed(mut self) -> Self {
        self.requires_output_analysis = true;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

/// Blank lines and `#` comments show up in generated plans; they are never run.
pub fn is_runnable(command: &str) -> bool {
    let trimmed = command.trim();
    !trimmed.is_empty() && !trimmed.starts_with('#')
}
