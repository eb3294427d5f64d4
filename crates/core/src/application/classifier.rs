// Adaptation Classifier
//
// Maps a failed command to at most one substitute command. Pure: no I/O, no
// clock, same input always gives the same answer.

use crate::config::ClassifierConfig;
use crate::domain::{Adaptation, CommandResult};
use regex::Regex;
use std::sync::OnceLock;

/// Binaries whose absence is fixed by installing a known package
const PACKAGE_MAP: &[(&str, &str)] = &[
    ("nginx", "nginx"),
    ("apache2", "apache2"),
    ("mysql", "mysql-server"),
    ("mariadb", "mariadb-server"),
    ("postgresql", "postgresql"),
    ("php", "php"),
    ("python3", "python3"),
    ("node", "nodejs"),
    ("docker", "docker.io"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureClass {
    MissingCommand,
    PermissionDenied,
    NetworkUnreachable,
    MissingDirectory,
}

/// One row of the rule table: a pattern and the remedy it leads to
struct Rule {
    class: FailureClass,
    matches: fn(&str, &str, &ClassifierConfig) -> bool,
}

/// Evaluated top to bottom; the first matching row decides, even when it
/// cannot produce a remedy.
const RULES: &[Rule] = &[
    Rule {
        class: FailureClass::MissingCommand,
        matches: is_missing_command,
    },
    Rule {
        class: FailureClass::PermissionDenied,
        matches: is_permission_denied,
    },
    Rule {
        class: FailureClass::NetworkUnreachable,
        matches: is_network_unreachable,
    },
    Rule {
        class: FailureClass::MissingDirectory,
        matches: is_missing_path,
    },
];

fn is_missing_command(_command: &str, stderr: &str, _config: &ClassifierConfig) -> bool {
    stderr.contains("command not found")
}

fn is_permission_denied(command: &str, stderr: &str, config: &ClassifierConfig) -> bool {
    stderr.to_lowercase().contains("permission denied")
        && !has_prefix(command, &config.privilege_prefix)
}

fn is_network_unreachable(_command: &str, stderr: &str, _config: &ClassifierConfig) -> bool {
    stderr.contains("Could not resolve host") || stderr.contains("Network is unreachable")
}

fn is_missing_path(_command: &str, stderr: &str, _config: &ClassifierConfig) -> bool {
    missing_path_regex().is_match(stderr)
}

fn missing_path_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"No such file or directory: '?([^'\n]+)'?").expect("valid static regex")
    })
}

fn has_prefix(command: &str, prefix: &str) -> bool {
    command
        .split_whitespace()
        .next()
        .is_some_and(|first| first == prefix)
}

#[derive(Debug, Clone, Default)]
pub struct AdaptationClassifier {
    config: ClassifierConfig,
}

impl AdaptationClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    /// Classify a failed command. Returns `None` when no rule matches, or when
    /// the first matching rule has no remedy (later rules are not consulted).
    pub fn classify(&self, command: &str, result: &CommandResult) -> Option<Adaptation> {
        let stderr = result.stderr.as_str();
        let rule = RULES
            .iter()
            .find(|rule| (rule.matches)(command, stderr, &self.config))?;

        let (reason, adapted_command, diagnostic) = match rule.class {
            FailureClass::MissingCommand => {
                let binary = self.binary_of(command);
                match PACKAGE_MAP.iter().find(|(bin, _)| *bin == binary) {
                    Some((_, package)) => (
                        format!("Command '{}' not found, installing package '{}'", binary, package),
                        Some(self.config.install_template.replace("{package}", package)),
                        false,
                    ),
                    None => return None,
                }
            }
            FailureClass::PermissionDenied => (
                "Permission denied, retrying with elevated privileges".to_string(),
                Some(format!("{} {}", self.config.privilege_prefix, command.trim())),
                false,
            ),
            FailureClass::NetworkUnreachable => (
                "Network connectivity issue detected, probing reachability".to_string(),
                Some(self.config.network_probe.clone()),
                true,
            ),
            FailureClass::MissingDirectory => {
                let path = missing_path_regex()
                    .captures(stderr)
                    .and_then(|caps| caps.get(1))
                    .map(|m| m.as_str().trim())
                    .unwrap_or_default();
                let last_segment = path.rsplit('/').next().unwrap_or_default();
                if path.contains('/') && !last_segment.contains('.') {
                    (
                        format!("Directory '{}' does not exist, creating it", path),
                        Some(format!("mkdir -p {}", path)),
                        false,
                    )
                } else {
                    return None;
                }
            }
        };

        Some(Adaptation {
            original_command: command.to_string(),
            error: result.stderr.clone(),
            adaptation_reason: reason,
            adapted_command,
            diagnostic,
        })
    }

    /// First word of the command, skipping the privilege prefix
    fn binary_of<'a>(&self, command: &'a str) -> &'a str {
        let mut words = command.split_whitespace();
        match words.next() {
            Some(first) if first == self.config.privilege_prefix => words.next().unwrap_or(""),
            Some(first) => first,
            None => "",
        }
    }
}
