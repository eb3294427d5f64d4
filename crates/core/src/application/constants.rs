// Engine constants (ADR: No magic values)

/// Per-command timeout when neither config nor step overrides it
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 60;

/// Interpreter for live commands
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Read-modify-write attempts before a mutator reports a conflict
pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 5;

/// `{package}` is substituted by the classifier
pub const DEFAULT_INSTALL_TEMPLATE: &str =
    "sudo apt-get update && sudo apt-get install -y {package}";

pub const DEFAULT_PRIVILEGE_PREFIX: &str = "sudo";

/// Reachability probe proposed for DNS / routing failures
pub const DEFAULT_NETWORK_PROBE: &str = "ping -c 4 8.8.8.8";

/// Remote executor result polling (1s x 10)
pub const DEFAULT_REMOTE_POLL_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_REMOTE_MAX_POLLS: u32 = 10;

/// Variable holding the remote target of a task
pub const VM_ID_VARIABLE: &str = "vm_id";
