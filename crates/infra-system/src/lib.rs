// OpsPlan Infrastructure - System Adapters
// Implements: CommandRunner (local shell, remote executor), ExecutionTargets

pub mod remote_runner;
pub mod shell_runner;
pub mod targets;

pub use remote_runner::RemoteCommandRunner;
pub use shell_runner::ShellCommandRunner;
pub use targets::HostTargets;
