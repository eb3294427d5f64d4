// Fallback Planner
// Keyword-based plans used when no planning service answers

use crate::domain::{Plan, Step};
use crate::error::Result;
use crate::port::Planner;
use async_trait::async_trait;

/// Always produces a plan; never errors
pub struct FallbackPlanner;

#[async_trait]
impl Planner for FallbackPlanner {
    async fn generate_plan(&self, description: &str, _context: Option<&str>) -> Result<Plan> {
        Ok(fallback_plan(description))
    }
}

/// Single-step inspection plan chosen by keyword, first match wins
pub fn fallback_plan(description: &str) -> Plan {
    let lower = description.to_lowercase();
    let mentions = |words: &[&str]| words.iter().any(|w| lower.contains(w));

    let (name, summary, command, verification) = if mentions(&["memory", "ram"]) {
        ("Check memory usage", "Display current memory usage", "free -h", "free -h")
    } else if mentions(&["disk", "storage"]) {
        ("Check disk usage", "Display current disk usage", "df -h", "df -h")
    } else if mentions(&["cpu", "processor"]) {
        ("Check CPU usage", "Display current CPU usage", "top -bn1 | head -20", "uptime")
    } else if mentions(&["network"]) {
        (
            "Check network connections",
            "Display current network connections",
            "netstat -tuln",
            "ping -c 4 8.8.8.8",
        )
    } else if mentions(&["process"]) {
        (
            "Check running processes",
            "Display current running processes",
            "ps aux | head -20",
            "uptime",
        )
    } else {
        return Plan::new(description)
            .with_step(
                Step::new("Execute basic command", ["ls -la"])
                    .with_description("List current directory")
                    .with_verification("echo $?"),
            )
            .with_verification("echo 'Task completed'");
    };

    Plan::new(description)
        .with_step(
            Step::new(name, [command])
                .with_description(summary)
                .with_verification("echo $?")
                .analyzed(),
        )
        .with_verification(verification)
}
