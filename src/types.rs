use std::str::FromStr;
use serde::Deserialize;

/// What a task group invocation does once one of its tasks fails.
///
/// - `TerminateOnHittingLcaTask` (default): only the failed task's
///   descendants are cancelled. Independent branches keep starting new
///   tasks and run to completion; the root is never invoked because it
///   descends from every task.
/// - `TerminateOnInProgressTasksCompletion`: no new task is started anywhere
///   in the group; tasks already running are allowed to finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum TerminationStrategy {
    #[serde(rename = "lca")]
    TerminateOnHittingLcaTask,
    #[serde(rename = "in_progress", alias = "in-progress")]
    TerminateOnInProgressTasksCompletion,
}

impl Default for TerminationStrategy {
    fn default() -> Self {
        TerminationStrategy::TerminateOnHittingLcaTask
    }
}

impl FromStr for TerminationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "lca" => Ok(TerminationStrategy::TerminateOnHittingLcaTask),
            "in_progress" | "in-progress" => {
                Ok(TerminationStrategy::TerminateOnInProgressTasksCompletion)
            }
            other => Err(format!(
                "invalid termination strategy: {other} (expected \"lca\" or \"in_progress\")"
            )),
        }
    }
}
