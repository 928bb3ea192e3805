// src/errors.rs

//! Crate-wide error types.
//!
//! - [`GraphError`]: structural problems with a graph (cycles, dangling keys).
//! - [`TaskFailure`]: one task item that failed, tagged with its key.
//! - [`GroupError`]: what a task group invocation ends with.
//! - [`TaskgraphError`]: binary-level errors (config, IO, invocation).

use thiserror::Error;

use crate::dag::TaskKey;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("circular dependency detected: {}", .0.join(" -> "))]
    CircularDependency(Vec<TaskKey>),

    #[error("node '{0}' is not part of the graph")]
    UnknownNode(TaskKey),

    #[error("node '{node}' depends on '{dependency}', which is not part of the graph")]
    UnknownDependency { node: TaskKey, dependency: TaskKey },

    #[error("node '{0}' is already part of the graph")]
    DuplicateNode(TaskKey),
}

/// A task item that completed with an error.
#[derive(Error, Debug)]
#[error("task '{key}' failed: {source}")]
pub struct TaskFailure {
    pub key: TaskKey,
    #[source]
    pub source: anyhow::Error,
}

impl TaskFailure {
    pub fn new(key: impl Into<TaskKey>, source: anyhow::Error) -> Self {
        Self {
            key: key.into(),
            source,
        }
    }
}

/// Terminal error of a task group invocation.
///
/// One failing task surfaces as [`GroupError::Single`]; two or more failures
/// in the same invocation are combined into [`GroupError::Composite`].
#[derive(Error, Debug)]
pub enum GroupError {
    #[error(transparent)]
    Single(TaskFailure),

    #[error("{} tasks failed: {}", .0.len(), failed_keys(.0))]
    Composite(Vec<TaskFailure>),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("{0} is not supported")]
    Unsupported(&'static str),
}

impl GroupError {
    /// Combine the failures of one invocation; `None` if there were none.
    pub fn from_failures(mut failures: Vec<TaskFailure>) -> Option<Self> {
        match failures.len() {
            0 => None,
            1 => failures.pop().map(GroupError::Single),
            _ => Some(GroupError::Composite(failures)),
        }
    }

    /// The underlying task failures, whichever variant this is.
    pub fn causes(&self) -> &[TaskFailure] {
        match self {
            GroupError::Single(failure) => std::slice::from_ref(failure),
            GroupError::Composite(failures) => failures,
            GroupError::Graph(_) | GroupError::Unsupported(_) => &[],
        }
    }

    /// Keys of the failed tasks, in the order they failed.
    pub fn failed_keys(&self) -> Vec<&str> {
        self.causes().iter().map(|f| f.key.as_str()).collect()
    }
}

fn failed_keys(failures: &[TaskFailure]) -> String {
    failures
        .iter()
        .map(|f| f.key.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Error, Debug)]
pub enum TaskgraphError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Cycle detected in task graph: {0}")]
    DagCycle(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Group(#[from] GroupError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, TaskgraphError>;
