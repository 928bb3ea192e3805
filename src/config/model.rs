// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::types::TerminationStrategy;

/// Manifest exactly as deserialized from TOML, before validation.
///
/// ```toml
/// [config]
/// termination = "lca"
/// invoke = "app"
///
/// [task.vnet]
/// cmd = "echo vnet"
///
/// [task.app]
/// cmd = "echo app"
/// after = ["vnet"]
/// post_run = ["dns"]
///
/// [task.dns]
/// cmd = "echo dns"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// Validated manifest. Only obtainable through `TryFrom<RawConfigFile>`
/// (or [`ConfigFile::new_unchecked`] in tests).
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,

    /// Keyed by task name; iteration order is alphabetical.
    pub task: BTreeMap<String, TaskConfig>,
}

impl ConfigFile {
    pub fn new_unchecked(config: ConfigSection, task: BTreeMap<String, TaskConfig>) -> Self {
        Self { config, task }
    }

    /// The task whose group the binary invokes.
    ///
    /// `[config].invoke` if set; otherwise the only task no other task names
    /// in `after` or `post_run`.
    pub fn invoke_target(&self) -> Option<&str> {
        if let Some(name) = self.config.invoke.as_deref() {
            return self.task.contains_key(name).then_some(name);
        }

        let mut unreferenced = self.unreferenced_tasks();
        match (unreferenced.next(), unreferenced.next()) {
            (Some(only), None) => Some(only),
            _ => None,
        }
    }

    /// Tasks that appear in no other task's `after` or `post_run`.
    pub fn unreferenced_tasks(&self) -> impl Iterator<Item = &str> {
        unreferenced_tasks(&self.task)
    }
}

pub(crate) fn unreferenced_tasks(
    tasks: &BTreeMap<String, TaskConfig>,
) -> impl Iterator<Item = &str> {
    tasks.keys().map(String::as_str).filter(move |name| {
        !tasks.values().any(|t| {
            t.after
                .iter()
                .chain(t.post_run.iter())
                .any(|r| r.as_str() == *name)
        })
    })
}

/// `[config]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigSection {
    /// `"lca"` (default) or `"in_progress"`.
    #[serde(default)]
    pub termination: TerminationStrategy,

    /// Task whose group is invoked.
    #[serde(default)]
    pub invoke: Option<String>,
}

/// `[task.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// Shell command to run.
    pub cmd: String,

    /// Tasks whose groups this task's group depends on.
    #[serde(default)]
    pub after: Vec<String>,

    /// Tasks whose groups run strictly after this task's group, every time
    /// it is invoked.
    #[serde(default)]
    pub post_run: Vec<String>,
}
