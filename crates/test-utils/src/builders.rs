#![allow(dead_code)]

use std::collections::BTreeMap;

use taskgraph::config::{ConfigFile, ConfigSection, RawConfigFile, TaskConfig};
use taskgraph::errors::TaskgraphError;
use taskgraph::{Dag, DagNode, TaskGroup, TerminationStrategy};

use crate::recording::RecordingTaskItem;

/// The nine-node reference graph as `(node, dependencies)`, in the order the
/// nodes are added after the root `F`.
///
/// ```text
/// B, C -> A    H -> I    D -> B    G -> C    E -> {B, G}    F -> {D, E, H}
/// ```
pub const REFERENCE_GRAPH: [(&str, &[&str]); 9] = [
    ("F", &["D", "E", "H"]),
    ("A", &[]),
    ("B", &["A"]),
    ("C", &["A"]),
    ("D", &["B"]),
    ("E", &["B", "G"]),
    ("G", &["C"]),
    ("H", &["I"]),
    ("I", &[]),
];

/// Sequential traversal order of [`reference_dag`].
pub const REFERENCE_ORDER: [&str; 9] = ["A", "I", "B", "C", "H", "D", "G", "E", "F"];

/// The reference graph as a bare `Dag` rooted at `F`, nodes added in
/// [`REFERENCE_GRAPH`] order.
pub fn reference_dag() -> Dag<()> {
    let (root, deps) = REFERENCE_GRAPH[0];
    let dag = Dag::new(DagNode::with_dependencies(root, (), deps.iter().copied()));
    for (key, deps) in REFERENCE_GRAPH.iter().skip(1) {
        dag.add_node(DagNode::with_dependencies(*key, (), deps.iter().copied()))
            .expect("reference nodes are unique");
    }
    dag
}

/// One single-item group per reference node, composed into the reference
/// graph through `add_dependency_task_group`. Invoke `groups["F"]` to run
/// everything.
pub fn reference_task_groups<F>(mut make_item: F) -> BTreeMap<String, TaskGroup<String>>
where
    F: FnMut(&str) -> RecordingTaskItem,
{
    let groups: BTreeMap<String, TaskGroup<String>> = REFERENCE_GRAPH
        .iter()
        .map(|(key, _)| (key.to_string(), make_item(*key).into_group()))
        .collect();

    for (key, deps) in REFERENCE_GRAPH.iter() {
        for dep in deps.iter() {
            groups[*key]
                .add_dependency_task_group(&groups[*dep])
                .expect("reference graph is acyclic");
        }
    }
    groups
}

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection::default(),
                task: BTreeMap::new(),
            },
        }
    }

    pub fn with_task(mut self, name: &str, task: TaskConfig) -> Self {
        self.config.task.insert(name.to_string(), task);
        self
    }

    pub fn termination(mut self, termination: TerminationStrategy) -> Self {
        self.config.config.termination = termination;
        self
    }

    pub fn invoke(mut self, name: &str) -> Self {
        self.config.config.invoke = Some(name.to_string());
        self
    }

    pub fn try_build(self) -> Result<ConfigFile, TaskgraphError> {
        ConfigFile::try_from(self.config)
    }

    pub fn build(self) -> ConfigFile {
        self.try_build()
            .expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new(cmd: &str) -> Self {
        Self {
            task: TaskConfig {
                cmd: cmd.to_string(),
                after: vec![],
                post_run: vec![],
            },
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.after.push(dep.to_string());
        self
    }

    pub fn post_run(mut self, dependent: &str) -> Self {
        self.task.post_run.push(dependent.to_string());
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}
