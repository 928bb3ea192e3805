// src/config/validate.rs

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{unreferenced_tasks, ConfigFile, RawConfigFile};
use crate::errors::{Result, TaskgraphError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = TaskgraphError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.config, raw.task))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_task_references(cfg)?;
    validate_dag(cfg)?;
    validate_invoke_target(cfg)?;
    Ok(())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(TaskgraphError::ConfigError(
            "config must contain at least one [task.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_task_references(cfg: &RawConfigFile) -> Result<()> {
    for (name, task) in cfg.task.iter() {
        let fields = [("after", &task.after), ("post_run", &task.post_run)];
        for (field, refs) in fields {
            for other in refs.iter() {
                if other == name {
                    return Err(TaskgraphError::ConfigError(format!(
                        "task '{name}' cannot reference itself in `{field}`"
                    )));
                }
                if !cfg.task.contains_key(other) {
                    return Err(TaskgraphError::ConfigError(format!(
                        "task '{name}' has unknown task '{other}' in `{field}`"
                    )));
                }
            }
        }
    }
    Ok(())
}

fn validate_dag(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: what runs first -> what runs after.
    //   [task.B]
    //   after = ["A"]       adds A -> B
    //   post_run = ["C"]    adds B -> C
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.task.keys() {
        graph.add_node(name.as_str());
    }

    for (name, task) in cfg.task.iter() {
        for dep in task.after.iter() {
            graph.add_edge(dep.as_str(), name.as_str(), ());
            // A task that runs after `dep` also waits for `dep`'s post-run
            // work, including the post-run work of that work.
            for post in post_run_closure(cfg, dep) {
                graph.add_edge(post, name.as_str(), ());
            }
        }
        for post in task.post_run.iter() {
            graph.add_edge(name.as_str(), post.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(TaskgraphError::DagCycle(format!(
            "cycle detected in task graph involving task '{}'",
            cycle.node_id()
        ))),
    }
}

/// Every task reachable from `name` through `post_run` lists.
fn post_run_closure<'a>(cfg: &'a RawConfigFile, name: &str) -> Vec<&'a str> {
    let mut seen: Vec<&str> = Vec::new();
    let mut stack: Vec<&str> = cfg
        .task
        .get(name)
        .map(|t| t.post_run.iter().map(String::as_str).collect())
        .unwrap_or_default();

    while let Some(post) = stack.pop() {
        if seen.contains(&post) {
            continue;
        }
        seen.push(post);
        if let Some(task) = cfg.task.get(post) {
            stack.extend(task.post_run.iter().map(String::as_str));
        }
    }

    seen
}

fn validate_invoke_target(cfg: &RawConfigFile) -> Result<()> {
    if let Some(name) = cfg.config.invoke.as_deref() {
        if !cfg.task.contains_key(name) {
            return Err(TaskgraphError::TaskNotFound(format!(
                "[config].invoke names unknown task '{name}'"
            )));
        }
        return Ok(());
    }

    let unreferenced: Vec<&str> = unreferenced_tasks(&cfg.task).collect();
    if unreferenced.len() != 1 {
        return Err(TaskgraphError::ConfigError(format!(
            "[config].invoke is required when the manifest has {} unreferenced tasks ({})",
            unreferenced.len(),
            unreferenced.join(", ")
        )));
    }
    Ok(())
}
