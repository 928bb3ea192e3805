// src/lib.rs

//! Task dependency graphs and their concurrent execution.
//!
//! A [`TaskGroup`] wraps a [`Dag`] whose nodes are asynchronous
//! [`TaskItem`]s. Groups compose: one group can depend on another, and a
//! group can carry post-run dependents that run strictly after it. Invoking
//! a group walks its graph in dependency order, runs every ready item
//! concurrently and streams the results, ending with a single (possibly
//! composite) error if anything failed.
//!
//! The `taskgraph` binary builds such groups from a TOML manifest of shell
//! commands; see [`run`].

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod group;
pub mod logging;
pub mod types;

use std::collections::BTreeMap;

use anyhow::Result;
use futures::StreamExt;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::errors::TaskgraphError;
use crate::exec::{CommandOutput, CommandTaskItem};

pub use crate::dag::{Dag, DagNode, NodeState, TaskKey};
pub use crate::engine::{InvocationContext, InvocationSummary, TaskOutput, TerminationStrategy};
pub use crate::errors::{GraphError, GroupError, TaskFailure};
pub use crate::group::{
    EntryRole, FunctionalTaskItem, PrepareContext, ProxyTaskItem, TaskGroup, TaskGroupEntry,
    TaskItem,
};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - manifest loading and validation
/// - one task group per `[task.<name>]`, composed through `after` and
///   `post_run`
/// - invocation of the target group, printing each result as it arrives
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)?;
    let groups = build_task_groups(&cfg)?;
    let target = invoke_target(&cfg, &groups)?;

    if args.dry_run {
        print_dry_run(&cfg, target)?;
        return Ok(());
    }

    let termination = args
        .termination
        .map(TerminationStrategy::from)
        .unwrap_or(cfg.config.termination);
    let ctx = InvocationContext::new().with_termination(termination);
    info!(task = %target.key(), ?termination, "running manifest");

    // Proxy results repeat their actual root's output; only print real tasks.
    let walked = target.proxy().unwrap_or_else(|| target.clone());
    let mut results = std::pin::pin!(target.invoke(ctx));
    while let Some(item) = results.next().await {
        let output = item?;
        let is_proxy = walked
            .dag()
            .node(&output.key)
            .is_some_and(|node| node.data().is_proxy());
        if !is_proxy {
            print_output(&output);
        }
    }

    Ok(())
}

/// One group per manifest task, composed as the manifest describes.
pub fn build_task_groups(
    cfg: &ConfigFile,
) -> std::result::Result<BTreeMap<String, TaskGroup<CommandOutput>>, TaskgraphError> {
    let groups: BTreeMap<_, _> = cfg
        .task
        .iter()
        .map(|(name, task)| {
            let item = CommandTaskItem::new(name.clone(), task.cmd.clone());
            (name.clone(), TaskGroup::new(name.clone(), item))
        })
        .collect();

    for (name, task) in cfg.task.iter() {
        let group = lookup(&groups, name)?;
        for dep in task.after.iter() {
            group.add_dependency_task_group(lookup(&groups, dep)?)?;
        }
        for post in task.post_run.iter() {
            group.add_post_run_dependent_task_group(lookup(&groups, post)?)?;
        }
        debug!(task = %name, after = ?task.after, post_run = ?task.post_run, "composed task group");
    }

    Ok(groups)
}

fn lookup<'a>(
    groups: &'a BTreeMap<String, TaskGroup<CommandOutput>>,
    name: &str,
) -> std::result::Result<&'a TaskGroup<CommandOutput>, TaskgraphError> {
    groups
        .get(name)
        .ok_or_else(|| TaskgraphError::TaskNotFound(name.to_string()))
}

fn invoke_target<'a>(
    cfg: &ConfigFile,
    groups: &'a BTreeMap<String, TaskGroup<CommandOutput>>,
) -> std::result::Result<&'a TaskGroup<CommandOutput>, TaskgraphError> {
    let name = cfg.invoke_target().ok_or_else(|| {
        TaskgraphError::ConfigError("manifest does not determine a task to invoke".to_string())
    })?;
    lookup(groups, name)
}

fn print_output(output: &TaskOutput<CommandOutput>) {
    if output.value.stdout.is_empty() {
        println!("{}: (no output)", output.key);
    }
    for line in output.value.stdout.iter() {
        println!("{}: {}", output.key, line);
    }
}

/// Dry-run output: the manifest and the order tasks would start in.
fn print_dry_run(
    cfg: &ConfigFile,
    target: &TaskGroup<CommandOutput>,
) -> std::result::Result<(), TaskgraphError> {
    println!("taskgraph dry-run");
    println!("  config.termination = {:?}", cfg.config.termination);
    println!("  invoke = {}", target.key());
    println!();

    println!("tasks ({}):", cfg.task.len());
    for (name, task) in cfg.task.iter() {
        println!("  - {name}");
        println!("      cmd: {}", task.cmd);
        if !task.after.is_empty() {
            println!("      after: {:?}", task.after);
        }
        if !task.post_run.is_empty() {
            println!("      post_run: {:?}", task.post_run);
        }
    }
    println!();

    let walked = target.proxy().unwrap_or_else(|| target.clone());
    let order = walked.dag().enumeration_order()?;
    println!("traversal order:");
    for (i, key) in order.iter().enumerate() {
        println!("  {}. {key}", i + 1);
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
