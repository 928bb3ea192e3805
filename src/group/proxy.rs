// src/group/proxy.rs

//! Proxy task groups.
//!
//! Attaching a post-run dependent to a group `G` (root key `F`) creates a
//! proxy group with a single node `proxy-F`. The proxy node depends on `F`
//! and on the root of every post-run dependent, and each post-run dependent
//! depends on `F`. Invoking `G` then means invoking the proxy:
//!
//! ```text
//!   G's graph ... -> F -> post-run graphs ... -> proxy-F
//! ```
//!
//! Groups that depended on `G` before the proxy existed are rewired to depend
//! on `proxy-F` instead, and groups added as dependents later go through the
//! proxy too, so they only start after `G`'s post-run work is done.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use tracing::{debug, info};

use crate::dag::{ensure_acyclic, DagNode, TaskKey};
use crate::engine::InvocationContext;
use crate::errors::GraphError;
use crate::group::entry::TaskGroupEntry;
use crate::group::item::{HookFuture, TaskFuture, TaskItem};
use crate::group::task_group::TaskGroup;

/// Task item of a proxy node.
///
/// Invoking it runs the actual root's [`TaskItem::after_post_run`] hook and
/// then yields the actual root's result again.
pub struct ProxyTaskItem<V> {
    actual: Arc<DagNode<TaskGroupEntry<V>>>,
}

impl<V> ProxyTaskItem<V> {
    pub(crate) fn new(actual: Arc<DagNode<TaskGroupEntry<V>>>) -> Self {
        Self { actual }
    }

    /// Key of the root this proxy stands in for.
    pub fn actual_key(&self) -> &str {
        self.actual.key()
    }
}

impl<V> TaskItem<V> for ProxyTaskItem<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn result(&self) -> Option<V> {
        self.actual.data().cached_result()
    }

    fn invoke(&self, _ctx: &InvocationContext) -> TaskFuture<V> {
        let actual = Arc::clone(&self.actual);
        Box::pin(async move {
            actual.data().item().after_post_run(false).await?;
            actual
                .data()
                .cached_result()
                .ok_or_else(|| anyhow!("task '{}' finished without a result", actual.key()))
        })
    }

    fn after_post_run(&self, is_group_faulted: bool) -> HookFuture {
        self.actual.data().item().after_post_run(is_group_faulted)
    }
}

/// Order `post_run` strictly after `actual`, through `actual`'s proxy.
pub(crate) fn attach_post_run_dependent<V>(
    actual: &TaskGroup<V>,
    post_run: &TaskGroup<V>,
) -> Result<(), GraphError>
where
    V: Clone + Send + Sync + 'static,
{
    ensure_attach_is_acyclic(actual, post_run)?;
    let proxy = activate(actual)?;

    // The post-run group depends on the actual graph, never on the proxy,
    // otherwise the proxy would wait on itself.
    post_run.dag().merge(actual.dag())?;

    match post_run.proxy() {
        Some(post_run_proxy) => proxy.dag().merge(post_run_proxy.dag())?,
        None => proxy.dag().merge(post_run.dag())?,
    }

    debug!(
        group = %actual.key(),
        post_run = %post_run.key(),
        proxy = %proxy.key(),
        "attached post-run dependent"
    );
    Ok(())
}

/// Reject an attachment that would close a cycle, before anything is
/// rewired.
///
/// Checks the edges the attachment would leave behind: every node of the
/// actual graph, the post-run graph and the existing proxy graph, with the
/// actual group's current dependents moved onto the proxy, plus
/// `post-run root -> actual root` and `proxy -> post-run root`.
fn ensure_attach_is_acyclic<V>(
    actual: &TaskGroup<V>,
    post_run: &TaskGroup<V>,
) -> Result<(), GraphError>
where
    V: Clone + Send + Sync + 'static,
{
    let actual_key = actual.key();
    let proxy_key = proxy_key_of(&actual_key);
    let target = post_run.proxy().unwrap_or_else(|| post_run.clone());

    if target.dag().contains(&proxy_key) {
        return Err(GraphError::CircularDependency(vec![
            proxy_key.clone(),
            target.key(),
            proxy_key,
        ]));
    }

    let rewired: Vec<TaskKey> = match actual.proxy() {
        Some(_) => Vec::new(),
        None => actual
            .dag()
            .parents()
            .iter()
            .map(|parent| parent.root())
            .filter(|root| root.has_dependency(&actual_key))
            .map(|root| root.key().to_string())
            .collect(),
    };

    let mut graphs = vec![actual.dag().clone(), target.dag().clone()];
    if let Some(existing) = actual.proxy() {
        graphs.push(existing.dag().clone());
    }

    let mut deps: HashMap<TaskKey, Vec<TaskKey>> = HashMap::new();
    for dag in graphs.iter() {
        for node in dag.nodes() {
            deps.entry(node.key().to_string()).or_insert_with(|| {
                let mut keys = node.dependency_keys();
                if rewired.iter().any(|k| k == node.key()) {
                    for key in keys.iter_mut().filter(|k| **k == actual_key) {
                        *key = proxy_key.clone();
                    }
                }
                keys
            });
        }
    }
    deps.entry(post_run.key()).or_default().push(actual_key.clone());
    let proxy_deps = deps.entry(proxy_key).or_default();
    proxy_deps.push(actual_key);
    proxy_deps.push(target.key());

    let edges: Vec<(TaskKey, Vec<TaskKey>)> = deps.into_iter().collect();
    ensure_acyclic(&edges)
}

fn proxy_key_of(actual_key: &str) -> TaskKey {
    format!("proxy-{actual_key}")
}

/// Return `actual`'s proxy group, creating it on first use.
fn activate<V>(actual: &TaskGroup<V>) -> Result<TaskGroup<V>, GraphError>
where
    V: Clone + Send + Sync + 'static,
{
    if let Some(proxy) = actual.proxy() {
        return Ok(proxy);
    }

    let actual_key = actual.key();
    let actual_root = actual.root_entry();
    let proxy_key = proxy_key_of(&actual_key);
    let proxy = TaskGroup::from_entry(
        proxy_key.clone(),
        TaskGroupEntry::proxy(Arc::clone(&actual_root)),
    );

    // Everything that already depends on the actual group now waits for the
    // proxy instead.
    for parent in actual.dag().parents() {
        let parent_root = parent.root();
        if parent_root.remove_dependency(&actual_key) {
            parent.merge(proxy.dag())?;
            debug!(
                parent = %parent_root.key(),
                from = %actual_key,
                to = %proxy_key,
                "rewired dependent onto proxy"
            );
        }
    }

    proxy.dag().merge(actual.dag())?;
    actual_root.data().set_proxy_key(proxy_key.clone());
    actual.set_proxy(proxy.clone());

    info!(group = %actual_key, proxy = %proxy_key, "activated proxy task group");
    Ok(proxy)
}
