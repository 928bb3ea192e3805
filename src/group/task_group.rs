// src/group/task_group.rs

use std::fmt;
use std::sync::{Arc, Mutex};

use futures::Stream;
use tracing::debug;

use crate::dag::{lock, Dag, DagNode, TaskKey};
use crate::engine::{driver, InvocationContext, InvocationSummary, TaskOutput};
use crate::errors::{GraphError, GroupError};
use crate::group::entry::TaskGroupEntry;
use crate::group::item::TaskItem;
use crate::group::proxy;

pub(crate) struct GroupShared<V> {
    dag: Dag<TaskGroupEntry<V>>,
    proxy: Mutex<Option<TaskGroup<V>>>,
}

/// A DAG of task items plus the relations that compose it with other groups.
///
/// A group is created around one root item. Other groups are attached as
/// dependencies (they run first), dependents (they run after, as part of
/// their own invocation) or post-run dependents (they run after this group
/// whenever this group is invoked). `TaskGroup` is a cheap handle; clones
/// refer to the same group.
pub struct TaskGroup<V> {
    shared: Arc<GroupShared<V>>,
}

impl<V> Clone for TaskGroup<V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<V> fmt::Debug for TaskGroup<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGroup")
            .field("key", &self.shared.dag.root_key())
            .field("nodes", &self.shared.dag.keys())
            .field(
                "proxy",
                &lock(&self.shared.proxy).as_ref().map(|p| p.shared.dag.root_key()),
            )
            .finish()
    }
}

impl<V> TaskGroup<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new<T>(key: impl Into<TaskKey>, item: T) -> Self
    where
        T: TaskItem<V> + 'static,
    {
        Self::from_item(key, Arc::new(item))
    }

    pub fn from_item(key: impl Into<TaskKey>, item: Arc<dyn TaskItem<V>>) -> Self {
        Self::from_entry(key, TaskGroupEntry::new(item))
    }

    pub(crate) fn from_entry(key: impl Into<TaskKey>, entry: TaskGroupEntry<V>) -> Self {
        let shared = Arc::new(GroupShared {
            dag: Dag::new(DagNode::new(key, entry)),
            proxy: Mutex::new(None),
        });
        shared.dag.root().data().bind_owner(Arc::downgrade(&shared));
        Self { shared }
    }

    pub(crate) fn from_shared(shared: Arc<GroupShared<V>>) -> Self {
        Self { shared }
    }

    /// Key of the root entry.
    pub fn key(&self) -> TaskKey {
        self.shared.dag.root_key()
    }

    pub fn dag(&self) -> &Dag<TaskGroupEntry<V>> {
        &self.shared.dag
    }

    pub fn root_entry(&self) -> Arc<DagNode<TaskGroupEntry<V>>> {
        self.shared.dag.root()
    }

    /// Keys of every entry in this group's graph, in insertion order.
    pub fn entry_keys(&self) -> Vec<TaskKey> {
        self.shared.dag.keys()
    }

    pub fn same_group(&self, other: &TaskGroup<V>) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// The proxy group, once a post-run dependent has been attached.
    pub fn proxy(&self) -> Option<TaskGroup<V>> {
        lock(&self.shared.proxy).clone()
    }

    pub fn is_proxy_active(&self) -> bool {
        lock(&self.shared.proxy).is_some()
    }

    pub(crate) fn set_proxy(&self, proxy: TaskGroup<V>) {
        *lock(&self.shared.proxy) = Some(proxy);
    }

    /// Make this group depend on `dependency`: invoking this group runs
    /// `dependency`'s graph first.
    ///
    /// If `dependency` has post-run dependents, this group depends on its
    /// proxy, so those post-run dependents also finish before this group's
    /// root starts.
    pub fn add_dependency_task_group(
        &self,
        dependency: &TaskGroup<V>,
    ) -> Result<TaskKey, GraphError> {
        match dependency.proxy() {
            Some(proxy) => {
                debug!(
                    group = %self.key(),
                    dependency = %dependency.key(),
                    proxy = %proxy.key(),
                    "dependency has post-run dependents; depending on its proxy"
                );
                self.shared.dag.merge(proxy.dag())?;
            }
            None => self.shared.dag.merge(dependency.dag())?,
        }
        Ok(dependency.key())
    }

    /// Make `dependent` depend on this group. Invoking `dependent` runs this
    /// group first.
    pub fn add_dependent_task_group(&self, dependent: &TaskGroup<V>) -> Result<TaskKey, GraphError> {
        dependent.add_dependency_task_group(self)?;
        Ok(dependent.key())
    }

    /// Run `dependent` strictly after this group every time this group is
    /// invoked.
    pub fn add_post_run_dependent_task_group(
        &self,
        dependent: &TaskGroup<V>,
    ) -> Result<TaskKey, GraphError> {
        proxy::attach_post_run_dependent(self, dependent)?;
        Ok(dependent.key())
    }

    /// Wrap `item` in its own group and add it as a dependency.
    pub fn add_dependency<T>(&self, key: impl Into<TaskKey>, item: T) -> Result<TaskGroup<V>, GraphError>
    where
        T: TaskItem<V> + 'static,
    {
        let group = TaskGroup::new(key, item);
        self.add_dependency_task_group(&group)?;
        Ok(group)
    }

    /// Wrap `item` in its own group and add it as a post-run dependent.
    pub fn add_post_run_dependent<T>(
        &self,
        key: impl Into<TaskKey>,
        item: T,
    ) -> Result<TaskGroup<V>, GraphError>
    where
        T: TaskItem<V> + 'static,
    {
        let group = TaskGroup::new(key, item);
        self.add_post_run_dependent_task_group(&group)?;
        Ok(group)
    }

    /// Result the entry `key` produced in its last successful invocation.
    pub fn task_result(&self, key: &str) -> Option<V> {
        self.shared.dag.node(key)?.data().cached_result()
    }

    /// Run the prepare hook of every entry that has not been prepared yet.
    ///
    /// Hooks may attach further entries, so passes repeat until one finds
    /// nothing new. Returns how many entries were prepared.
    pub fn prepare_entries(&self) -> usize {
        let mut prepared = 0;

        loop {
            let pending: Vec<_> = self
                .shared
                .dag
                .nodes()
                .into_iter()
                .filter(|node| !node.data().is_prepared())
                .collect();

            if pending.is_empty() {
                break;
            }

            for node in pending {
                // Another group sharing this entry may have prepared it
                // since the pass started.
                if node.data().try_prepare(node.key()) {
                    prepared += 1;
                }
            }
        }

        debug!(group = %self.key(), prepared, "prepared task entries");
        prepared
    }

    /// Invoke the group, streaming each task's result as it completes.
    ///
    /// The stream yields every successful result and then, if anything
    /// failed, ends with one error: the raw failure if a single task failed,
    /// a composite otherwise. If the group has post-run dependents, the
    /// proxy group is what actually runs.
    pub fn invoke(
        &self,
        ctx: InvocationContext,
    ) -> impl Stream<Item = Result<TaskOutput<V>, GroupError>> + Send + use<V> {
        driver::invoke(self.clone(), ctx)
    }

    /// Invoke the group and collect everything the stream produced.
    pub async fn invoke_to_end(&self, ctx: InvocationContext) -> InvocationSummary<V> {
        driver::collect(self.invoke(ctx)).await
    }

    /// Callback-based invocation is not provided; use [`invoke`](Self::invoke).
    pub fn invoke_with_callback<F>(
        &self,
        _ctx: InvocationContext,
        _on_output: F,
    ) -> Result<(), GroupError>
    where
        F: FnMut(TaskOutput<V>) + Send + 'static,
    {
        Err(GroupError::Unsupported("callback-based task group invocation"))
    }
}
