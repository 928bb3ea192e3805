// src/group/entry.rs

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, Weak};

use tracing::debug;

use crate::dag::{lock, DagNode, TaskKey};
use crate::group::item::{PrepareContext, TaskItem};
use crate::group::proxy::ProxyTaskItem;
use crate::group::task_group::{GroupShared, TaskGroup};

/// Role of a node within a task group graph.
pub enum EntryRole<V> {
    /// Wraps a caller-supplied task item.
    Real,
    /// Completion gate of a proxy group; `actual` is the root entry of the
    /// group it stands in for.
    Proxy {
        actual: Arc<DagNode<TaskGroupEntry<V>>>,
    },
}

impl<V> fmt::Debug for EntryRole<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryRole::Real => f.write_str("Real"),
            EntryRole::Proxy { actual } => f
                .debug_struct("Proxy")
                .field("actual", &actual.key())
                .finish(),
        }
    }
}

/// Payload of a task group node.
pub struct TaskGroupEntry<V> {
    item: Arc<dyn TaskItem<V>>,
    role: EntryRole<V>,
    /// Held while the prepare hook runs, so concurrent preparers wait for it.
    prepared: Mutex<bool>,
    result: Mutex<Option<V>>,
    /// Key of the proxy standing in for this entry's group, once activated.
    proxy_key: Mutex<Option<TaskKey>>,
    owner: OnceLock<Weak<GroupShared<V>>>,
}

impl<V> fmt::Debug for TaskGroupEntry<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGroupEntry")
            .field("role", &self.role)
            .field("prepared", &self.prepared.try_lock().ok().map(|done| *done))
            .field("has_result", &lock(&self.result).is_some())
            .field("proxy_key", &*lock(&self.proxy_key))
            .finish_non_exhaustive()
    }
}

impl<V> TaskGroupEntry<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(item: Arc<dyn TaskItem<V>>) -> Self {
        Self::with_role(item, EntryRole::Real)
    }

    pub(crate) fn proxy(actual: Arc<DagNode<TaskGroupEntry<V>>>) -> Self {
        let item = Arc::new(ProxyTaskItem::new(Arc::clone(&actual)));
        Self::with_role(item, EntryRole::Proxy { actual })
    }

    fn with_role(item: Arc<dyn TaskItem<V>>, role: EntryRole<V>) -> Self {
        Self {
            item,
            role,
            prepared: Mutex::new(false),
            result: Mutex::new(None),
            proxy_key: Mutex::new(None),
            owner: OnceLock::new(),
        }
    }

    pub fn item(&self) -> &Arc<dyn TaskItem<V>> {
        &self.item
    }

    pub fn role(&self) -> &EntryRole<V> {
        &self.role
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self.role, EntryRole::Proxy { .. })
    }

    pub fn is_prepared(&self) -> bool {
        *lock(&self.prepared)
    }

    /// Run the item's prepare hook.
    ///
    /// # Panics
    ///
    /// Panics if the entry was already prepared.
    pub fn prepare(&self, key: &str) {
        if !self.try_prepare(key) {
            panic!("prepare called twice for task '{key}'");
        }
    }

    /// Run the item's prepare hook unless the entry was already prepared.
    ///
    /// Returns whether this call ran the hook. A caller racing with a hook
    /// that is still running blocks until it returns, then gets `false`.
    pub fn try_prepare(&self, key: &str) -> bool {
        let mut done = lock(&self.prepared);
        if *done {
            return false;
        }
        *done = true;
        debug!(task = %key, "preparing task item");
        let ctx = PrepareContext::new(key, self.owner());
        self.item.prepare(&ctx);
        true
    }

    /// Result of the last successful invocation, if any.
    pub fn cached_result(&self) -> Option<V> {
        lock(&self.result).clone()
    }

    pub(crate) fn set_result(&self, value: V) {
        *lock(&self.result) = Some(value);
    }

    pub fn proxy_key(&self) -> Option<TaskKey> {
        lock(&self.proxy_key).clone()
    }

    pub(crate) fn set_proxy_key(&self, key: TaskKey) {
        *lock(&self.proxy_key) = Some(key);
    }

    pub(crate) fn bind_owner(&self, owner: Weak<GroupShared<V>>) {
        // Only the constructing group binds itself; later binds are no-ops.
        let _ = self.owner.set(owner);
    }

    fn owner(&self) -> Option<TaskGroup<V>> {
        self.owner
            .get()
            .and_then(Weak::upgrade)
            .map(TaskGroup::from_shared)
    }
}
