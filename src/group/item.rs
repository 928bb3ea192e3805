// src/group/item.rs

use std::future::Future;
use std::pin::Pin;

use crate::dag::TaskKey;
use crate::engine::InvocationContext;
use crate::group::TaskGroup;

/// Future returned by [`TaskItem::invoke`].
pub type TaskFuture<V> = Pin<Box<dyn Future<Output = anyhow::Result<V>> + Send + 'static>>;

/// Future returned by [`TaskItem::after_post_run`].
pub type HookFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'static>>;

/// A unit of asynchronous work wrapped by one node of a task group.
///
/// The engine never looks at what the work does; it only calls the hooks
/// below in dependency order.
pub trait TaskItem<V>: Send + Sync {
    /// Called once, before the first traversal that includes this item.
    ///
    /// This is where delayed dependencies are attached: the item may add
    /// dependencies or dependents to its owning group through `ctx`.
    fn prepare(&self, _ctx: &PrepareContext<V>) {}

    /// Whether the work was already started elsewhere.
    ///
    /// Hot items are never invoked; the engine takes [`result`](Self::result)
    /// as their outcome.
    fn is_hot(&self) -> bool {
        false
    }

    /// Result already available without invoking, if any.
    fn result(&self) -> Option<V> {
        None
    }

    /// Run the work.
    fn invoke(&self, ctx: &InvocationContext) -> TaskFuture<V>;

    /// Called after every post-run dependent of this item's group finished
    /// (`is_group_faulted == false`), or once the group is known to have
    /// failed before reaching that point (`is_group_faulted == true`).
    fn after_post_run(&self, _is_group_faulted: bool) -> HookFuture {
        Box::pin(async { Ok(()) })
    }
}

/// Handed to [`TaskItem::prepare`].
pub struct PrepareContext<V> {
    key: TaskKey,
    owner: Option<TaskGroup<V>>,
}

impl<V> PrepareContext<V> {
    pub(crate) fn new(key: impl Into<TaskKey>, owner: Option<TaskGroup<V>>) -> Self {
        Self {
            key: key.into(),
            owner,
        }
    }

    /// Key of the entry being prepared.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The group whose root is the entry being prepared.
    ///
    /// `None` if that group handle was already dropped; the entry then only
    /// lives on inside the graphs it was merged into.
    pub fn owner(&self) -> Option<&TaskGroup<V>> {
        self.owner.as_ref()
    }
}

type BoxedInvoke<V> = Box<dyn Fn(InvocationContext) -> TaskFuture<V> + Send + Sync>;

/// Task item backed by a closure.
pub struct FunctionalTaskItem<V> {
    invoke: BoxedInvoke<V>,
}

impl<V: 'static> FunctionalTaskItem<V> {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(InvocationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        Self {
            invoke: Box::new(move |ctx| Box::pin(f(ctx))),
        }
    }
}

impl<V: 'static> TaskItem<V> for FunctionalTaskItem<V> {
    fn invoke(&self, ctx: &InvocationContext) -> TaskFuture<V> {
        (self.invoke)(ctx.clone())
    }
}
