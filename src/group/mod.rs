// src/group/mod.rs

//! Task groups: DAGs whose nodes wrap asynchronous task items.
//!
//! - [`item`] defines the [`TaskItem`] contract implementors provide.
//! - [`entry`] is the node payload: the item plus its prepare guard, result
//!   slot and role (real task or proxy).
//! - [`task_group`] is the composition API (dependencies, dependents,
//!   post-run dependents) and the entry point for invocation.
//! - [`proxy`] builds the proxy group that orders post-run dependents after
//!   the group they follow.

pub mod entry;
pub mod item;
pub mod proxy;
pub mod task_group;

pub use entry::{EntryRole, TaskGroupEntry};
pub use item::{FunctionalTaskItem, HookFuture, PrepareContext, TaskFuture, TaskItem};
pub use proxy::ProxyTaskItem;
pub use task_group::TaskGroup;
