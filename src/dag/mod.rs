// src/dag/mod.rs

//! Keyed dependency graph and its traversal state.
//!
//! - [`node`] holds a single vertex: key, payload and dependency keys.
//! - [`graph`] is the node table. Node handles are reference counted so the
//!   same node can live in several graphs at once (merging only copies
//!   handles).
//! - [`traversal`] is the per-run state machine created by
//!   [`Dag::prepare_for_enumeration`]: pending counts, the FIFO ready queue
//!   and the dispatched/completed/failed/cancelled marks.

pub mod graph;
pub mod node;
pub mod traversal;

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use graph::Dag;
pub(crate) use graph::ensure_acyclic;
pub use node::DagNode;
pub use traversal::NodeState;
pub(crate) use traversal::Traversal;

/// Canonical key type used to identify nodes (and task groups).
pub type TaskKey = String;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(rw: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    rw.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(rw: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    rw.write().unwrap_or_else(PoisonError::into_inner)
}
