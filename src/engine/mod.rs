// src/engine/mod.rs

//! Invocation engine for task groups.
//!
//! This module ties together:
//! - the [`InvocationContext`] handed to every task item of one invocation
//! - the output records the invocation stream yields
//! - the traversal driver ([`driver`]) that walks a group's graph, runs
//!   ready items concurrently and aggregates their failures
//!
//! How failures stop the walk is chosen per invocation through
//! [`TerminationStrategy`].

pub mod driver;

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::dag::{lock, TaskKey};
use crate::errors::GroupError;

pub use crate::types::TerminationStrategy;

static NEXT_INVOCATION_ID: AtomicU64 = AtomicU64::new(1);

type ValueBag = HashMap<String, Arc<dyn Any + Send + Sync>>;

/// Per-invocation token passed to every task item.
///
/// The engine reads only the termination strategy. The key/value bag is for
/// items to share data within one invocation; clones share the same bag.
#[derive(Clone)]
pub struct InvocationContext {
    id: u64,
    termination: TerminationStrategy,
    values: Arc<Mutex<ValueBag>>,
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = lock(&self.values).keys().cloned().collect();
        keys.sort();
        f.debug_struct("InvocationContext")
            .field("id", &self.id)
            .field("termination", &self.termination)
            .field("keys", &keys)
            .finish()
    }
}

impl Default for InvocationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl InvocationContext {
    pub fn new() -> Self {
        Self {
            id: NEXT_INVOCATION_ID.fetch_add(1, Ordering::Relaxed),
            termination: TerminationStrategy::default(),
            values: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Process-unique id, used to correlate log lines of one invocation.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn termination(&self) -> TerminationStrategy {
        self.termination
    }

    pub fn with_termination(mut self, termination: TerminationStrategy) -> Self {
        self.termination = termination;
        self
    }

    /// Store `value` under `key`, replacing any previous value.
    pub fn put<T>(&self, key: impl Into<String>, value: T)
    where
        T: Any + Send + Sync,
    {
        lock(&self.values).insert(key.into(), Arc::new(value));
    }

    /// Value stored under `key`, if present and of type `T`.
    pub fn get<T>(&self, key: &str) -> Option<T>
    where
        T: Any + Clone + Send + Sync,
    {
        lock(&self.values)
            .get(key)
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    pub fn has_key(&self, key: &str) -> bool {
        lock(&self.values).contains_key(key)
    }
}

/// One successful task result, as yielded by the invocation stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutput<V> {
    pub key: TaskKey,
    pub value: V,
}

/// Everything one invocation produced.
#[derive(Debug)]
pub struct InvocationSummary<V> {
    /// Successful results in the order they were yielded.
    pub outputs: Vec<TaskOutput<V>>,
    /// The terminal error, if any task failed.
    pub error: Option<GroupError>,
}

impl<V> InvocationSummary<V> {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Keys of the successful results, in yield order.
    pub fn keys(&self) -> Vec<&str> {
        self.outputs.iter().map(|o| o.key.as_str()).collect()
    }

    pub fn value_of(&self, key: &str) -> Option<&V> {
        self.outputs.iter().find(|o| o.key == key).map(|o| &o.value)
    }

    pub fn into_result(self) -> Result<Vec<TaskOutput<V>>, GroupError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.outputs),
        }
    }
}
