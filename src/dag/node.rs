// src/dag/node.rs

use std::fmt;
use std::sync::RwLock;

use crate::dag::{read, write, TaskKey};

/// A named vertex of a [`Dag`](crate::dag::Dag).
///
/// Only the dependency side of each edge is stored on the node. Dependents
/// are derived per graph, because a shared node may have different
/// dependents depending on which graph is looking at it.
pub struct DagNode<D> {
    key: TaskKey,
    data: D,
    dependency_keys: RwLock<Vec<TaskKey>>,
}

impl<D> DagNode<D> {
    pub fn new(key: impl Into<TaskKey>, data: D) -> Self {
        Self {
            key: key.into(),
            data,
            dependency_keys: RwLock::new(Vec::new()),
        }
    }

    /// Create a node that already declares some dependencies.
    ///
    /// The dependencies do not need to exist yet; the link stays pending until
    /// a node with that key joins the graph.
    pub fn with_dependencies<I, K>(key: impl Into<TaskKey>, data: D, dependencies: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<TaskKey>,
    {
        let node = Self::new(key, data);
        for dep in dependencies {
            node.add_dependency(&dep.into());
        }
        node
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn data(&self) -> &D {
        &self.data
    }

    /// Snapshot of the keys this node depends on, in declaration order.
    pub fn dependency_keys(&self) -> Vec<TaskKey> {
        read(&self.dependency_keys).clone()
    }

    pub fn has_dependency(&self, key: &str) -> bool {
        read(&self.dependency_keys).iter().any(|k| k == key)
    }

    /// Declare a dependency on `key`. Returns `false` if it was already declared.
    ///
    /// # Panics
    ///
    /// Panics if `key` is this node's own key.
    pub fn add_dependency(&self, key: &str) -> bool {
        assert_ne!(key, self.key, "node '{}' cannot depend on itself", self.key);
        let mut deps = write(&self.dependency_keys);
        if deps.iter().any(|k| k == key) {
            return false;
        }
        deps.push(key.to_string());
        true
    }

    /// Drop a declared dependency. Returns `false` if it was not declared.
    pub fn remove_dependency(&self, key: &str) -> bool {
        let mut deps = write(&self.dependency_keys);
        let before = deps.len();
        deps.retain(|k| k != key);
        deps.len() != before
    }
}

impl<D: fmt::Debug> fmt::Debug for DagNode<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DagNode")
            .field("key", &self.key)
            .field("data", &self.data)
            .field("dependency_keys", &*read(&self.dependency_keys))
            .finish()
    }
}
