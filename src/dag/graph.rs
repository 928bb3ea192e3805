// src/dag/graph.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use tracing::{debug, warn};

use crate::dag::node::DagNode;
use crate::dag::traversal::{NodeState, Traversal};
use crate::dag::{lock, TaskKey};
use crate::errors::GraphError;

struct DagInner<D> {
    root_key: TaskKey,
    nodes: HashMap<TaskKey, Arc<DagNode<D>>>,
    /// Keys in insertion order; seeds and dependents follow this order.
    order: Vec<TaskKey>,
    /// Graphs that merged this one in as a dependency.
    parents: Vec<Weak<Mutex<DagInner<D>>>>,
    traversal: Option<Traversal>,
}

impl<D> DagInner<D> {
    fn snapshot(&self) -> Vec<Arc<DagNode<D>>> {
        self.order
            .iter()
            .filter_map(|key| self.nodes.get(key).cloned())
            .collect()
    }

    /// Add every node whose key is not present yet. Existing keys win.
    fn absorb(&mut self, nodes: &[Arc<DagNode<D>>]) -> usize {
        let mut added = 0;
        for node in nodes {
            if !self.nodes.contains_key(node.key()) {
                self.order.push(node.key().to_string());
                self.nodes.insert(node.key().to_string(), Arc::clone(node));
                added += 1;
            }
        }
        added
    }

    fn root(&self) -> Arc<DagNode<D>> {
        Arc::clone(&self.nodes[&self.root_key])
    }

    fn live_parents(&self) -> Vec<Dag<D>> {
        self.parents
            .iter()
            .filter_map(Weak::upgrade)
            .map(|inner| Dag { inner })
            .collect()
    }

    fn build_traversal(&self) -> Result<Traversal, GraphError> {
        let mut edges = Vec::with_capacity(self.order.len());

        for key in self.order.iter() {
            let deps = self.nodes[key].dependency_keys();
            if let Some(missing) = deps.iter().find(|dep| !self.nodes.contains_key(*dep)) {
                return Err(GraphError::UnknownDependency {
                    node: key.clone(),
                    dependency: missing.clone(),
                });
            }
            edges.push((key.clone(), deps));
        }

        ensure_acyclic(&edges)?;
        Ok(Traversal::new(edges))
    }

    fn traversal_mut(&mut self, op: &str) -> &mut Traversal {
        match self.traversal.as_mut() {
            Some(t) => t,
            None => panic!(
                "graph '{}' must be prepared for enumeration before {op}",
                self.root_key
            ),
        }
    }
}

/// Keyed directed acyclic graph with one designated root.
///
/// `Dag` is a cheap handle: clones share the same node table. Nodes are
/// reference counted, so merging one graph into another only copies node
/// handles, and a node shared by several graphs is the same node in all of
/// them.
///
/// Edge direction follows "depends on": if B depends on A, then A must be
/// reported complete before B is handed out by [`get_next`](Self::get_next).
pub struct Dag<D> {
    inner: Arc<Mutex<DagInner<D>>>,
}

impl<D> Clone for Dag<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D> fmt::Debug for Dag<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("Dag")
            .field("root", &inner.root_key)
            .field("nodes", &inner.order)
            .field("parents", &inner.parents.len())
            .finish_non_exhaustive()
    }
}

impl<D> Dag<D> {
    /// Create a graph seeded with its root node.
    pub fn new(root: DagNode<D>) -> Self {
        let key = root.key().to_string();
        let mut nodes = HashMap::new();
        nodes.insert(key.clone(), Arc::new(root));

        Self {
            inner: Arc::new(Mutex::new(DagInner {
                root_key: key.clone(),
                nodes,
                order: vec![key],
                parents: Vec::new(),
                traversal: None,
            })),
        }
    }

    pub fn root_key(&self) -> TaskKey {
        lock(&self.inner).root_key.clone()
    }

    pub fn root(&self) -> Arc<DagNode<D>> {
        lock(&self.inner).root()
    }

    pub fn node(&self, key: &str) -> Option<Arc<DagNode<D>>> {
        lock(&self.inner).nodes.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        lock(&self.inner).nodes.contains_key(key)
    }

    /// All keys, in insertion order.
    pub fn keys(&self) -> Vec<TaskKey> {
        lock(&self.inner).order.clone()
    }

    /// All node handles, in insertion order.
    pub fn nodes(&self) -> Vec<Arc<DagNode<D>>> {
        lock(&self.inner).snapshot()
    }

    pub fn node_count(&self) -> usize {
        lock(&self.inner).order.len()
    }

    /// Whether both handles point at the same graph.
    pub fn same_graph(&self, other: &Dag<D>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Graphs that merged this graph in as a dependency (and are still alive).
    pub fn parents(&self) -> Vec<Dag<D>> {
        lock(&self.inner).live_parents()
    }

    /// Direct dependencies of `key` as declared on the node.
    pub fn dependencies_of(&self, key: &str) -> Vec<TaskKey> {
        self.node(key)
            .map(|n| n.dependency_keys())
            .unwrap_or_default()
    }

    /// Nodes of this graph that declare a dependency on `key`.
    pub fn dependents_of(&self, key: &str) -> Vec<TaskKey> {
        lock(&self.inner)
            .snapshot()
            .into_iter()
            .filter(|n| n.has_dependency(key))
            .map(|n| n.key().to_string())
            .collect()
    }

    /// Register a new node.
    ///
    /// Dependencies the node declares on keys that are not in the graph yet
    /// stay pending until those keys are added. The new node is also made
    /// visible to every graph this one was merged into.
    pub fn add_node(&self, node: DagNode<D>) -> Result<Arc<DagNode<D>>, GraphError> {
        let node = Arc::new(node);
        {
            let mut inner = lock(&self.inner);
            if inner.nodes.contains_key(node.key()) {
                return Err(GraphError::DuplicateNode(node.key().to_string()));
            }
            inner.absorb(std::slice::from_ref(&node));
        }

        debug!(node = %node.key(), "added node to graph");
        self.bubble_up(&mut Vec::new())?;
        Ok(node)
    }

    /// Declare that `dependent` depends on `dependency`.
    ///
    /// `dependent` must already be in the graph; `dependency` may be added
    /// later.
    pub fn add_dependency(&self, dependent: &str, dependency: &str) -> Result<(), GraphError> {
        if dependent == dependency {
            return Err(GraphError::CircularDependency(vec![
                dependent.to_string(),
                dependency.to_string(),
            ]));
        }
        let node = self
            .node(dependent)
            .ok_or_else(|| GraphError::UnknownNode(dependent.to_string()))?;
        node.add_dependency(dependency);
        Ok(())
    }

    /// Merge `dependency` into this graph as a dependency of this graph's root.
    ///
    /// Every node of `dependency` that is not already present (by key) joins
    /// this graph, the root gains an edge to `dependency`'s root, and the
    /// merged table is propagated to every graph this one was merged into.
    pub fn merge(&self, dependency: &Dag<D>) -> Result<(), GraphError> {
        let (dep_root, dep_nodes) = {
            let other = lock(&dependency.inner);
            (other.root_key.clone(), other.snapshot())
        };

        let root = {
            let inner = lock(&self.inner);
            let closes_cycle = Arc::ptr_eq(&self.inner, &dependency.inner)
                || dep_nodes.iter().any(|n| n.key() == inner.root_key);
            if closes_cycle {
                return Err(GraphError::CircularDependency(vec![
                    inner.root_key.clone(),
                    dep_root,
                    inner.root_key.clone(),
                ]));
            }
            inner.root()
        };

        root.add_dependency(&dep_root);
        let added = lock(&self.inner).absorb(&dep_nodes);

        {
            let weak = Arc::downgrade(&self.inner);
            let mut other = lock(&dependency.inner);
            if !other.parents.iter().any(|p| p.ptr_eq(&weak)) {
                other.parents.push(weak);
            }
        }

        debug!(
            graph = %root.key(),
            dependency = %dep_root,
            added,
            "merged dependency graph"
        );

        self.bubble_up(&mut Vec::new())
    }

    /// Push this graph's node table into every ancestor graph.
    fn bubble_up(&self, path: &mut Vec<TaskKey>) -> Result<(), GraphError> {
        let (root_key, nodes, parents) = {
            let inner = lock(&self.inner);
            (inner.root_key.clone(), inner.snapshot(), inner.live_parents())
        };

        if path.contains(&root_key) {
            path.push(root_key);
            return Err(GraphError::CircularDependency(path.clone()));
        }

        path.push(root_key);
        for parent in parents {
            lock(&parent.inner).absorb(&nodes);
            parent.bubble_up(path)?;
        }
        path.pop();

        Ok(())
    }

    /// Finalize the graph for a traversal.
    ///
    /// Checks that every declared dependency is present and that there is no
    /// cycle, computes pending counts and seeds the ready queue with every
    /// node that has no dependencies (in insertion order). Any previous
    /// traversal state is discarded.
    pub fn prepare_for_enumeration(&self) -> Result<(), GraphError> {
        let mut inner = lock(&self.inner);

        if inner.traversal.as_ref().is_some_and(|t| !t.is_exhausted()) {
            warn!(
                graph = %inner.root_key,
                "re-preparing a graph whose previous traversal did not finish"
            );
        }

        let traversal = inner.build_traversal()?;
        debug!(
            graph = %inner.root_key,
            nodes = inner.order.len(),
            ready = traversal.ready_len(),
            "graph prepared for enumeration"
        );
        inner.traversal = Some(traversal);
        Ok(())
    }

    /// Hand out one ready node, or `None` if nothing is ready right now.
    ///
    /// Each node is handed out at most once per traversal, even when several
    /// workers call this concurrently.
    ///
    /// # Panics
    ///
    /// Panics if the graph was never prepared.
    pub fn get_next(&self) -> Option<Arc<DagNode<D>>> {
        let mut inner = lock(&self.inner);
        let key = inner.traversal_mut("get_next").pop_ready()?;
        inner.nodes.get(&key).cloned()
    }

    /// Report a handed-out node as complete. Returns the keys that became
    /// ready as a result.
    ///
    /// # Panics
    ///
    /// Panics if the node was not handed out by [`get_next`](Self::get_next)
    /// or was already reported.
    pub fn report_completion(&self, key: &str) -> Vec<TaskKey> {
        let newly_ready = lock(&self.inner)
            .traversal_mut("report_completion")
            .complete(key);
        debug!(node = %key, ?newly_ready, "node completed");
        newly_ready
    }

    /// Report a handed-out node as failed. Its transitive dependents are
    /// cancelled and will never be handed out; unrelated branches are not
    /// affected. Returns the keys that were cancelled.
    ///
    /// # Panics
    ///
    /// Same as [`report_completion`](Self::report_completion).
    pub fn report_failure(&self, key: &str) -> Vec<TaskKey> {
        let cancelled = lock(&self.inner)
            .traversal_mut("report_failure")
            .fail(key);
        debug!(node = %key, ?cancelled, "node failed");
        cancelled
    }

    /// Report a handed-out node as skipped: it did not run and everything
    /// downstream of it is cancelled. Returns the keys that were cancelled.
    ///
    /// # Panics
    ///
    /// Same as [`report_completion`](Self::report_completion).
    pub fn report_skipped(&self, key: &str) -> Vec<TaskKey> {
        let cancelled = lock(&self.inner)
            .traversal_mut("report_skipped")
            .skip(key);
        debug!(node = %key, ?cancelled, "node skipped");
        cancelled
    }

    /// State of `key` in the current traversal, if the graph is prepared and
    /// the key was part of it.
    pub fn state_of(&self, key: &str) -> Option<NodeState> {
        lock(&self.inner).traversal.as_ref()?.state_of(key)
    }

    /// True when no traversal is active or the active one has nothing left to
    /// hand out and nothing outstanding.
    pub fn is_exhausted(&self) -> bool {
        lock(&self.inner)
            .traversal
            .as_ref()
            .is_none_or(Traversal::is_exhausted)
    }

    /// A fresh traversal owned by the caller.
    ///
    /// The graph's own traversal state is left alone, so any number of
    /// detached traversals can walk the same graph at once.
    pub(crate) fn detached_traversal(&self) -> Result<Traversal, GraphError> {
        lock(&self.inner).build_traversal()
    }

    /// The order a sequential traversal would hand nodes out in, computed
    /// without touching the graph's own traversal state.
    pub fn enumeration_order(&self) -> Result<Vec<TaskKey>, GraphError> {
        let mut traversal = self.detached_traversal()?;
        let mut order = Vec::new();
        while let Some(key) = traversal.pop_ready() {
            traversal.complete(&key);
            order.push(key);
        }
        Ok(order)
    }
}

/// Reject dependency cycles.
///
/// Edge direction: dependency -> dependent.
pub(crate) fn ensure_acyclic(edges: &[(TaskKey, Vec<TaskKey>)]) -> Result<(), GraphError> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for (key, _) in edges.iter() {
        graph.add_node(key.as_str());
    }
    for (key, deps) in edges.iter() {
        for dep in deps.iter() {
            graph.add_edge(dep.as_str(), key.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(GraphError::CircularDependency(vec![
            cycle.node_id().to_string(),
        ])),
    }
}
