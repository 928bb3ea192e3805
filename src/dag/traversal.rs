// src/dag/traversal.rs

//! Per-run traversal state for a prepared graph.

use std::collections::{HashMap, VecDeque};

use tracing::debug;

use crate::dag::TaskKey;

/// State of a node within one traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Waiting for at least one dependency to complete.
    Pending,
    /// All dependencies completed; queued but not yet handed out.
    Ready,
    /// Handed out by `get_next`; waiting for a report.
    Dispatched,
    /// Reported complete.
    Completed,
    /// Reported failed.
    Failed,
    /// Never ran: an upstream node failed, or the node was skipped.
    Cancelled,
}

#[derive(Debug)]
struct NodeProgress {
    /// Dependencies that have not completed yet.
    unresolved: usize,
    dependents: Vec<TaskKey>,
    state: NodeState,
}

/// Dependency-ordered enumeration over a fixed set of nodes.
///
/// Built from `(key, dependency keys)` pairs in insertion order. Every
/// dependency key must be one of the keys; the graph checks that before
/// building a traversal.
#[derive(Debug)]
pub(crate) struct Traversal {
    progress: HashMap<TaskKey, NodeProgress>,
    ready: VecDeque<TaskKey>,
}

impl Traversal {
    pub(crate) fn new(edges: Vec<(TaskKey, Vec<TaskKey>)>) -> Self {
        let mut progress: HashMap<TaskKey, NodeProgress> = edges
            .iter()
            .map(|(key, deps)| {
                (
                    key.clone(),
                    NodeProgress {
                        unresolved: deps.len(),
                        dependents: Vec::new(),
                        state: NodeState::Pending,
                    },
                )
            })
            .collect();

        for (key, deps) in edges.iter() {
            for dep in deps {
                if let Some(p) = progress.get_mut(dep) {
                    p.dependents.push(key.clone());
                }
            }
        }

        let mut ready = VecDeque::new();
        for (key, deps) in edges.iter() {
            if deps.is_empty() {
                if let Some(p) = progress.get_mut(key) {
                    p.state = NodeState::Ready;
                }
                ready.push_back(key.clone());
            }
        }

        Self { progress, ready }
    }

    /// Pop the oldest ready node and mark it dispatched.
    pub(crate) fn pop_ready(&mut self) -> Option<TaskKey> {
        let key = self.ready.pop_front()?;
        let p = self.expect_progress(&key, "dispatch");
        assert_eq!(
            p.state,
            NodeState::Ready,
            "node '{key}' was queued while {:?}",
            p.state
        );
        p.state = NodeState::Dispatched;
        Some(key)
    }

    /// Mark a dispatched node complete and return the dependents that became
    /// ready because of it.
    pub(crate) fn complete(&mut self, key: &str) -> Vec<TaskKey> {
        let dependents = self.settle(key, NodeState::Completed);
        let mut newly_ready = Vec::new();

        for name in dependents {
            if let Some(p) = self.progress.get_mut(&name) {
                if p.state != NodeState::Pending {
                    // Cancelled through another failed dependency.
                    continue;
                }
                p.unresolved -= 1;
                if p.unresolved == 0 {
                    p.state = NodeState::Ready;
                    self.ready.push_back(name.clone());
                    newly_ready.push(name);
                }
            }
        }

        newly_ready
    }

    /// Mark a dispatched node failed and cancel everything downstream of it.
    ///
    /// Returns the nodes that were newly cancelled.
    pub(crate) fn fail(&mut self, key: &str) -> Vec<TaskKey> {
        let dependents = self.settle(key, NodeState::Failed);
        self.cancel_downstream(dependents)
    }

    /// Mark a dispatched node as skipped (never run) and cancel everything
    /// downstream of it.
    pub(crate) fn skip(&mut self, key: &str) -> Vec<TaskKey> {
        let dependents = self.settle(key, NodeState::Cancelled);
        self.cancel_downstream(dependents)
    }

    pub(crate) fn state_of(&self, key: &str) -> Option<NodeState> {
        self.progress.get(key).map(|p| p.state)
    }

    pub(crate) fn ready_len(&self) -> usize {
        self.ready.len()
    }

    /// True once nothing is queued and nothing is waiting for a report.
    pub(crate) fn is_exhausted(&self) -> bool {
        self.ready.is_empty()
            && !self
                .progress
                .values()
                .any(|p| p.state == NodeState::Dispatched)
    }

    fn settle(&mut self, key: &str, outcome: NodeState) -> Vec<TaskKey> {
        let p = self.expect_progress(key, "report");
        assert_eq!(
            p.state,
            NodeState::Dispatched,
            "node '{key}' reported as {outcome:?} while {:?}",
            p.state
        );
        p.state = outcome;
        p.dependents.clone()
    }

    fn cancel_downstream(&mut self, mut stack: Vec<TaskKey>) -> Vec<TaskKey> {
        let mut newly_cancelled = Vec::new();

        while let Some(name) = stack.pop() {
            if let Some(p) = self.progress.get_mut(&name) {
                match p.state {
                    NodeState::Pending => {
                        p.state = NodeState::Cancelled;
                        debug!(node = %name, "cancelled due to upstream failure");
                        stack.extend(p.dependents.iter().cloned());
                        newly_cancelled.push(name);
                    }
                    NodeState::Ready
                    | NodeState::Dispatched
                    | NodeState::Completed
                    | NodeState::Failed
                    | NodeState::Cancelled => {
                        // Already settled or cancelled through another path.
                    }
                }
            }
        }

        newly_cancelled
    }

    fn expect_progress(&mut self, key: &str, op: &str) -> &mut NodeProgress {
        match self.progress.get_mut(key) {
            Some(p) => p,
            None => panic!("cannot {op} node '{key}': it is not part of this traversal"),
        }
    }
}
