// src/engine/driver.rs

//! Traversal driver: walks one task group's graph for one invocation.
//!
//! Each driver walks its own detached traversal of the group's [`Dag`], so
//! overlapping invocations of one group never share progress. It pulls
//! every ready node, runs its item (all ready items run
//! concurrently), reports the outcome and yields successful results as they
//! arrive. Failures are collected and surface as one error after the last
//! result, so partial progress is never hidden.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::anyhow;
use futures::stream::{self, FuturesUnordered, Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::dag::{Dag, DagNode, TaskKey, Traversal};
use crate::engine::{InvocationContext, InvocationSummary, TaskOutput, TerminationStrategy};
use crate::errors::{GroupError, TaskFailure};
use crate::group::{TaskGroup, TaskGroupEntry};

type EntryNode<V> = Arc<DagNode<TaskGroupEntry<V>>>;
type InFlight<V> = Pin<Box<dyn Future<Output = Settled<V>> + Send>>;

/// A unit of work the driver was waiting on.
enum Settled<V> {
    /// A task item's invocation finished.
    Task {
        node: EntryNode<V>,
        outcome: anyhow::Result<V>,
    },
    /// A cancelled proxy ran its `after_post_run(true)` hook.
    FaultHook {
        key: TaskKey,
        outcome: anyhow::Result<()>,
    },
}

struct Driver<V> {
    /// Key of the group the caller invoked (not its proxy).
    invoked_key: TaskKey,
    /// Root of the graph actually being walked.
    run_root: TaskKey,
    dag: Dag<TaskGroupEntry<V>>,
    traversal: Traversal,
    ctx: InvocationContext,
    in_flight: FuturesUnordered<InFlight<V>>,
    outputs: VecDeque<TaskOutput<V>>,
    failures: Vec<TaskFailure>,
    /// Set once the in-progress strategy saw a failure; nothing new starts.
    halted: bool,
    completed: usize,
}

impl<V> Driver<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn start(group: TaskGroup<V>, ctx: InvocationContext) -> Result<Self, GroupError> {
        // Prepare hooks may attach the group's first post-run dependent,
        // which switches the graph to walk over to the new proxy.
        let mut target = group.proxy().unwrap_or_else(|| group.clone());
        loop {
            target.prepare_entries();
            match group.proxy() {
                Some(proxy) if !proxy.same_group(&target) => target = proxy,
                _ => break,
            }
        }

        let dag = target.dag().clone();
        let traversal = dag.detached_traversal()?;

        info!(
            invocation = ctx.id(),
            group = %group.key(),
            root = %target.key(),
            tasks = dag.node_count(),
            termination = ?ctx.termination(),
            "invoking task group"
        );

        Ok(Self {
            invoked_key: group.key(),
            run_root: target.key(),
            dag,
            traversal,
            ctx,
            in_flight: FuturesUnordered::new(),
            outputs: VecDeque::new(),
            failures: Vec::new(),
            halted: false,
            completed: 0,
        })
    }

    /// Next successful result, or `None` once the traversal is over.
    async fn next_output(&mut self) -> Option<TaskOutput<V>> {
        loop {
            if let Some(output) = self.outputs.pop_front() {
                return Some(output);
            }

            self.dispatch_ready();
            if let Some(output) = self.outputs.pop_front() {
                return Some(output);
            }

            match self.in_flight.next().await {
                Some(settled) => self.settle(settled),
                None => return None,
            }
        }
    }

    /// Drain the ready queue, starting or short-circuiting every node in it.
    fn dispatch_ready(&mut self) {
        while let Some(key) = self.traversal.pop_ready() {
            // Graphs only ever gain nodes, so every traversal key resolves.
            let Some(node) = self.dag.node(&key) else {
                continue;
            };
            let entry = node.data();

            if self.halted {
                debug!(invocation = self.ctx.id(), task = %key, "skipping task after failure");
                let mut cancelled = self.traversal.skip(&key);
                cancelled.insert(0, key);
                self.notify_cancelled(&cancelled);
                continue;
            }

            if self.reuses_cached_result(&node) {
                if let Some(value) = entry.cached_result() {
                    debug!(invocation = self.ctx.id(), task = %key, "reusing cached result");
                    self.complete(&node, value);
                    continue;
                }
            }

            if entry.item().is_hot() {
                debug!(invocation = self.ctx.id(), task = %key, "task is hot; taking its result");
                match entry.item().result() {
                    Some(value) => self.complete(&node, value),
                    None => self.fail(key, anyhow!("hot task produced no result")),
                }
                continue;
            }

            debug!(invocation = self.ctx.id(), task = %key, "dispatching task");
            let invocation = entry.item().invoke(&self.ctx);
            self.in_flight.push(Box::pin(async move {
                let outcome = invocation.await;
                Settled::Task { node, outcome }
            }));
        }
    }

    /// Entries that already ran keep their result, except the root being
    /// walked and an actual root reached through that root's proxy.
    fn reuses_cached_result(&self, node: &EntryNode<V>) -> bool {
        if node.key() == self.run_root {
            return false;
        }
        node.data()
            .proxy_key()
            .is_none_or(|proxy_key| proxy_key != self.run_root)
    }

    fn settle(&mut self, settled: Settled<V>) {
        match settled {
            Settled::Task {
                node,
                outcome: Ok(value),
            } => {
                node.data().set_result(value.clone());
                self.complete(&node, value);
            }
            Settled::Task {
                node,
                outcome: Err(err),
            } => self.fail(node.key().to_string(), err),
            Settled::FaultHook {
                key,
                outcome: Err(err),
            } => {
                warn!(invocation = self.ctx.id(), task = %key, error = %err, "post-run fault hook failed");
                self.failures.push(TaskFailure::new(key, err));
            }
            Settled::FaultHook { outcome: Ok(()), .. } => {}
        }
    }

    fn complete(&mut self, node: &EntryNode<V>, value: V) {
        let key = node.key().to_string();
        self.traversal.complete(&key);
        self.completed += 1;
        self.outputs.push_back(TaskOutput { key, value });
    }

    fn fail(&mut self, key: TaskKey, err: anyhow::Error) {
        warn!(invocation = self.ctx.id(), task = %key, error = %err, "task failed");

        if self.ctx.termination() == TerminationStrategy::TerminateOnInProgressTasksCompletion
            && !self.halted
        {
            info!(
                invocation = self.ctx.id(),
                in_flight = self.in_flight.len(),
                "failure observed; waiting for in-progress tasks and starting no more"
            );
            self.halted = true;
        }

        let cancelled = self.traversal.fail(&key);
        self.failures.push(TaskFailure::new(key, err));
        self.notify_cancelled(&cancelled);
    }

    /// Let every cancelled proxy tell its actual root the group faulted.
    fn notify_cancelled(&mut self, keys: &[TaskKey]) {
        for key in keys {
            let Some(node) = self.dag.node(key) else {
                continue;
            };
            if !node.data().is_proxy() {
                continue;
            }

            debug!(invocation = self.ctx.id(), task = %key, "running post-run fault hook");
            let hook = node.data().item().after_post_run(true);
            let key = key.clone();
            self.in_flight.push(Box::pin(async move {
                let outcome = hook.await;
                Settled::FaultHook { key, outcome }
            }));
        }
    }

    /// The terminal error of the invocation, if anything failed.
    fn finish(self) -> Option<GroupError> {
        let failed = self.failures.len();
        let error = GroupError::from_failures(self.failures);

        if failed == 0 {
            info!(
                invocation = self.ctx.id(),
                group = %self.invoked_key,
                completed = self.completed,
                "task group invocation finished"
            );
        } else {
            warn!(
                invocation = self.ctx.id(),
                group = %self.invoked_key,
                completed = self.completed,
                failed,
                "task group invocation finished with failures"
            );
        }

        error
    }
}

enum Phase<V> {
    Init(TaskGroup<V>, InvocationContext),
    Running(Box<Driver<V>>),
    Done,
}

/// Stream of a group's results, ending with the aggregated error if any task
/// failed.
///
/// Nothing runs until the stream is polled. Dropping it drops the tasks
/// still in flight.
pub(crate) fn invoke<V>(
    group: TaskGroup<V>,
    ctx: InvocationContext,
) -> impl Stream<Item = Result<TaskOutput<V>, GroupError>> + Send + use<V>
where
    V: Clone + Send + Sync + 'static,
{
    stream::unfold(Phase::Init(group, ctx), |phase| async move {
        match phase {
            Phase::Init(group, ctx) => match Driver::start(group, ctx) {
                Ok(driver) => step(Box::new(driver)).await,
                Err(err) => Some((Err(err), Phase::Done)),
            },
            Phase::Running(driver) => step(driver).await,
            Phase::Done => None,
        }
    })
}

async fn step<V>(
    mut driver: Box<Driver<V>>,
) -> Option<(Result<TaskOutput<V>, GroupError>, Phase<V>)>
where
    V: Clone + Send + Sync + 'static,
{
    match driver.next_output().await {
        Some(output) => Some((Ok(output), Phase::Running(driver))),
        None => driver.finish().map(|err| (Err(err), Phase::Done)),
    }
}

/// Drain an invocation stream into a summary.
pub(crate) async fn collect<V, S>(stream: S) -> InvocationSummary<V>
where
    S: Stream<Item = Result<TaskOutput<V>, GroupError>>,
{
    let mut stream = std::pin::pin!(stream);
    let mut outputs = Vec::new();
    let mut error = None;

    while let Some(item) = stream.next().await {
        match item {
            Ok(output) => outputs.push(output),
            Err(err) => error = Some(err),
        }
    }

    InvocationSummary { outputs, error }
}
