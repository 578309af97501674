use crate::registry::RunnerRegistry;
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use gencore::{
    CancellationRegistry, CancellationToken, DependencyIndex, EngineError, ExecutionState, Graph, NodeContext,
    NodeId, NodeSpec, RunId, RunOutcome, Runner, Status, Value,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinError;

/// Upper bound for concurrently executing nodes.
pub const MAX_CONCURRENCY: usize = 8;

pub const BLOCKED_REASON: &str = "blocked: upstream failed/canceled";
pub const CYCLE_REASON: &str = "cyclic or unreachable dependency";

pub fn clamp_concurrency(requested: usize) -> usize {
    requested.clamp(1, MAX_CONCURRENCY)
}

/// Ephemeral data for one engine invocation; discarded when the run ends.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: RunId,
    pub concurrency: usize,
    pub started_at: DateTime<Utc>,
    /// Global stop for this run; node tokens are its children
    pub cancellation: CancellationToken,
}

impl RunContext {
    /// Start a run with fresh cancellation tokens.
    pub fn begin(concurrency: usize, cancellation: &CancellationRegistry) -> Self {
        Self {
            run_id: RunId::new_v4(),
            concurrency: clamp_concurrency(concurrency),
            started_at: Utc::now(),
            cancellation: cancellation.begin_run(),
        }
    }
}

/// Drives a graph to completion in dependency order under a concurrency bound.
pub struct DagScheduler<'a> {
    graph: &'a Graph,
    runners: &'a RunnerRegistry,
    state: &'a Arc<ExecutionState>,
    cancellation: &'a CancellationRegistry,
}

/// Bookkeeping for the nodes taking part in one scheduler run.
///
/// Dropping a frontier that still has pending nodes (the run future was
/// dropped, or scheduling bailed out) cancels the run token and resolves the
/// nodes that never started to `canceled`, so no node is left `queued`.
struct Frontier<'a> {
    state: &'a ExecutionState,
    run_token: CancellationToken,
    remaining: HashMap<NodeId, usize>,
    pending: HashSet<NodeId>,
    in_flight: HashSet<NodeId>,
    ready: VecDeque<NodeId>,
}

impl Drop for Frontier<'_> {
    fn drop(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        tracing::warn!(
            "Run abandoned with {} node(s) unfinished, {} still running",
            self.pending.len(),
            self.in_flight.len()
        );
        self.run_token.cancel();
        for id in self.pending.iter().filter(|id| !self.in_flight.contains(*id)) {
            settle(self.state.finish_canceled(id, "canceled: run abandoned before start"), id);
        }
    }
}

impl<'a> DagScheduler<'a> {
    pub fn new(
        graph: &'a Graph,
        runners: &'a RunnerRegistry,
        state: &'a Arc<ExecutionState>,
        cancellation: &'a CancellationRegistry,
    ) -> Self {
        Self {
            graph,
            runners,
            state,
            cancellation,
        }
    }

    /// Run every idle node of the graph.
    ///
    /// Nodes already `success` count as satisfied dependencies; nodes already
    /// `error` or `canceled` block their dependents until retried. Node
    /// failures are recorded on the nodes; `Err` is only returned for invalid
    /// input, before anything was scheduled.
    pub async fn execute(&self, ctx: &RunContext) -> Result<(), EngineError> {
        let index = self.graph.dependency_index()?;
        self.runners.ensure_covers(self.graph)?;
        for id in index.order() {
            if self.state.status(id).is_none() {
                return Err(EngineError::NodeNotFound(id.clone()));
            }
        }

        let mut frontier = self.seed(&index, &ctx.cancellation)?;
        tracing::info!(
            "Run {}: {} node(s) queued, concurrency {}",
            ctx.run_id,
            frontier.pending.len(),
            ctx.concurrency
        );

        let mut running = FuturesUnordered::new();
        let mut cancel_seen = false;

        loop {
            if ctx.cancellation.is_cancelled() {
                self.cancel_unstarted(&index, &mut frontier);
            }

            while frontier.in_flight.len() < ctx.concurrency {
                let Some(id) = frontier.ready.pop_front() else {
                    break;
                };
                if !frontier.pending.contains(&id) {
                    continue;
                }

                let token = self.cancellation.token(&id);
                if token.is_cancelled() {
                    settle(self.state.finish_canceled(&id, "canceled before start"), &id);
                    frontier.pending.remove(&id);
                    self.block_dependents(&id, &index, &mut frontier);
                    continue;
                }

                let node = self
                    .graph
                    .find_node(&id)
                    .ok_or_else(|| EngineError::NodeNotFound(id.clone()))?;
                let runner = self.runners.resolve(node.kind)?;
                let inputs = collect_inputs(self.graph, &id, self.state);

                tracing::debug!("Dispatching node {} ({})", id, runner.name());
                running.push(spawn_node(runner, node, inputs, self.state.clone(), token));
                frontier.in_flight.insert(id);
            }

            if running.is_empty() {
                if !frontier.pending.is_empty() {
                    self.resolve_deadlock(&index, &mut frontier);
                }
                break;
            }

            tokio::select! {
                Some((id, joined)) = running.next() => {
                    frontier.in_flight.remove(&id);
                    frontier.pending.remove(&id);

                    let status = finalize(self.state, &id, joined, true);
                    if status == Status::Success {
                        for dependent in index.dependents(&id) {
                            if let Some(left) = frontier.remaining.get_mut(dependent) {
                                *left = left.saturating_sub(1);
                                if *left == 0 && frontier.pending.contains(dependent) {
                                    frontier.ready.push_back(dependent.clone());
                                }
                            }
                        }
                    } else {
                        self.block_dependents(&id, &index, &mut frontier);
                    }
                }
                _ = ctx.cancellation.cancelled(), if !cancel_seen => {
                    tracing::info!("Run {}: cancel requested, {} node(s) still running", ctx.run_id, frontier.in_flight.len());
                    cancel_seen = true;
                }
            }
        }

        Ok(())
    }

    /// Queue idle nodes and account for nodes that finished in earlier runs.
    fn seed(&self, index: &DependencyIndex, run_token: &CancellationToken) -> Result<Frontier<'a>, EngineError> {
        let mut frontier = Frontier {
            state: self.state,
            run_token: run_token.clone(),
            remaining: index.in_degrees().clone(),
            pending: HashSet::new(),
            in_flight: HashSet::new(),
            ready: VecDeque::new(),
        };
        let mut failed_upstream = Vec::new();

        for id in index.order() {
            match self.state.status(id) {
                Some(Status::Idle) => {
                    self.state.transition(id, Status::Queued)?;
                    self.state.log(id, "queued");
                    self.state.set_cancel_requested(id, false);
                    frontier.pending.insert(id.clone());
                }
                // left behind by a run that never finished; the run lock means nobody owns it
                Some(Status::Queued) => {
                    self.state.log(id, "queued again after an interrupted run");
                    self.state.set_cancel_requested(id, false);
                    frontier.pending.insert(id.clone());
                }
                Some(Status::Success) => {
                    for dependent in index.dependents(id) {
                        if let Some(left) = frontier.remaining.get_mut(dependent) {
                            *left = left.saturating_sub(1);
                        }
                    }
                }
                Some(status) if status.is_failed() => failed_upstream.push(id.clone()),
                Some(status) => {
                    tracing::warn!("Node {} is {} and will not take part in this run", id, status);
                }
                None => return Err(EngineError::NodeNotFound(id.clone())),
            }
        }

        for id in &failed_upstream {
            self.block_dependents(id, index, &mut frontier);
        }

        frontier.ready = index
            .order()
            .iter()
            .filter(|id| frontier.pending.contains(*id) && frontier.remaining.get(*id) == Some(&0))
            .cloned()
            .collect();

        Ok(frontier)
    }

    /// Mark every queued node reachable from `failed` as blocked.
    fn block_dependents(&self, failed: &str, index: &DependencyIndex, frontier: &mut Frontier<'_>) {
        for id in index.reachable_from(failed) {
            if frontier.in_flight.contains(&id) || !frontier.pending.remove(&id) {
                continue;
            }
            self.state.log(&id, format!("upstream node {} did not succeed", failed));
            settle(self.state.finish_error(&id, BLOCKED_REASON), &id);
        }
    }

    /// Nothing is running or ready, yet nodes are still pending: they sit on
    /// (or behind) a cycle.
    fn resolve_deadlock(&self, index: &DependencyIndex, frontier: &mut Frontier<'_>) {
        let stuck: Vec<NodeId> = index
            .order()
            .iter()
            .filter(|id| frontier.pending.contains(*id))
            .cloned()
            .collect();
        tracing::warn!("{} node(s) cannot be scheduled: {}", stuck.len(), CYCLE_REASON);

        for id in stuck {
            frontier.pending.remove(&id);
            settle(self.state.finish_error(&id, CYCLE_REASON), &id);
        }
    }

    fn cancel_unstarted(&self, index: &DependencyIndex, frontier: &mut Frontier<'_>) {
        let unstarted: Vec<NodeId> = index
            .order()
            .iter()
            .filter(|id| frontier.pending.contains(*id) && !frontier.in_flight.contains(*id))
            .cloned()
            .collect();

        for id in unstarted {
            frontier.pending.remove(&id);
            settle(self.state.finish_canceled(&id, "canceled: run stopped before start"), &id);
        }
        frontier.ready.clear();
    }
}

/// Run `node` on its own task so a panicking runner cannot take the caller
/// down with it.
pub(crate) fn spawn_node(
    runner: Arc<dyn Runner>,
    node: &NodeSpec,
    inputs: HashMap<String, Value>,
    state: Arc<ExecutionState>,
    token: CancellationToken,
) -> impl Future<Output = (NodeId, Result<RunOutcome, JoinError>)> {
    let id = node.id.clone();
    let ctx = NodeContext::new(node.clone(), state, token).with_inputs(inputs);
    let handle = tokio::spawn(async move { runner.execute(ctx).await });
    async move { (id, handle.await) }
}

/// Make sure a finished execution left the node in a terminal status and
/// return that status.
///
/// With `resolve_skipped`, a skipped node is resolved to `error` so that a
/// DAG run still terminates; otherwise it keeps its current status.
pub(crate) fn finalize(
    state: &ExecutionState,
    id: &str,
    joined: Result<RunOutcome, JoinError>,
    resolve_skipped: bool,
) -> Status {
    match joined {
        Ok(RunOutcome::Skipped { reason }) => {
            if resolve_skipped {
                settle(state.finish_error(id, reason), id);
            }
        }
        Ok(outcome) => {
            let current = state.status(id);
            if current.map_or(false, |s| !s.is_terminal()) {
                tracing::error!("Runner for node {} returned {:?} without resolving the node", id, outcome);
                settle(state.finish_error(id, "runner returned without a terminal status"), id);
            }
        }
        Err(e) => {
            tracing::error!("Runner for node {} panicked: {}", id, e);
            settle(state.finish_error(id, format!("runner panicked: {}", e)), id);
        }
    }

    let status = state.status(id).unwrap_or_default();
    match status {
        Status::Success => tracing::info!("Node {} completed", id),
        Status::Error | Status::Canceled => tracing::warn!("Node {} ended {}", id, status),
        _ => tracing::debug!("Node {} left {}", id, status),
    }
    status
}

/// Values published by upstream nodes on the ports wired into `id`.
pub(crate) fn collect_inputs(graph: &Graph, id: &str, state: &ExecutionState) -> HashMap<String, Value> {
    let mut inputs = HashMap::new();
    for edge in graph.incoming(id) {
        let value = state
            .get(&edge.source)
            .and_then(|upstream| upstream.last_result)
            .and_then(|result| result.outputs.get(&edge.source_port).cloned());
        if let Some(value) = value {
            inputs.insert(edge.target_port.clone(), value);
        }
    }
    inputs
}

fn settle<T>(result: Result<T, gencore::TransitionError>, id: &str) {
    if let Err(e) = result {
        tracing::warn!("Node {}: {}", id, e);
    }
}
