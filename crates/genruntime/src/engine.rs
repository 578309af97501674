use crate::registry::RunnerRegistry;
use crate::report::{RunMode, RunReport};
use crate::retry::retry_failed;
use crate::scheduler::{collect_inputs, finalize, spawn_node, DagScheduler, RunContext};
use crate::RuntimeConfig;
use chrono::Utc;
use gencore::{
    CancellationRegistry, EngineError, EventBus, ExecutionEvent, ExecutionState, Graph, NodeId, NodeState, Status,
    TransitionError,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, Mutex};

/// Entry point for executing generation graphs.
///
/// Holds the current graph snapshot, the runner registry, the execution
/// state store and the cancellation registry. One run may be active at a
/// time; cancellation, retry and state queries are available concurrently.
pub struct GenEngine {
    runners: Arc<RunnerRegistry>,
    state: Arc<ExecutionState>,
    cancellation: Arc<CancellationRegistry>,
    event_bus: EventBus,
    graph: RwLock<Arc<Graph>>,
    config: RuntimeConfig,
    run_lock: Mutex<()>,
}

impl GenEngine {
    /// Create an engine with default settings
    pub fn new(runners: RunnerRegistry) -> Self {
        Self::with_config(runners, RuntimeConfig::default())
    }

    pub fn with_config(runners: RunnerRegistry, config: RuntimeConfig) -> Self {
        let event_bus = EventBus::new(config.event_buffer_size);
        Self {
            runners: Arc::new(runners),
            state: Arc::new(ExecutionState::new(event_bus.clone())),
            cancellation: Arc::new(CancellationRegistry::new()),
            event_bus,
            graph: RwLock::new(Arc::new(Graph::new())),
            config,
            run_lock: Mutex::new(()),
        }
    }

    /// Replace the graph snapshot.
    ///
    /// The graph is validated up front: dangling edges, self-loops and kinds
    /// without a runner are rejected. State of nodes that survive the swap is
    /// kept; removed nodes lose theirs.
    pub fn load_graph(&self, graph: Graph) -> Result<(), EngineError> {
        let _guard = self.run_lock.try_lock().map_err(|_| EngineError::RunInProgress)?;
        graph.dependency_index()?;
        self.runners.ensure_covers(&graph)?;

        self.state.sync_with(&graph);
        tracing::info!("Loaded graph with {} node(s), {} edge(s)", graph.nodes.len(), graph.edges.len());
        *self.graph.write() = Arc::new(graph);
        Ok(())
    }

    pub fn graph(&self) -> Arc<Graph> {
        self.graph.read().clone()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn runners(&self) -> &Arc<RunnerRegistry> {
        &self.runners
    }

    /// Run a single idle node, ignoring its dependencies.
    ///
    /// Inputs from upstream nodes are still delivered when those nodes have a
    /// result. A node skipped by its runner stays `idle`.
    pub async fn run_selected(&self, id: &str) -> Result<RunReport, EngineError> {
        let _guard = self.run_lock.try_lock().map_err(|_| EngineError::RunInProgress)?;
        let graph = self.graph();
        let node = graph
            .find_node(id)
            .ok_or_else(|| EngineError::NodeNotFound(id.to_string()))?;
        let runner = self.runners.resolve(node.kind)?;
        self.ensure_idle(id)?;

        let ctx = RunContext::begin(1, &self.cancellation);
        let started = self.start_run(&ctx, RunMode::Selected, 1);

        self.state.log(id, "queued");
        self.state.set_cancel_requested(id, false);
        let inputs = collect_inputs(&graph, id, &self.state);
        let token = self.cancellation.token(id);
        let (id, joined) = spawn_node(runner, node, inputs, self.state.clone(), token).await;
        finalize(&self.state, &id, joined, false);

        Ok(self.finish_run(&ctx, RunMode::Selected, &graph, &[id], started))
    }

    /// Run every idle node one after another in graph order.
    ///
    /// Edges are not consulted: a node may run before its upstream nodes.
    /// After `cancel_all`, the nodes not yet started are resolved to
    /// `canceled`.
    pub async fn run_all(&self) -> Result<RunReport, EngineError> {
        let _guard = self.run_lock.try_lock().map_err(|_| EngineError::RunInProgress)?;
        let graph = self.graph();
        self.runners.ensure_covers(&graph)?;

        let ctx = RunContext::begin(1, &self.cancellation);
        let started = self.start_run(&ctx, RunMode::All, graph.nodes.len());

        for node in &graph.nodes {
            if self.state.status(&node.id) != Some(Status::Idle) {
                tracing::debug!("Node {} is not idle, leaving it out of run {}", node.id, ctx.run_id);
                continue;
            }
            if ctx.cancellation.is_cancelled() {
                if let Err(e) = self.state.finish_canceled(&node.id, "canceled: run stopped before start") {
                    tracing::warn!("Node {}: {}", node.id, e);
                }
                continue;
            }

            let runner = self.runners.resolve(node.kind)?;
            self.state.log(&node.id, "queued");
            self.state.set_cancel_requested(&node.id, false);
            let inputs = collect_inputs(&graph, &node.id, &self.state);
            let token = self.cancellation.token(&node.id);
            let (id, joined) = spawn_node(runner, node, inputs, self.state.clone(), token).await;
            finalize(&self.state, &id, joined, false);
        }

        let ids: Vec<NodeId> = graph.nodes.iter().map(|n| n.id.clone()).collect();
        Ok(self.finish_run(&ctx, RunMode::All, &graph, &ids, started))
    }

    /// Run the graph in dependency order with at most `concurrency` nodes
    /// executing at once (clamped to 1..=8).
    pub async fn run_dag(&self, concurrency: usize) -> Result<RunReport, EngineError> {
        let _guard = self.run_lock.try_lock().map_err(|_| EngineError::RunInProgress)?;
        let graph = self.graph();

        // validation errors surface before the run is announced
        graph.dependency_index()?;
        self.runners.ensure_covers(&graph)?;

        let ctx = RunContext::begin(concurrency, &self.cancellation);
        let started = self.start_run(&ctx, RunMode::Dag, graph.nodes.len());
        DagScheduler::new(&graph, &self.runners, &self.state, &self.cancellation)
            .execute(&ctx)
            .await?;

        let ids: Vec<NodeId> = graph.nodes.iter().map(|n| n.id.clone()).collect();
        Ok(self.finish_run(&ctx, RunMode::Dag, &graph, &ids, started))
    }

    /// `run_dag` with the configured default concurrency.
    pub async fn run(&self) -> Result<RunReport, EngineError> {
        self.run_dag(self.config.default_concurrency).await
    }

    /// Ask every node to stop: unstarted nodes never start, running ones stop
    /// before their next step.
    pub fn cancel_all(&self) {
        self.cancellation.cancel_all();
        for id in self.graph().nodes.iter().map(|n| &n.id) {
            if self.state.status(id).map_or(false, |s| !s.is_terminal()) {
                self.state.set_cancel_requested(id, true);
            }
        }
    }

    pub fn cancel_node(&self, id: &str) -> Result<(), EngineError> {
        let status = self
            .state
            .status(id)
            .ok_or_else(|| EngineError::NodeNotFound(id.to_string()))?;
        self.cancellation.cancel_node(id);
        if !status.is_terminal() {
            self.state.set_cancel_requested(id, true);
        }
        Ok(())
    }

    /// Reset failed and canceled nodes to `idle`. Does not start a run.
    pub fn retry_failed(&self) -> Result<Vec<NodeId>, EngineError> {
        let graph = self.graph();
        retry_failed(&graph, &self.state, &self.cancellation)
    }

    pub fn is_canceled(&self, id: &str) -> bool {
        self.cancellation.is_canceled(id)
    }

    pub fn node_state(&self, id: &str) -> Option<NodeState> {
        self.state.get(id)
    }

    pub fn snapshot(&self) -> HashMap<NodeId, NodeState> {
        self.state.snapshot()
    }

    pub fn state(&self) -> &Arc<ExecutionState> {
        &self.state
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    fn ensure_idle(&self, id: &str) -> Result<(), EngineError> {
        match self.state.status(id) {
            Some(Status::Idle) => Ok(()),
            Some(from) => Err(TransitionError::Illegal {
                node_id: id.to_string(),
                from,
                to: Status::Running,
            }
            .into()),
            None => Err(EngineError::NodeNotFound(id.to_string())),
        }
    }

    fn start_run(&self, ctx: &RunContext, mode: RunMode, nodes: usize) -> Instant {
        tracing::info!("Starting {} run {}", mode, ctx.run_id);
        self.event_bus.emit(ExecutionEvent::RunStarted {
            run_id: ctx.run_id,
            mode: mode.to_string(),
            nodes,
            timestamp: ctx.started_at,
        });
        Instant::now()
    }

    fn finish_run(&self, ctx: &RunContext, mode: RunMode, graph: &Graph, ids: &[NodeId], started: Instant) -> RunReport {
        let statuses: HashMap<NodeId, Status> = ids
            .iter()
            .filter(|id| graph.find_node(id).is_some())
            .filter_map(|id| self.state.status(id).map(|s| (id.clone(), s)))
            .collect();
        let report = RunReport {
            run_id: ctx.run_id,
            mode,
            statuses,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        tracing::info!(
            "Run {} finished in {}ms: {} succeeded, {} failed, {} canceled",
            ctx.run_id,
            report.duration_ms,
            report.succeeded(),
            report.failed(),
            report.canceled()
        );
        self.event_bus.emit(ExecutionEvent::RunCompleted {
            run_id: ctx.run_id,
            succeeded: report.succeeded(),
            failed: report.failed(),
            canceled: report.canceled(),
            duration_ms: report.duration_ms,
            timestamp: Utc::now(),
        });
        report
    }
}
