use crate::{ExecutionState, NodeError, NodeId, NodeSpec, RunOutcome, Value};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Executes one node's unit of work.
///
/// Implementations must follow the node lifecycle through [`NodeReporter`]:
/// enter `running` before any work, log each major step, stop issuing work
/// once the cancellation token fires, and always end in a terminal status
/// (or return [`RunOutcome::Skipped`] without touching the node when its
/// configuration makes the work impossible).
#[async_trait]
pub trait Runner: Send + Sync {
    /// Identifier such as "image.generate"
    fn name(&self) -> &str;

    async fn execute(&self, ctx: NodeContext) -> RunOutcome;

    fn metadata(&self) -> RunnerMetadata {
        RunnerMetadata::default()
    }
}

/// Everything a runner gets for one execution.
#[derive(Clone)]
pub struct NodeContext {
    pub node: NodeSpec,

    /// Values delivered by upstream nodes, keyed by target port
    pub inputs: HashMap<String, Value>,

    /// Cooperative cancellation for this node
    pub cancellation: CancellationToken,

    pub reporter: NodeReporter,
}

impl NodeContext {
    pub fn new(node: NodeSpec, state: Arc<ExecutionState>, cancellation: CancellationToken) -> Self {
        let reporter = NodeReporter::new(node.id.clone(), state, cancellation.clone());
        Self {
            node,
            inputs: HashMap::new(),
            cancellation,
            reporter,
        }
    }

    pub fn with_inputs(mut self, inputs: HashMap<String, Value>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn require_input(&self, name: &str) -> Result<&Value, NodeError> {
        self.inputs
            .get(name)
            .ok_or_else(|| NodeError::MissingInput(name.to_string()))
    }

    pub fn require_config(&self, name: &str) -> Result<&Value, NodeError> {
        self.node
            .config
            .get(name)
            .ok_or_else(|| NodeError::Configuration(format!("Missing config: {}", name)))
    }

    pub fn get_config_or(&self, name: &str, default: Value) -> Value {
        self.node.config.get(name).cloned().unwrap_or(default)
    }
}

/// Write access to a single node's entry in the execution state.
#[derive(Clone)]
pub struct NodeReporter {
    node_id: NodeId,
    state: Arc<ExecutionState>,
    cancellation: CancellationToken,
}

impl NodeReporter {
    pub fn new(node_id: NodeId, state: Arc<ExecutionState>, cancellation: CancellationToken) -> Self {
        Self {
            node_id,
            state,
            cancellation,
        }
    }

    /// Enter `running` with progress 0. Returns false when the node was
    /// canceled before it could start.
    pub fn start(&self) -> bool {
        match self.state.begin_running(&self.node_id, &self.cancellation) {
            Ok(started) => started,
            Err(e) => {
                tracing::warn!("Node {} could not start: {}", self.node_id, e);
                false
            }
        }
    }

    pub fn log(&self, message: impl AsRef<str>) {
        self.state.log(&self.node_id, message);
    }

    pub fn progress(&self, percent: u8) {
        self.state.set_progress(&self.node_id, percent);
    }

    /// Keep a completed sample.
    pub fn sample(&self, value: Value) {
        self.state.push_result(&self.node_id, value);
    }

    pub fn succeed(&self, output: NodeOutput) -> RunOutcome {
        self.log("completed");
        match self.state.finish_success(&self.node_id, output) {
            Ok(_) => RunOutcome::Success,
            Err(e) => {
                tracing::warn!("Node {} could not complete: {}", self.node_id, e);
                RunOutcome::Error
            }
        }
    }

    pub fn fail(&self, error: impl fmt::Display) -> RunOutcome {
        if let Err(e) = self.state.finish_error(&self.node_id, error.to_string()) {
            tracing::warn!("Node {} could not record failure: {}", self.node_id, e);
        }
        RunOutcome::Error
    }

    pub fn canceled(&self, reason: impl AsRef<str>) -> RunOutcome {
        if let Err(e) = self.state.finish_canceled(&self.node_id, reason) {
            tracing::warn!("Node {} could not record cancellation: {}", self.node_id, e);
        }
        RunOutcome::Canceled
    }
}

/// Result published by a successful node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOutput {
    /// Output port values
    pub outputs: HashMap<String, Value>,

    pub metadata: NodeMetadata,
}

impl NodeOutput {
    pub fn new() -> Self {
        Self {
            outputs: HashMap::new(),
            metadata: NodeMetadata::default(),
        }
    }

    pub fn with_output(mut self, port: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(port.into(), value.into());
        self
    }

    pub fn output(&self, port: &str) -> Option<&Value> {
        self.outputs.get(port)
    }
}

impl Default for NodeOutput {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub execution_time_ms: u64,
    pub samples_requested: u32,
    pub samples_completed: u32,
    /// Samples that failed in a batch that still succeeded overall
    #[serde(default)]
    pub samples_failed: u32,
}

/// Descriptive data about a runner, used by `genflow kinds`.
#[derive(Debug, Clone)]
pub struct RunnerMetadata {
    pub description: String,
    pub category: String,
    pub inputs: Vec<PortDefinition>,
    pub outputs: Vec<PortDefinition>,
}

impl Default for RunnerMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PortDefinition {
    pub name: String,
    pub description: String,
    pub required: bool,
}

impl PortDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required,
        }
    }
}
