use crate::{NodeId, Status};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("State error: {0}")]
    Transition(#[from] TransitionError),

    #[error("No runner registered for node kind: {0}")]
    UnknownKind(String),

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("A run is already in progress")]
    RunInProgress,

    #[error("Execution error: {0}")]
    Execution(String),
}

/// Errors raised by a runner while producing a node's output.
///
/// These never leave the runner as `Err`: the runner records them on the
/// node as `last_error` and resolves it to `error`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timeout after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Cancelled")]
    Cancelled,
}

/// Malformed graph input, detected before any scheduling happens.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Edge {edge_id} is a self-loop on node {node_id}")]
    SelfLoop { edge_id: String, node_id: NodeId },

    #[error("Edge {edge_id} references unknown node {node_id}")]
    DanglingEdge { edge_id: String, node_id: NodeId },

    #[error("Duplicate node id: {0}")]
    DuplicateNode(NodeId),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("Illegal transition for node {node_id}: {from} -> {to}")]
    Illegal {
        node_id: NodeId,
        from: Status,
        to: Status,
    },
}
