//! Core abstractions for the generation engine
//!
//! Graph model, node status machine, execution state store, cancellation
//! registry and the runner contract. Scheduling lives in `genruntime`.

mod cancel;
mod error;
pub mod events;
mod graph;
mod node;
pub mod sampling;
mod state;
mod status;
mod value;

pub use cancel::CancellationRegistry;
pub use error::{EngineError, GraphError, NodeError, TransitionError};
pub use events::*;
pub use graph::{build_dependency_index, DependencyIndex, Edge, Graph, NodeId, NodeKind, NodeSpec, MAX_SAMPLES};
pub use node::{
    NodeContext, NodeMetadata, NodeOutput, NodeReporter, PortDefinition, Runner, RunnerMetadata,
};
pub use state::{ExecutionState, NodeState};
pub use status::{RunOutcome, Status};
pub use tokio_util::sync::CancellationToken;
pub use value::Value;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
