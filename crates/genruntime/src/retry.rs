use gencore::{CancellationRegistry, EngineError, ExecutionState, Graph, NodeId};

/// Return every `error`/`canceled` node of `graph` to `idle`.
///
/// Logs, error, progress and results are cleared along with any pending
/// cancellation, so the next run treats the node as if it had never run.
/// Nodes in any other status are left alone, which makes repeated calls
/// harmless. No run is started.
pub fn retry_failed(
    graph: &Graph,
    state: &ExecutionState,
    cancellation: &CancellationRegistry,
) -> Result<Vec<NodeId>, EngineError> {
    let mut reset = Vec::new();

    for node in &graph.nodes {
        if state.reset_for_retry(&node.id)? {
            cancellation.reset_node(&node.id);
            reset.push(node.id.clone());
        }
    }

    if !reset.is_empty() {
        tracing::info!("Reset {} node(s) for retry", reset.len());
    }
    Ok(reset)
}
