use crate::{EventBus, ExecutionEvent, Graph, NodeId, NodeOutput, Status, TransitionError, Value};
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Live execution data for one node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    pub status: Status,
    /// 0..=100
    pub progress: u8,
    pub logs: Vec<String>,
    pub last_result: Option<NodeOutput>,
    pub last_error: Option<String>,
    /// Completed samples, kept even when the node later fails or is canceled.
    pub results: Vec<Value>,
    pub cancel_requested: bool,
}

/// Per-node execution state, keyed by node id.
///
/// Every mutation is a single-node patch; there are no multi-node
/// transactions. Status changes are validated against
/// [`Status::can_transition_to`] and published on the event bus.
pub struct ExecutionState {
    nodes: RwLock<HashMap<NodeId, NodeState>>,
    events: EventBus,
}

impl ExecutionState {
    pub fn new(events: EventBus) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Create idle entries for new nodes and drop entries for removed ones.
    pub fn sync_with(&self, graph: &Graph) {
        let mut nodes = self.nodes.write();
        nodes.retain(|id, _| graph.find_node(id).is_some());
        for node in &graph.nodes {
            nodes.entry(node.id.clone()).or_default();
        }
    }

    pub fn get(&self, id: &str) -> Option<NodeState> {
        self.nodes.read().get(id).cloned()
    }

    pub fn status(&self, id: &str) -> Option<Status> {
        self.nodes.read().get(id).map(|n| n.status)
    }

    pub fn snapshot(&self) -> HashMap<NodeId, NodeState> {
        self.nodes.read().clone()
    }

    /// Count of nodes currently in `status`.
    pub fn count(&self, status: Status) -> usize {
        self.nodes.read().values().filter(|n| n.status == status).count()
    }

    /// Move `id` to `to`, returning the previous status.
    pub fn transition(&self, id: &str, to: Status) -> Result<Status, TransitionError> {
        self.apply(id, to, |_| {})
    }

    /// Enter `running` unless cancellation was already requested.
    ///
    /// The token is checked under the store lock so that a node can never
    /// start after `cancel` has fired. Returns `Ok(false)` when the node was
    /// resolved to `canceled` instead.
    pub fn begin_running(&self, id: &str, cancel: &CancellationToken) -> Result<bool, TransitionError> {
        let (from, to) = {
            let mut nodes = self.nodes.write();
            let node = nodes
                .get_mut(id)
                .ok_or_else(|| TransitionError::UnknownNode(id.to_string()))?;
            let to = if cancel.is_cancelled() {
                Status::Canceled
            } else {
                Status::Running
            };
            if !node.status.can_transition_to(to) {
                return Err(TransitionError::Illegal {
                    node_id: id.to_string(),
                    from: node.status,
                    to,
                });
            }
            let from = node.status;
            node.status = to;
            if to == Status::Running {
                node.progress = 0;
                node.last_error = None;
                node.cancel_requested = false;
            } else {
                node.cancel_requested = true;
            }
            (from, to)
        };

        self.publish_status(id, from, to);
        if to == Status::Canceled {
            self.log(id, "canceled before start");
        }
        Ok(to == Status::Running)
    }

    /// Append a timestamped log line.
    pub fn log(&self, id: &str, message: impl AsRef<str>) {
        let line = format!("[{}] {}", Utc::now().format("%H:%M:%S%.3f"), message.as_ref());
        if let Some(node) = self.nodes.write().get_mut(id) {
            node.logs.push(line.clone());
        } else {
            return;
        }
        self.events.emit(ExecutionEvent::NodeLog {
            node_id: id.to_string(),
            line,
            timestamp: Utc::now(),
        });
    }

    pub fn set_progress(&self, id: &str, percent: u8) {
        let percent = percent.min(100);
        if let Some(node) = self.nodes.write().get_mut(id) {
            node.progress = percent;
        } else {
            return;
        }
        self.events.emit(ExecutionEvent::NodeProgress {
            node_id: id.to_string(),
            percent,
            timestamp: Utc::now(),
        });
    }

    /// Append one completed sample to the node's results.
    pub fn push_result(&self, id: &str, value: Value) {
        if let Some(node) = self.nodes.write().get_mut(id) {
            node.results.push(value.clone());
        } else {
            return;
        }
        self.events.emit(ExecutionEvent::NodeSample {
            node_id: id.to_string(),
            value,
            timestamp: Utc::now(),
        });
    }

    pub fn set_cancel_requested(&self, id: &str, requested: bool) {
        if let Some(node) = self.nodes.write().get_mut(id) {
            node.cancel_requested = requested;
        }
    }

    pub fn finish_success(&self, id: &str, output: NodeOutput) -> Result<Status, TransitionError> {
        self.apply(id, Status::Success, move |node| {
            node.progress = 100;
            node.last_result = Some(output);
            node.last_error = None;
        })
    }

    /// Resolve to `error` with a human-readable reason.
    pub fn finish_error(&self, id: &str, reason: impl Into<String>) -> Result<Status, TransitionError> {
        let reason = reason.into();
        let from = self.apply(id, Status::Error, |node| {
            node.last_error = Some(reason.clone());
        })?;
        self.log(id, format!("error: {}", reason));
        Ok(from)
    }

    pub fn finish_canceled(&self, id: &str, reason: impl AsRef<str>) -> Result<Status, TransitionError> {
        let from = self.apply(id, Status::Canceled, |node| {
            node.cancel_requested = true;
        })?;
        self.log(id, reason);
        Ok(from)
    }

    /// Return a failed or canceled node to `idle` with a clean slate.
    ///
    /// Returns `Ok(false)` without touching anything when the node is in any
    /// other status.
    pub fn reset_for_retry(&self, id: &str) -> Result<bool, TransitionError> {
        match self.status(id) {
            None => Err(TransitionError::UnknownNode(id.to_string())),
            Some(status) if !status.is_failed() => Ok(false),
            Some(_) => {
                self.apply(id, Status::Idle, |node| {
                    *node = NodeState::default();
                })?;
                Ok(true)
            }
        }
    }

    fn apply(
        &self,
        id: &str,
        to: Status,
        patch: impl FnOnce(&mut NodeState),
    ) -> Result<Status, TransitionError> {
        let from = {
            let mut nodes = self.nodes.write();
            let node = nodes
                .get_mut(id)
                .ok_or_else(|| TransitionError::UnknownNode(id.to_string()))?;
            if !node.status.can_transition_to(to) {
                return Err(TransitionError::Illegal {
                    node_id: id.to_string(),
                    from: node.status,
                    to,
                });
            }
            let from = node.status;
            patch(node);
            node.status = to;
            from
        };

        self.publish_status(id, from, to);
        Ok(from)
    }

    fn publish_status(&self, id: &str, from: Status, to: Status) {
        tracing::debug!("Node {}: {} -> {}", id, from, to);
        self.events.emit(ExecutionEvent::NodeStatus {
            node_id: id.to_string(),
            from,
            to,
            timestamp: Utc::now(),
        });
    }
}

impl Default for ExecutionState {
    fn default() -> Self {
        Self::new(EventBus::default())
    }
}
