use crate::{NodeId, Status, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

pub type RunId = Uuid;

/// Events emitted while the engine drives nodes.
///
/// Node-level events come from the execution state store, so every status,
/// log or progress change is observable regardless of which run caused it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    RunStarted {
        run_id: RunId,
        mode: String,
        nodes: usize,
        timestamp: DateTime<Utc>,
    },
    RunCompleted {
        run_id: RunId,
        succeeded: usize,
        failed: usize,
        canceled: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeStatus {
        node_id: NodeId,
        from: Status,
        to: Status,
        timestamp: DateTime<Utc>,
    },
    NodeLog {
        node_id: NodeId,
        line: String,
        timestamp: DateTime<Utc>,
    },
    NodeProgress {
        node_id: NodeId,
        percent: u8,
        timestamp: DateTime<Utc>,
    },
    NodeSample {
        node_id: NodeId,
        value: Value,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast channel for execution events
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    /// Send to current subscribers; dropped silently when nobody listens.
    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
