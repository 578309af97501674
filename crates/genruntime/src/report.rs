use gencore::{NodeId, RunId, Status};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Which invocation produced a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// One node, dependencies ignored
    Selected,
    /// Every node in graph order, edges ignored
    All,
    Dag,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunMode::Selected => "selected",
            RunMode::All => "all",
            RunMode::Dag => "dag",
        };
        f.write_str(label)
    }
}

/// Node statuses at the end of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub mode: RunMode,
    pub statuses: HashMap<NodeId, Status>,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn status(&self, id: &str) -> Option<Status> {
        self.statuses.get(id).copied()
    }

    pub fn count(&self, status: Status) -> usize {
        self.statuses.values().filter(|s| **s == status).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(Status::Success)
    }

    pub fn failed(&self) -> usize {
        self.count(Status::Error)
    }

    pub fn canceled(&self) -> usize {
        self.count(Status::Canceled)
    }

    /// True when every node ended in a terminal status.
    pub fn is_settled(&self) -> bool {
        self.statuses.values().all(Status::is_terminal)
    }
}
