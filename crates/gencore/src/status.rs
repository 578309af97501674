use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a node within the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Idle,
    Queued,
    Running,
    Success,
    Error,
    Canceled,
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Success | Status::Error | Status::Canceled)
    }

    /// Terminal and not successful.
    pub fn is_failed(&self) -> bool {
        matches!(self, Status::Error | Status::Canceled)
    }

    /// Whether `self -> to` is a legal transition.
    ///
    /// Besides the main `idle -> queued -> running -> terminal` path, nodes that
    /// never start may be resolved directly to `error` (blocked or cyclic) or
    /// `canceled`, and `error`/`canceled` return to `idle` on retry.
    pub fn can_transition_to(&self, to: Status) -> bool {
        use Status::*;
        matches!(
            (self, to),
            (Idle, Queued)
                | (Idle | Queued, Running)
                | (Idle | Queued, Error | Canceled)
                | (Running, Success | Error | Canceled)
                | (Error | Canceled, Idle)
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Status::Idle => "idle",
            Status::Queued => "queued",
            Status::Running => "running",
            Status::Success => "success",
            Status::Error => "error",
            Status::Canceled => "canceled",
        };
        f.write_str(label)
    }
}

/// Final status reported by a runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    Error,
    Canceled,
    /// Precondition not met; the node was left untouched.
    Skipped { reason: String },
}

impl RunOutcome {
    pub fn status(&self) -> Option<Status> {
        match self {
            RunOutcome::Success => Some(Status::Success),
            RunOutcome::Error => Some(Status::Error),
            RunOutcome::Canceled => Some(Status::Canceled),
            RunOutcome::Skipped { .. } => None,
        }
    }
}
