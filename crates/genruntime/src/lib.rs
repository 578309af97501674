//! Graph execution runtime
//!
//! The DAG scheduler, the runner registry, the retry coordinator and the
//! [`GenEngine`] facade that ties them to a graph snapshot.

mod config;
mod engine;
mod registry;
mod report;
mod retry;
mod scheduler;

pub use config::{ConfigError, RuntimeConfig};
pub use engine::GenEngine;
pub use registry::RunnerRegistry;
pub use report::{RunMode, RunReport};
pub use retry::retry_failed;
pub use scheduler::{clamp_concurrency, DagScheduler, RunContext, BLOCKED_REASON, CYCLE_REASON, MAX_CONCURRENCY};
