//! Sample fan-out shared by generation runners.
//!
//! A node asks for `sample_count` independent generations. Backends that can
//! take concurrent requests settle every sample and collect failures one by
//! one; rate-limited backends go one sample at a time and re-check the
//! cancellation token before each. Either way, completed samples are kept on
//! the node even when the batch ends in `error` or `canceled`.

use crate::{NodeContext, NodeError, NodeOutput, RunOutcome, Value};
use futures::future::join_all;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanOut {
    /// All samples in flight at once; one failure does not abort the others.
    Parallel,
    /// One sample at a time, cancellation checked in between.
    Sequential,
}

impl FanOut {
    pub fn as_str(&self) -> &'static str {
        match self {
            FanOut::Parallel => "parallel",
            FanOut::Sequential => "sequential",
        }
    }
}

/// Drive a node through its lifecycle, producing one value per sample with
/// `generate(index)`.
///
/// Returns [`RunOutcome::Skipped`] without touching the node when the prompt
/// is empty.
pub async fn run_samples<F, Fut>(ctx: &NodeContext, policy: FanOut, generate: F) -> RunOutcome
where
    F: Fn(u32) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, NodeError>> + Send,
{
    let reporter = &ctx.reporter;

    if ctx.node.prompt().is_empty() {
        let reason = "skipped: prompt is empty".to_string();
        reporter.log(&reason);
        tracing::info!("Node {} {}", ctx.node_id(), reason);
        return RunOutcome::Skipped { reason };
    }

    if !reporter.start() {
        return RunOutcome::Canceled;
    }

    let total = ctx.node.sample_count();
    let timeout_ms = ctx.node.timeout_ms();
    let started = Instant::now();
    reporter.log(format!("started {} {} sample(s)", total, policy.as_str()));

    let outcome = match policy {
        FanOut::Sequential => sequential(ctx, total, timeout_ms, &generate).await,
        FanOut::Parallel => parallel(ctx, total, timeout_ms, &generate).await,
    };

    match outcome {
        Batch::Done { samples, failed } => {
            let completed = samples.len() as u32;
            let mut output = NodeOutput::new().with_output("samples", Value::Array(samples.clone()));
            if let Some(first) = samples.into_iter().next() {
                output = output.with_output("output", first);
            }
            output.metadata.execution_time_ms = started.elapsed().as_millis() as u64;
            output.metadata.samples_requested = total;
            output.metadata.samples_completed = completed;
            output.metadata.samples_failed = failed;
            if failed > 0 {
                reporter.log(format!("completed with {} of {} sample(s) failed", failed, total));
            }
            reporter.succeed(output)
        }
        Batch::Failed(reason) => reporter.fail(reason),
        Batch::Canceled { completed } => {
            reporter.canceled(format!("canceled after {} of {} sample(s)", completed, total))
        }
    }
}

enum Batch {
    Done { samples: Vec<Value>, failed: u32 },
    Failed(String),
    Canceled { completed: u32 },
}

async fn sequential<F, Fut>(ctx: &NodeContext, total: u32, timeout_ms: Option<u64>, generate: &F) -> Batch
where
    F: Fn(u32) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, NodeError>> + Send,
{
    let reporter = &ctx.reporter;
    let mut samples = Vec::with_capacity(total as usize);

    for index in 0..total {
        if ctx.is_cancelled() {
            return Batch::Canceled {
                completed: samples.len() as u32,
            };
        }
        reporter.log(format!("sample {}/{} requested", index + 1, total));

        match with_timeout(timeout_ms, generate(index)).await {
            Ok(value) => {
                reporter.sample(value.clone());
                samples.push(value);
                reporter.progress(percent(samples.len() as u32, total));
            }
            Err(e) => {
                return Batch::Failed(format!("sample {}/{} failed: {}", index + 1, total, e));
            }
        }
    }

    Batch::Done { samples, failed: 0 }
}

async fn parallel<F, Fut>(ctx: &NodeContext, total: u32, timeout_ms: Option<u64>, generate: &F) -> Batch
where
    F: Fn(u32) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, NodeError>> + Send,
{
    let reporter = &ctx.reporter;
    if ctx.is_cancelled() {
        return Batch::Canceled { completed: 0 };
    }

    let completed = AtomicU32::new(0);
    let settled = join_all((0..total).map(|index| {
        let completed = &completed;
        async move {
            let result = with_timeout(timeout_ms, generate(index)).await;
            if let Ok(value) = &result {
                reporter.sample(value.clone());
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                reporter.progress(percent(done, total));
            }
            result
        }
    }))
    .await;

    let mut samples = Vec::new();
    let mut errors = Vec::new();
    for (index, result) in settled.into_iter().enumerate() {
        match result {
            Ok(value) => samples.push(value),
            Err(e) => {
                reporter.log(format!("sample {}/{} failed: {}", index + 1, total, e));
                errors.push(e.to_string());
            }
        }
    }

    if ctx.is_cancelled() {
        Batch::Canceled {
            completed: samples.len() as u32,
        }
    } else if samples.is_empty() {
        Batch::Failed(format!("all {} sample(s) failed: {}", total, errors.join("; ")))
    } else {
        Batch::Done {
            samples,
            failed: errors.len() as u32,
        }
    }
}

async fn with_timeout<Fut>(timeout_ms: Option<u64>, work: Fut) -> Result<Value, NodeError>
where
    Fut: Future<Output = Result<Value, NodeError>>,
{
    match timeout_ms {
        Some(millis) => tokio::time::timeout(Duration::from_millis(millis), work)
            .await
            .unwrap_or(Err(NodeError::Timeout { millis })),
        None => work.await,
    }
}

fn percent(done: u32, total: u32) -> u8 {
    ((done * 100) / total.max(1)).min(100) as u8
}
