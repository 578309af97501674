// Shared helpers for runtime integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use gencore::sampling::{run_samples, FanOut};
use gencore::{Graph, NodeContext, NodeError, NodeKind, NodeSpec, RunOutcome, Runner, Value};
use genruntime::{GenEngine, RunnerRegistry};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Records what the scripted runner observed.
#[derive(Default)]
pub struct Probe {
    active: AtomicUsize,
    max_active: AtomicUsize,
    timeline: Mutex<Vec<String>>,
    attempts: Mutex<HashMap<String, u64>>,
    inputs: Mutex<HashMap<String, HashMap<String, Value>>>,
}

impl Probe {
    fn enter(&self, id: &str, inputs: &HashMap<String, Value>) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.timeline.lock().push(format!("start:{}", id));
        self.inputs.lock().insert(id.to_string(), inputs.clone());
    }

    fn exit(&self, id: &str) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.timeline.lock().push(format!("end:{}", id));
    }

    fn next_attempt(&self, id: &str) -> u64 {
        let mut attempts = self.attempts.lock();
        let attempt = attempts.entry(id.to_string()).or_insert(0);
        *attempt += 1;
        *attempt
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn started(&self, id: &str) -> bool {
        self.position(&format!("start:{}", id)).is_some()
    }

    pub fn starts(&self) -> usize {
        self.timeline.lock().iter().filter(|e| e.starts_with("start:")).count()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.timeline.lock().iter().position(|e| e == entry)
    }

    pub fn inputs_of(&self, id: &str) -> HashMap<String, Value> {
        self.inputs.lock().get(id).cloned().unwrap_or_default()
    }
}

/// Runner driven by node config:
/// `delay_ms` per sample, `fail` always fails, `fail_times` fails the first
/// n attempts, `panic` panics.
pub struct ScriptedRunner {
    probe: Arc<Probe>,
}

#[async_trait]
impl Runner for ScriptedRunner {
    fn name(&self) -> &str {
        "test.scripted"
    }

    async fn execute(&self, ctx: NodeContext) -> RunOutcome {
        let id = ctx.node_id().to_string();
        self.probe.enter(&id, &ctx.inputs);

        let flag = |key: &str| ctx.node.config.get(key).and_then(|v| v.as_bool()).unwrap_or(false);
        let number = |key: &str, default: u64| ctx.node.config.get(key).and_then(|v| v.as_u64()).unwrap_or(default);

        if flag("panic") {
            panic!("scripted panic in {}", id);
        }

        let attempt = self.probe.next_attempt(&id);
        let fail = flag("fail") || attempt <= number("fail_times", 0);
        let delay = Duration::from_millis(number("delay_ms", 10));

        let outcome = run_samples(&ctx, FanOut::Sequential, |index| {
            let id = id.clone();
            async move {
                tokio::time::sleep(delay).await;
                if fail {
                    Err(NodeError::ExecutionFailed("scripted failure".to_string()))
                } else {
                    Ok(Value::from(format!("{}-{}", id, index)))
                }
            }
        })
        .await;

        self.probe.exit(&id);
        outcome
    }
}

pub fn node(id: &str) -> NodeSpec {
    NodeSpec::with_id(id, NodeKind::Text).with_prompt(format!("prompt for {}", id))
}

pub fn link(graph: &mut Graph, source: &str, target: &str) {
    graph.connect(source, "output", target, "upstream");
}

pub fn engine_with(graph: Graph) -> (Arc<GenEngine>, Arc<Probe>) {
    let probe = Arc::new(Probe::default());
    let mut registry = RunnerRegistry::new();
    for kind in NodeKind::ALL {
        registry.register(
            kind,
            Arc::new(ScriptedRunner {
                probe: probe.clone(),
            }),
        );
    }
    let engine = GenEngine::new(registry);
    engine.load_graph(graph).expect("graph should load");
    (Arc::new(engine), probe)
}
