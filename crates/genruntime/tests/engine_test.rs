mod common;

use common::{engine_with, link, node};
use gencore::{EngineError, ExecutionEvent, Graph, GraphError, NodeKind, NodeSpec, Status};
use genruntime::{GenEngine, RunMode, RunnerRegistry, RuntimeConfig};
use std::time::Duration;

#[tokio::test]
async fn test_retry_resets_failed_and_blocked_nodes() {
    let mut graph = Graph::new();
    graph.add_node(node("a").with_config("fail_times", 1i64));
    graph.add_node(node("b"));
    graph.add_node(node("c"));
    link(&mut graph, "a", "b");
    let (engine, probe) = engine_with(graph);

    let first = engine.run_dag(2).await.unwrap();
    assert_eq!(first.status("a"), Some(Status::Error));
    assert_eq!(first.status("b"), Some(Status::Error));
    assert_eq!(first.status("c"), Some(Status::Success));

    let mut reset = engine.retry_failed().unwrap();
    reset.sort();
    assert_eq!(reset, vec!["a".to_string(), "b".to_string()]);

    let a = engine.node_state("a").unwrap();
    assert_eq!(a.status, Status::Idle);
    assert!(a.logs.is_empty());
    assert!(a.last_error.is_none());
    assert_eq!(a.progress, 0);
    // success is not a retry target
    assert_eq!(engine.node_state("c").unwrap().status, Status::Success);

    // retry does not start anything by itself
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(probe.starts(), 2);

    let second = engine.run_dag(2).await.unwrap();
    assert_eq!(second.succeeded(), 3);
    assert_eq!(probe.starts(), 4);
}

#[tokio::test]
async fn test_retry_is_idempotent() {
    let mut graph = Graph::new();
    graph.add_node(node("a").with_config("fail", true));
    graph.add_node(node("idle"));
    let (engine, _probe) = engine_with(graph);

    engine.run_selected("a").await.unwrap();
    assert_eq!(engine.node_state("a").unwrap().status, Status::Error);

    assert_eq!(engine.retry_failed().unwrap(), vec!["a".to_string()]);
    let once = engine.snapshot();
    assert!(engine.retry_failed().unwrap().is_empty());
    assert_eq!(engine.snapshot(), once);
    assert_eq!(once["idle"].status, Status::Idle);
}

#[tokio::test]
async fn test_retry_after_cancel_clears_cancellation() {
    let mut graph = Graph::new();
    graph.add_node(node("a").with_config("delay_ms", 80i64));
    let (engine, _probe) = engine_with(graph);

    let runner = engine.clone();
    let run = tokio::spawn(async move { runner.run_dag(1).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    engine.cancel_all();
    run.await.unwrap().unwrap();
    assert_eq!(engine.node_state("a").unwrap().status, Status::Canceled);

    engine.retry_failed().unwrap();
    let a = engine.node_state("a").unwrap();
    assert!(!a.cancel_requested);
    assert!(a.results.is_empty());

    let report = engine.run_dag(1).await.unwrap();
    assert_eq!(report.status("a"), Some(Status::Success));
}

#[tokio::test]
async fn test_run_all_ignores_edges() {
    let mut graph = Graph::new();
    graph.add_node(node("a").with_config("fail", true));
    graph.add_node(node("b"));
    link(&mut graph, "a", "b");
    let (engine, probe) = engine_with(graph);

    let report = engine.run_all().await.unwrap();

    assert_eq!(report.mode, RunMode::All);
    assert_eq!(report.status("a"), Some(Status::Error));
    assert_eq!(report.status("b"), Some(Status::Success));
    assert!(probe.started("b"));
    assert_eq!(probe.max_active(), 1);
}

#[tokio::test]
async fn test_run_all_after_cancel_all_starts_nothing_new() {
    let mut graph = Graph::new();
    graph.add_node(node("a").with_config("delay_ms", 80i64));
    graph.add_node(node("b"));
    let (engine, probe) = engine_with(graph);

    let runner = engine.clone();
    let run = tokio::spawn(async move { runner.run_all().await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    engine.cancel_all();
    let report = run.await.unwrap().unwrap();

    assert_eq!(report.status("a"), Some(Status::Success));
    assert_eq!(report.status("b"), Some(Status::Canceled));
    assert!(!probe.started("b"));
}

#[tokio::test]
async fn test_run_selected_runs_one_node() {
    let mut graph = Graph::new();
    graph.add_node(node("a"));
    graph.add_node(node("b"));
    link(&mut graph, "a", "b");
    let (engine, probe) = engine_with(graph);

    let report = engine.run_selected("b").await.unwrap();

    assert_eq!(report.mode, RunMode::Selected);
    assert_eq!(report.status("b"), Some(Status::Success));
    assert_eq!(engine.node_state("a").unwrap().status, Status::Idle);
    assert!(!probe.started("a"));
    assert!(probe.inputs_of("b").is_empty());
}

#[tokio::test]
async fn test_run_selected_skip_leaves_node_idle() {
    let mut graph = Graph::new();
    graph.add_node(node("a").with_prompt(""));
    let (engine, _probe) = engine_with(graph);

    engine.run_selected("a").await.unwrap();

    let a = engine.node_state("a").unwrap();
    assert_eq!(a.status, Status::Idle);
    assert!(a.logs.iter().any(|l| l.contains("skipped")));
}

#[tokio::test]
async fn test_run_selected_rejects_finished_node() {
    let mut graph = Graph::new();
    graph.add_node(node("a"));
    let (engine, _probe) = engine_with(graph);

    engine.run_selected("a").await.unwrap();
    let err = engine.run_selected("a").await.unwrap_err();
    assert!(matches!(err, EngineError::Transition(_)));

    let err = engine.run_selected("missing").await.unwrap_err();
    assert!(matches!(err, EngineError::NodeNotFound(id) if id == "missing"));
}

#[tokio::test]
async fn test_only_one_run_at_a_time() {
    let mut graph = Graph::new();
    graph.add_node(node("a").with_config("delay_ms", 80i64));
    let (engine, _probe) = engine_with(graph);

    let runner = engine.clone();
    let run = tokio::spawn(async move { runner.run_dag(1).await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(matches!(engine.run_all().await, Err(EngineError::RunInProgress)));
    assert!(matches!(engine.load_graph(Graph::new()), Err(EngineError::RunInProgress)));

    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_self_loop_rejected_before_scheduling() {
    let (engine, probe) = engine_with(Graph::new());
    let mut graph = Graph::new();
    graph.add_node(node("a"));
    link(&mut graph, "a", "a");

    let err = engine.load_graph(graph).unwrap_err();
    assert!(matches!(err, EngineError::Graph(GraphError::SelfLoop { .. })));
    assert!(engine.node_state("a").is_none());
    assert_eq!(probe.starts(), 0);
}

#[tokio::test]
async fn test_dangling_edge_rejected() {
    let (engine, _probe) = engine_with(Graph::new());
    let mut graph = Graph::new();
    graph.add_node(node("a"));
    link(&mut graph, "a", "ghost");

    let err = engine.load_graph(graph).unwrap_err();
    assert!(matches!(err, EngineError::Graph(GraphError::DanglingEdge { .. })));
}

#[tokio::test]
async fn test_unknown_kind_rejected() {
    let engine = GenEngine::with_config(RunnerRegistry::new(), RuntimeConfig::default());
    let mut graph = Graph::new();
    graph.add_node(NodeSpec::with_id("v", NodeKind::Video).with_prompt("waves"));

    let err = engine.load_graph(graph).unwrap_err();
    assert!(matches!(err, EngineError::UnknownKind(kind) if kind == "video"));
}

#[tokio::test]
async fn test_reload_keeps_surviving_state() {
    let mut graph = Graph::new();
    graph.add_node(node("a"));
    graph.add_node(node("b"));
    let (engine, _probe) = engine_with(graph);
    engine.run_selected("a").await.unwrap();

    let mut next = Graph::new();
    next.add_node(node("a"));
    next.add_node(node("c"));
    engine.load_graph(next).unwrap();

    assert_eq!(engine.node_state("a").unwrap().status, Status::Success);
    assert!(engine.node_state("b").is_none());
    assert_eq!(engine.node_state("c").unwrap().status, Status::Idle);
}

#[tokio::test]
async fn test_run_emits_lifecycle_events() {
    let mut graph = Graph::new();
    graph.add_node(node("a"));
    let (engine, _probe) = engine_with(graph);
    let mut events = engine.subscribe_events();

    engine.run_dag(1).await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(matches!(seen.first(), Some(ExecutionEvent::RunStarted { mode, .. }) if mode == "dag"));
    assert!(matches!(seen.last(), Some(ExecutionEvent::RunCompleted { succeeded: 1, .. })));
    assert!(seen
        .iter()
        .any(|e| matches!(e, ExecutionEvent::NodeStatus { to: Status::Running, .. })));
    assert!(seen.iter().any(|e| matches!(e, ExecutionEvent::NodeSample { .. })));
}

#[test]
fn test_runtime_config_from_file() {
    let dir = std::env::temp_dir().join(format!("genruntime-config-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("engine.json");
    std::fs::write(&path, r#"{"default_concurrency": 20}"#).unwrap();

    let config = RuntimeConfig::from_file(&path).unwrap();
    assert_eq!(config.default_concurrency, 8);
    assert_eq!(config.event_buffer_size, RuntimeConfig::default().event_buffer_size);

    std::fs::remove_dir_all(&dir).unwrap();
}
