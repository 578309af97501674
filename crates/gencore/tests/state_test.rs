use gencore::{
    CancellationRegistry, CancellationToken, EventBus, ExecutionEvent, ExecutionState, Graph, NodeKind, NodeOutput,
    NodeSpec, Status, TransitionError,
};

fn state_with(ids: &[&str]) -> ExecutionState {
    let mut graph = Graph::new();
    for id in ids {
        graph.add_node(NodeSpec::with_id(*id, NodeKind::Image).with_prompt("p"));
    }
    let state = ExecutionState::default();
    state.sync_with(&graph);
    state
}

#[test]
fn test_legal_transitions() {
    assert!(Status::Idle.can_transition_to(Status::Queued));
    assert!(Status::Queued.can_transition_to(Status::Running));
    assert!(Status::Running.can_transition_to(Status::Success));
    assert!(Status::Queued.can_transition_to(Status::Error));
    assert!(Status::Error.can_transition_to(Status::Idle));
    assert!(Status::Canceled.can_transition_to(Status::Idle));

    assert!(!Status::Success.can_transition_to(Status::Idle));
    assert!(!Status::Success.can_transition_to(Status::Running));
    assert!(!Status::Running.can_transition_to(Status::Running));
    assert!(!Status::Error.can_transition_to(Status::Running));
    assert!(!Status::Idle.can_transition_to(Status::Success));
}

#[test]
fn test_illegal_transition_rejected() {
    let state = state_with(&["a"]);
    let err = state.transition("a", Status::Success).unwrap_err();
    assert_eq!(
        err,
        TransitionError::Illegal {
            node_id: "a".to_string(),
            from: Status::Idle,
            to: Status::Success
        }
    );
    assert_eq!(state.status("a"), Some(Status::Idle));
}

#[test]
fn test_running_is_not_reentrant() {
    let state = state_with(&["a"]);
    let token = CancellationToken::new();
    assert!(state.begin_running("a", &token).unwrap());
    assert!(state.begin_running("a", &token).is_err());
}

#[test]
fn test_begin_running_respects_cancellation() {
    let state = state_with(&["a"]);
    let token = CancellationToken::new();
    token.cancel();

    assert!(!state.begin_running("a", &token).unwrap());
    let node = state.get("a").unwrap();
    assert_eq!(node.status, Status::Canceled);
    assert!(node.cancel_requested);
}

#[test]
fn test_begin_running_clears_stale_cancel_flag() {
    let state = state_with(&["a"]);
    state.set_cancel_requested("a", true);

    assert!(state.begin_running("a", &CancellationToken::new()).unwrap());
    assert!(!state.get("a").unwrap().cancel_requested);
}

#[test]
fn test_success_records_result() {
    let state = state_with(&["a"]);
    state.begin_running("a", &CancellationToken::new()).unwrap();
    state.set_progress("a", 40);
    state.push_result("a", "first".into());
    state
        .finish_success("a", NodeOutput::new().with_output("output", "first"))
        .unwrap();

    let node = state.get("a").unwrap();
    assert_eq!(node.status, Status::Success);
    assert_eq!(node.progress, 100);
    assert_eq!(node.results.len(), 1);
    assert_eq!(node.last_result.unwrap().output("output").and_then(|v| v.as_str()), Some("first"));
}

#[test]
fn test_logs_are_timestamped() {
    let state = state_with(&["a"]);
    state.log("a", "queued");
    let node = state.get("a").unwrap();
    assert_eq!(node.logs.len(), 1);
    assert!(node.logs[0].starts_with('['));
    assert!(node.logs[0].ends_with("] queued"));
}

#[test]
fn test_retry_reset_is_idempotent() {
    let state = state_with(&["a", "b"]);
    state.begin_running("a", &CancellationToken::new()).unwrap();
    state.push_result("a", "partial".into());
    state.finish_error("a", "vendor rejected prompt").unwrap();

    assert!(state.reset_for_retry("a").unwrap());
    let first = state.get("a").unwrap();
    assert_eq!(first.status, Status::Idle);
    assert!(first.logs.is_empty());
    assert!(first.last_error.is_none());
    assert_eq!(first.progress, 0);

    assert!(!state.reset_for_retry("a").unwrap());
    assert_eq!(state.get("a").unwrap(), first);

    // idle node untouched
    assert!(!state.reset_for_retry("b").unwrap());
}

#[test]
fn test_sync_with_removes_deleted_nodes() {
    let state = state_with(&["a", "b"]);
    let mut graph = Graph::new();
    graph.add_node(NodeSpec::with_id("b", NodeKind::Text));
    graph.add_node(NodeSpec::with_id("c", NodeKind::Text));
    state.sync_with(&graph);

    assert!(state.get("a").is_none());
    assert!(state.get("b").is_some());
    assert_eq!(state.status("c"), Some(Status::Idle));
}

#[tokio::test]
async fn test_status_changes_are_published() {
    let bus = EventBus::new(16);
    let mut events = bus.subscribe();
    let state = ExecutionState::new(bus);
    let mut graph = Graph::new();
    graph.add_node(NodeSpec::with_id("a", NodeKind::Speech));
    state.sync_with(&graph);

    state.transition("a", Status::Queued).unwrap();

    match events.recv().await.unwrap() {
        ExecutionEvent::NodeStatus { node_id, from, to, .. } => {
            assert_eq!(node_id, "a");
            assert_eq!(from, Status::Idle);
            assert_eq!(to, Status::Queued);
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[test]
fn test_cancel_node_is_scoped() {
    let registry = CancellationRegistry::new();
    registry.begin_run();
    let a = registry.token("a");
    let b = registry.token("b");

    registry.cancel_node("a");
    assert!(a.is_cancelled());
    assert!(!b.is_cancelled());
    assert!(registry.is_canceled("a"));
    assert!(!registry.is_canceled("b"));
}

#[test]
fn test_cancel_all_reaches_every_node() {
    let registry = CancellationRegistry::new();
    registry.begin_run();
    let a = registry.token("a");

    registry.cancel_all();
    assert!(a.is_cancelled());
    assert!(registry.token("late").is_cancelled());
    assert!(registry.is_canceled("never-seen"));

    registry.begin_run();
    assert!(!registry.is_global_canceled());
    assert!(!registry.token("a").is_cancelled());
}

#[test]
fn test_begin_run_discards_earlier_cancellation() {
    let registry = CancellationRegistry::new();
    registry.cancel_node("a");
    registry.cancel_all();
    assert!(registry.is_global_canceled());

    let global = registry.begin_run();
    assert!(!global.is_cancelled());
    assert!(!registry.is_global_canceled());
    assert!(!registry.is_canceled("a"));
    assert!(!registry.token("a").is_cancelled());
}
