use gencore::{EngineError, Graph, NodeKind, Runner, RunnerMetadata};
use std::collections::HashMap;
use std::sync::Arc;

/// One runner per node kind.
pub struct RunnerRegistry {
    runners: HashMap<NodeKind, Arc<dyn Runner>>,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self {
            runners: HashMap::new(),
        }
    }

    /// Register `runner` for `kind`, replacing any previous one.
    pub fn register(&mut self, kind: NodeKind, runner: Arc<dyn Runner>) {
        tracing::info!("Registering runner {} for kind {}", runner.name(), kind);
        self.runners.insert(kind, runner);
    }

    pub fn get(&self, kind: NodeKind) -> Option<Arc<dyn Runner>> {
        self.runners.get(&kind).cloned()
    }

    pub fn resolve(&self, kind: NodeKind) -> Result<Arc<dyn Runner>, EngineError> {
        self.get(kind)
            .ok_or_else(|| EngineError::UnknownKind(kind.to_string()))
    }

    /// Fail when any node in `graph` has no runner.
    pub fn ensure_covers(&self, graph: &Graph) -> Result<(), EngineError> {
        for node in &graph.nodes {
            self.resolve(node.kind)?;
        }
        Ok(())
    }

    /// Registered kinds, in declaration order of [`NodeKind::ALL`].
    pub fn list_kinds(&self) -> Vec<NodeKind> {
        NodeKind::ALL
            .into_iter()
            .filter(|kind| self.runners.contains_key(kind))
            .collect()
    }

    pub fn get_metadata(&self, kind: NodeKind) -> Option<(String, RunnerMetadata)> {
        self.runners
            .get(&kind)
            .map(|runner| (runner.name().to_string(), runner.metadata()))
    }
}

impl Default for RunnerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
