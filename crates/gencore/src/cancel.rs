use crate::NodeId;
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Per-node and global cancellation tokens.
///
/// Node tokens are children of the global token, so `cancel_all` reaches
/// every node while `cancel_node` affects a single one. Cancellation is
/// cooperative: runners observe the token between steps and nothing is
/// aborted forcibly.
pub struct CancellationRegistry {
    tokens: RwLock<Tokens>,
}

struct Tokens {
    global: CancellationToken,
    nodes: HashMap<NodeId, CancellationToken>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self {
            tokens: RwLock::new(Tokens {
                global: CancellationToken::new(),
                nodes: HashMap::new(),
            }),
        }
    }

    /// Install fresh tokens for a new run and return the global one.
    pub fn begin_run(&self) -> CancellationToken {
        let mut tokens = self.tokens.write();
        if tokens.global.is_cancelled() {
            tracing::debug!("Discarding cancellation requested before this run started");
        }
        let stale = tokens.nodes.iter().filter(|(_, t)| t.is_cancelled()).count();
        if stale > 0 && !tokens.global.is_cancelled() {
            tracing::debug!("Discarding cancellation of {} node(s) requested before this run started", stale);
        }
        tokens.global = CancellationToken::new();
        tokens.nodes.clear();
        tokens.global.clone()
    }

    pub fn global(&self) -> CancellationToken {
        self.tokens.read().global.clone()
    }

    /// Token for `id`, created on first use.
    pub fn token(&self, id: &str) -> CancellationToken {
        if let Some(token) = self.tokens.read().nodes.get(id) {
            return token.clone();
        }
        let mut tokens = self.tokens.write();
        let global = tokens.global.clone();
        tokens
            .nodes
            .entry(id.to_string())
            .or_insert_with(|| global.child_token())
            .clone()
    }

    pub fn cancel_node(&self, id: &str) {
        tracing::info!("Cancellation requested for node {}", id);
        self.token(id).cancel();
    }

    pub fn cancel_all(&self) {
        tracing::info!("Cancellation requested for all nodes");
        self.tokens.read().global.cancel();
    }

    pub fn is_canceled(&self, id: &str) -> bool {
        let tokens = self.tokens.read();
        match tokens.nodes.get(id) {
            Some(token) => token.is_cancelled(),
            None => tokens.global.is_cancelled(),
        }
    }

    pub fn is_global_canceled(&self) -> bool {
        self.tokens.read().global.is_cancelled()
    }

    /// Drop any cancellation recorded for `id`.
    pub fn reset_node(&self, id: &str) {
        self.tokens.write().nodes.remove(id);
    }
}

impl Default for CancellationRegistry {
    fn default() -> Self {
        Self::new()
    }
}
