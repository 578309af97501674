use crate::{GraphError, Value};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type NodeId = String;

/// Upper bound on generations a single node may request.
pub const MAX_SAMPLES: u32 = 8;

/// Kind of content a node generates; selects the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Text,
    Image,
    Video,
    Speech,
}

impl NodeKind {
    pub const ALL: [NodeKind; 4] = [NodeKind::Text, NodeKind::Image, NodeKind::Video, NodeKind::Speech];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Text => "text",
            NodeKind::Image => "image",
            NodeKind::Video => "video",
            NodeKind::Speech => "speech",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown node kind '{}'", s))
    }
}

/// Snapshot of a node graph as supplied by the editor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: NodeSpec) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    /// Link `source.source_port` to `target.target_port`, returning the edge id.
    pub fn connect(
        &mut self,
        source: impl Into<NodeId>,
        source_port: impl Into<String>,
        target: impl Into<NodeId>,
        target_port: impl Into<String>,
    ) -> String {
        let edge = Edge {
            id: Uuid::new_v4().to_string(),
            source: source.into(),
            source_port: source_port.into(),
            target: target.into(),
            target_port: target_port.into(),
        };
        let id = edge.id.clone();
        self.edges.push(edge);
        id
    }

    pub fn find_node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Edges whose target is `id`.
    pub fn incoming<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.target == id)
    }

    pub fn dependency_index(&self) -> Result<DependencyIndex, GraphError> {
        build_dependency_index(&self.nodes, &self.edges)
    }
}

/// Static description of one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: NodeId,
    pub kind: NodeKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub config: HashMap<String, Value>,
}

impl NodeSpec {
    pub fn new(kind: NodeKind) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), kind)
    }

    pub fn with_id(id: impl Into<NodeId>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            name: None,
            config: HashMap::new(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_prompt(self, prompt: impl Into<String>) -> Self {
        self.with_config("prompt", prompt.into())
    }

    pub fn with_samples(self, count: u32) -> Self {
        self.with_config("sample_count", count)
    }

    /// Trimmed prompt, empty when absent.
    pub fn prompt(&self) -> &str {
        self.config
            .get("prompt")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .unwrap_or("")
    }

    /// Requested generations, clamped to `1..=MAX_SAMPLES`.
    pub fn sample_count(&self) -> u32 {
        let requested = self
            .config
            .get("sample_count")
            .and_then(|v| v.as_u64())
            .unwrap_or(1);
        requested.clamp(1, MAX_SAMPLES as u64) as u32
    }

    pub fn timeout_ms(&self) -> Option<u64> {
        self.config
            .get("timeout_ms")
            .and_then(|v| v.as_u64())
            .filter(|ms| *ms > 0)
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Output port of `source` feeding input port of `target`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    #[serde(default = "new_edge_id")]
    pub id: String,
    pub source: NodeId,
    pub source_port: String,
    pub target: NodeId,
    pub target_port: String,
}

fn new_edge_id() -> String {
    Uuid::new_v4().to_string()
}

/// Derived dependency structure of a graph.
#[derive(Debug, Clone, Default)]
pub struct DependencyIndex {
    adjacency: HashMap<NodeId, Vec<NodeId>>,
    in_degree: HashMap<NodeId, usize>,
    order: Vec<NodeId>,
}

impl DependencyIndex {
    /// Direct dependents of `id`.
    pub fn dependents(&self, id: &str) -> &[NodeId] {
        self.adjacency.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn in_degree(&self, id: &str) -> usize {
        self.in_degree.get(id).copied().unwrap_or(0)
    }

    pub fn in_degrees(&self) -> &HashMap<NodeId, usize> {
        &self.in_degree
    }

    /// Node ids in graph declaration order.
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    /// Every node reachable from `id` through one or more edges.
    pub fn reachable_from(&self, id: &str) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<&str> = self.dependents(id).iter().map(String::as_str).collect();
        let mut reached = Vec::new();

        while let Some(next) = queue.pop_front() {
            if !seen.insert(next) {
                continue;
            }
            reached.push(next.to_string());
            queue.extend(self.dependents(next).iter().map(String::as_str));
        }

        reached
    }

    /// Groups of nodes that sit on a dependency cycle.
    pub fn cycles(&self) -> Vec<Vec<NodeId>> {
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let indices: HashMap<&str, NodeIndex> = self
            .order
            .iter()
            .map(|id| (id.as_str(), graph.add_node(id.as_str())))
            .collect();

        for (source, targets) in &self.adjacency {
            for target in targets {
                graph.add_edge(indices[source.as_str()], indices[target.as_str()], ());
            }
        }

        tarjan_scc(&graph)
            .into_iter()
            .filter(|component| component.len() > 1)
            .map(|component| component.into_iter().map(|idx| graph[idx].to_string()).collect())
            .collect()
    }

    pub fn has_cycle(&self) -> bool {
        !self.cycles().is_empty()
    }
}

/// Materialize adjacency and in-degree for `nodes`/`edges`.
///
/// Rejects duplicate node ids, self-loops and edges naming unknown nodes.
/// Cycles are accepted; the scheduler resolves them at run time. Several
/// edges between the same pair of nodes count as one dependency.
pub fn build_dependency_index(nodes: &[NodeSpec], edges: &[Edge]) -> Result<DependencyIndex, GraphError> {
    let mut index = DependencyIndex::default();

    for node in nodes {
        if index.in_degree.insert(node.id.clone(), 0).is_some() {
            return Err(GraphError::DuplicateNode(node.id.clone()));
        }
        index.adjacency.insert(node.id.clone(), Vec::new());
        index.order.push(node.id.clone());
    }

    let mut linked: HashSet<(&str, &str)> = HashSet::new();
    for edge in edges {
        if edge.source == edge.target {
            return Err(GraphError::SelfLoop {
                edge_id: edge.id.clone(),
                node_id: edge.source.clone(),
            });
        }
        for endpoint in [&edge.source, &edge.target] {
            if !index.in_degree.contains_key(endpoint) {
                return Err(GraphError::DanglingEdge {
                    edge_id: edge.id.clone(),
                    node_id: endpoint.clone(),
                });
            }
        }
        if !linked.insert((edge.source.as_str(), edge.target.as_str())) {
            continue;
        }
        if let Some(dependents) = index.adjacency.get_mut(&edge.source) {
            dependents.push(edge.target.clone());
        }
        if let Some(degree) = index.in_degree.get_mut(&edge.target) {
            *degree += 1;
        }
    }

    Ok(index)
}
