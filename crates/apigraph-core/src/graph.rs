//! The attributed tool/parameter graph.
//!
//! Nodes are stored once and addressed by a compact [`NodeId`]; their string
//! identity is a [`NodeKey`]. Edges live in an append-only list with two
//! indexes:
//! - forward: `(source, kind) -> edge ids`
//! - by kind: `kind -> bitmap of edge ids`
//!
//! Nothing is ever removed. The only in-place update is the last-write-wins
//! overwrite of a tool node's attributes.

use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

/// Compact node handle (index into the node column).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct NodeId(u32);

impl NodeId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

/// String identity of a node.
///
/// Tools and parameters live in separate namespaces, so a parameter named
/// `crm.get_user` never merges with the tool `crm.get_user`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "namespace", content = "id", rename_all = "snake_case")]
pub enum NodeKey {
    Tool(String),
    Parameter(String),
}

impl NodeKey {
    pub fn as_str(&self) -> &str {
        match self {
            NodeKey::Tool(id) | NodeKey::Parameter(id) => id,
        }
    }

    pub fn is_tool(&self) -> bool {
        matches!(self, NodeKey::Tool(_))
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tool identifier: `{source_system}.{tool_name}`.
pub fn tool_id(source_system: &str, tool_name: &str) -> String {
    format!("{source_system}.{tool_name}")
}

// ============================================================================
// Nodes
// ============================================================================

/// Whether a parameter was first seen as something a tool consumes or emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Input,
    Output,
}

impl ParamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ParamKind::Input => "input",
            ParamKind::Output => "output",
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            ParamKind::Input => ParamKind::Output,
            ParamKind::Output => ParamKind::Input,
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One documented API operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolNode {
    pub tool_name: String,
    pub source_system: String,
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curl_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Same information as the `RequiresInput` edges, kept for direct lookup.
    pub input_keys: Vec<String>,
    /// Same information as the `ProducesOutput` edges, kept for direct lookup.
    pub output_keys: Vec<String>,
}

impl ToolNode {
    pub fn tool_id(&self) -> String {
        tool_id(&self.source_system, &self.tool_name)
    }
}

/// A distinct parameter name, shared by every tool that uses it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterNode {
    pub name: String,
    pub kind: ParamKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node_type", rename_all = "snake_case")]
pub enum Node {
    Tool(ToolNode),
    Parameter(ParameterNode),
}

impl Node {
    pub fn key(&self) -> NodeKey {
        match self {
            Node::Tool(tool) => NodeKey::Tool(tool.tool_id()),
            Node::Parameter(param) => NodeKey::Parameter(param.name.clone()),
        }
    }

    pub fn as_tool(&self) -> Option<&ToolNode> {
        match self {
            Node::Tool(tool) => Some(tool),
            Node::Parameter(_) => None,
        }
    }

    pub fn as_parameter(&self) -> Option<&ParameterNode> {
        match self {
            Node::Parameter(param) => Some(param),
            Node::Tool(_) => None,
        }
    }

    /// Type label used by exporters: `tool`, `input_param` or `output_param`.
    pub fn type_label(&self) -> &'static str {
        match self {
            Node::Tool(_) => "tool",
            Node::Parameter(ParameterNode {
                kind: ParamKind::Input,
                ..
            }) => "input_param",
            Node::Parameter(ParameterNode {
                kind: ParamKind::Output,
                ..
            }) => "output_param",
        }
    }
}

// ============================================================================
// Edges
// ============================================================================

/// How a flow edge was inferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Fuzzy,
    Semantic,
}

impl MatchType {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchType::Exact => "exact",
            MatchType::Fuzzy => "fuzzy",
            MatchType::Semantic => "semantic",
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attributes shared by tool-to-tool flow edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowAttrs {
    pub matching_param: String,
    pub confidence: f64,
    pub match_type: MatchType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "edge_type", rename_all = "snake_case")]
pub enum Edge {
    /// tool -> parameter: the tool consumes this parameter.
    RequiresInput,
    /// tool -> parameter: the tool emits this parameter.
    ProducesOutput,
    /// tool -> tool, inferred by name matching.
    PotentialFlow(FlowAttrs),
    /// tool -> tool, contributed by an external enricher.
    SemanticFlow {
        #[serde(flatten)]
        flow: FlowAttrs,
        reasoning: String,
    },
}

impl Edge {
    pub fn kind(&self) -> EdgeKind {
        match self {
            Edge::RequiresInput => EdgeKind::RequiresInput,
            Edge::ProducesOutput => EdgeKind::ProducesOutput,
            Edge::PotentialFlow(_) => EdgeKind::PotentialFlow,
            Edge::SemanticFlow { .. } => EdgeKind::SemanticFlow,
        }
    }

    pub fn flow(&self) -> Option<&FlowAttrs> {
        match self {
            Edge::PotentialFlow(flow) | Edge::SemanticFlow { flow, .. } => Some(flow),
            Edge::RequiresInput | Edge::ProducesOutput => None,
        }
    }

    pub fn reasoning(&self) -> Option<&str> {
        match self {
            Edge::SemanticFlow { reasoning, .. } => Some(reasoning),
            _ => None,
        }
    }
}

/// Edge type tag, used for indexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    RequiresInput,
    ProducesOutput,
    PotentialFlow,
    SemanticFlow,
}

impl EdgeKind {
    pub const ALL: [EdgeKind; 4] = [
        EdgeKind::RequiresInput,
        EdgeKind::ProducesOutput,
        EdgeKind::PotentialFlow,
        EdgeKind::SemanticFlow,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EdgeKind::RequiresInput => "requires_input",
            EdgeKind::ProducesOutput => "produces_output",
            EdgeKind::PotentialFlow => "potential_flow",
            EdgeKind::SemanticFlow => "semantic_flow",
        }
    }

    pub fn is_flow(self) -> bool {
        matches!(self, EdgeKind::PotentialFlow | EdgeKind::SemanticFlow)
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub source: NodeId,
    pub target: NodeId,
    pub edge: Edge,
}

// ============================================================================
// Graph
// ============================================================================

#[derive(Debug, Default)]
pub struct ParameterGraph {
    /// Node column: node_id -> node
    nodes: Vec<Node>,
    /// Key column: node_id -> key
    keys: Vec<NodeKey>,
    key_index: HashMap<NodeKey, NodeId>,
    edges: Vec<EdgeRecord>,
    /// Forward index: (source, kind) -> edge ids
    forward_index: HashMap<(NodeId, EdgeKind), Vec<u32>>,
    /// Kind index: kind -> bitmap of edge ids
    kind_index: HashMap<EdgeKind, RoaringBitmap>,
}

impl ParameterGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Insert a tool node, or overwrite the attributes of an existing tool
    /// with the same identifier (last write wins). The handle is stable.
    pub fn upsert_tool(&mut self, tool: ToolNode) -> NodeId {
        let key = NodeKey::Tool(tool.tool_id());
        if let Some(&id) = self.key_index.get(&key) {
            tracing::debug!(tool = %key, "overwriting tool node attributes");
            self.nodes[id.index()] = Node::Tool(tool);
            return id;
        }
        self.push_node(key, Node::Tool(tool))
    }

    /// Insert a parameter node unless one with this name already exists.
    ///
    /// An existing node is returned untouched, whatever `param.kind` says.
    pub fn add_parameter(&mut self, param: ParameterNode) -> NodeId {
        let key = NodeKey::Parameter(param.name.clone());
        if let Some(&id) = self.key_index.get(&key) {
            return id;
        }
        self.push_node(key, Node::Parameter(param))
    }

    fn push_node(&mut self, key: NodeKey, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        self.keys.push(key.clone());
        self.key_index.insert(key, id);
        id
    }

    /// Append an edge.
    ///
    /// Returns `None` (and stores nothing) when an equivalent edge already
    /// exists: same endpoints and kind, and for flow edges the same
    /// `matching_param`.
    pub fn add_edge(&mut self, source: NodeId, target: NodeId, edge: Edge) -> Option<u32> {
        let kind = edge.kind();
        if self.has_equivalent_edge(source, target, &edge) {
            return None;
        }

        let edge_id = self.edges.len() as u32;
        self.forward_index
            .entry((source, kind))
            .or_default()
            .push(edge_id);
        self.kind_index.entry(kind).or_default().insert(edge_id);
        self.edges.push(EdgeRecord {
            source,
            target,
            edge,
        });
        Some(edge_id)
    }

    fn has_equivalent_edge(&self, source: NodeId, target: NodeId, edge: &Edge) -> bool {
        let matching_param = edge.flow().map(|f| f.matching_param.as_str());
        self.outgoing(source, edge.kind()).any(|existing| {
            existing.target == target
                && existing.edge.flow().map(|f| f.matching_param.as_str()) == matching_param
        })
    }

    // ------------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------------

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub fn key(&self, id: NodeId) -> Option<&NodeKey> {
        self.keys.get(id.index())
    }

    pub fn id_of(&self, key: &NodeKey) -> Option<NodeId> {
        self.key_index.get(key).copied()
    }

    pub fn tool_node_id(&self, tool_id: &str) -> Option<NodeId> {
        self.id_of(&NodeKey::Tool(tool_id.to_string()))
    }

    pub fn tool(&self, tool_id: &str) -> Option<&ToolNode> {
        self.tool_node_id(tool_id)
            .and_then(|id| self.node(id))
            .and_then(Node::as_tool)
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterNode> {
        self.id_of(&NodeKey::Parameter(name.to_string()))
            .and_then(|id| self.node(id))
            .and_then(Node::as_parameter)
    }

    /// Every node with its key, in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &NodeKey, &Node)> {
        self.nodes
            .iter()
            .zip(self.keys.iter())
            .enumerate()
            .map(|(i, (node, key))| (NodeId(i as u32), key, node))
    }

    /// Every edge, in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = &EdgeRecord> {
        self.edges.iter()
    }

    /// Tool handles ordered by identifier.
    pub fn tool_ids(&self) -> Vec<NodeId> {
        let mut tools: Vec<(&str, NodeId)> = self
            .nodes()
            .filter(|(_, key, _)| key.is_tool())
            .map(|(id, key, _)| (key.as_str(), id))
            .collect();
        tools.sort_unstable();
        tools.into_iter().map(|(_, id)| id).collect()
    }

    /// Parameter nodes, optionally restricted to one kind.
    pub fn parameters(&self, kind: Option<ParamKind>) -> Vec<&ParameterNode> {
        self.nodes
            .iter()
            .filter_map(Node::as_parameter)
            .filter(|p| kind.map_or(true, |k| p.kind == k))
            .collect()
    }

    /// Outgoing edges of `source` with the given kind.
    pub fn outgoing(&self, source: NodeId, kind: EdgeKind) -> impl Iterator<Item = &EdgeRecord> {
        self.forward_index
            .get(&(source, kind))
            .map(|ids| ids.as_slice())
            .unwrap_or(&[])
            .iter()
            .filter_map(|&id| self.edges.get(id as usize))
    }

    /// Names of the parameters `tool` reaches through `kind` edges.
    pub fn params_of(&self, tool: NodeId, kind: EdgeKind) -> BTreeSet<&str> {
        self.outgoing(tool, kind)
            .filter_map(|e| self.key(e.target))
            .filter(|key| !key.is_tool())
            .map(NodeKey::as_str)
            .collect()
    }

    pub fn output_params(&self, tool: NodeId) -> BTreeSet<&str> {
        self.params_of(tool, EdgeKind::ProducesOutput)
    }

    pub fn input_params(&self, tool: NodeId) -> BTreeSet<&str> {
        self.params_of(tool, EdgeKind::RequiresInput)
    }

    /// All edges of one kind, in insertion order.
    pub fn edges_of_kind(&self, kind: EdgeKind) -> Vec<&EdgeRecord> {
        self.kind_index
            .get(&kind)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.edges.get(id as usize))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn edge_kind_count(&self, kind: EdgeKind) -> usize {
        self.kind_index
            .get(&kind)
            .map(|ids| ids.len() as usize)
            .unwrap_or(0)
    }

    pub fn statistics(&self) -> GraphStatistics {
        let tool_nodes = self.keys.iter().filter(|k| k.is_tool()).count();
        let input_parameters = self.parameters(Some(ParamKind::Input)).len();
        let output_parameters = self.parameters(Some(ParamKind::Output)).len();
        let potential_flow_edges = self.edge_kind_count(EdgeKind::PotentialFlow);
        let semantic_flow_edges = self.edge_kind_count(EdgeKind::SemanticFlow);

        let n = self.node_count() as f64;
        let density = if self.node_count() < 2 {
            0.0
        } else {
            self.edge_count() as f64 / (n * (n - 1.0))
        };

        GraphStatistics {
            total_nodes: self.node_count(),
            total_edges: self.edge_count(),
            tool_nodes,
            parameter_nodes: input_parameters + output_parameters,
            input_parameters,
            output_parameters,
            requires_input_edges: self.edge_kind_count(EdgeKind::RequiresInput),
            produces_output_edges: self.edge_kind_count(EdgeKind::ProducesOutput),
            potential_flow_edges,
            semantic_flow_edges,
            flow_connections: potential_flow_edges + semantic_flow_edges,
            density,
        }
    }
}

/// Summary counts over a graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphStatistics {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub tool_nodes: usize,
    pub parameter_nodes: usize,
    pub input_parameters: usize,
    pub output_parameters: usize,
    pub requires_input_edges: usize,
    pub produces_output_edges: usize,
    pub potential_flow_edges: usize,
    pub semantic_flow_edges: usize,
    pub flow_connections: usize,
    /// Directed density `E / (N * (N - 1))`.
    pub density: f64,
}
