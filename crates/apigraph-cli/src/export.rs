//! Graph exporters: node-link JSON, GraphML, Graphviz DOT and Cypher.
//!
//! All formats share one flat attribute view of nodes and edges
//! ([`node_props`] / [`edge_props`]) so they agree on names and values.

use apigraph_core::{Edge, EdgeRecord, Node, NodeId, NodeKey, ParameterGraph};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("GraphML serialization failed: {0}")]
    Xml(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExportFormat {
    Json,
    #[value(alias = "xml")]
    Graphml,
    #[value(alias = "graphviz")]
    Dot,
    #[value(alias = "cypher")]
    Neo4j,
}

impl ExportFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Graphml => "graphml",
            Self::Dot => "dot",
            Self::Neo4j => "neo4j",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Flat attribute view
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<String>),
}

impl PropValue {
    fn to_json(&self) -> Value {
        match self {
            PropValue::Str(s) => json!(s),
            PropValue::Int(i) => json!(i),
            PropValue::Float(f) => json!(f),
            PropValue::Bool(b) => json!(b),
            PropValue::List(items) => json!(items),
        }
    }

    /// Scalar text form; lists become a JSON array string.
    fn to_text(&self) -> String {
        match self {
            PropValue::Str(s) => s.clone(),
            PropValue::Int(i) => i.to_string(),
            PropValue::Float(f) => f.to_string(),
            PropValue::Bool(b) => b.to_string(),
            PropValue::List(items) => json!(items).to_string(),
        }
    }
}

pub type Props = Vec<(&'static str, PropValue)>;

pub fn node_props(node: &Node) -> Props {
    let mut props: Props = vec![("node_type", PropValue::Str(node.type_label().to_string()))];
    match node {
        Node::Tool(tool) => {
            props.push(("tool_name", PropValue::Str(tool.tool_name.clone())));
            props.push(("source_system", PropValue::Str(tool.source_system.clone())));
            props.push(("endpoint", PropValue::Str(tool.endpoint.clone())));
            if let Some(code) = tool.status_code {
                props.push(("status_code", PropValue::Int(code)));
            }
            if let Some(success) = tool.success {
                props.push(("success", PropValue::Bool(success)));
            }
            if let Some(curl) = &tool.curl_command {
                props.push(("curl_command", PropValue::Str(curl.clone())));
            }
            if let Some(ts) = &tool.timestamp {
                props.push(("timestamp", PropValue::Str(ts.clone())));
            }
            props.push(("input_keys", PropValue::List(tool.input_keys.clone())));
            props.push(("output_keys", PropValue::List(tool.output_keys.clone())));
        }
        Node::Parameter(param) => {
            props.push(("name", PropValue::Str(param.name.clone())));
        }
    }
    props
}

pub fn edge_props(edge: &Edge) -> Props {
    let mut props: Props = vec![("edge_type", PropValue::Str(edge.kind().as_str().to_string()))];
    if let Some(flow) = edge.flow() {
        props.push(("matching_param", PropValue::Str(flow.matching_param.clone())));
        props.push(("confidence", PropValue::Float(flow.confidence)));
        props.push(("match_type", PropValue::Str(flow.match_type.as_str().to_string())));
    }
    if let Some(reasoning) = edge.reasoning() {
        props.push(("reasoning", PropValue::Str(reasoning.to_string())));
    }
    props
}

/// Exported identifier per node, indexed by `NodeId::raw()`.
///
/// Tools keep their id; a parameter keeps its name unless that name is also
/// a tool id, in which case it becomes `param:{name}`.
pub fn export_ids(graph: &ParameterGraph) -> Vec<String> {
    let tool_ids: HashSet<&str> = graph
        .nodes()
        .filter(|(_, key, _)| key.is_tool())
        .map(|(_, key, _)| key.as_str())
        .collect();

    graph
        .nodes()
        .map(|(_, key, _)| match key {
            NodeKey::Tool(id) => id.clone(),
            NodeKey::Parameter(name) if tool_ids.contains(name.as_str()) => format!("param:{name}"),
            NodeKey::Parameter(name) => name.clone(),
        })
        .collect()
}

fn id_for(ids: &[String], id: NodeId) -> &str {
    ids.get(id.raw() as usize).map(String::as_str).unwrap_or("")
}

// =============================================================================
// Node-link JSON
// =============================================================================

/// Node-link document: `directed`, `multigraph`, `graph`, `nodes`, `links`.
///
/// Parallel links between the same pair carry increasing `key`s.
pub fn to_node_link(graph: &ParameterGraph) -> Value {
    let ids = export_ids(graph);

    let nodes: Vec<Value> = graph
        .nodes()
        .map(|(id, _, node)| {
            let mut obj = Map::new();
            obj.insert("id".to_string(), json!(id_for(&ids, id)));
            for (name, value) in node_props(node) {
                obj.insert(name.to_string(), value.to_json());
            }
            Value::Object(obj)
        })
        .collect();

    let mut parallel: HashMap<(NodeId, NodeId), usize> = HashMap::new();
    let links: Vec<Value> = graph
        .edges()
        .map(|record| {
            let key = parallel.entry((record.source, record.target)).or_insert(0);
            let mut obj = Map::new();
            obj.insert("source".to_string(), json!(id_for(&ids, record.source)));
            obj.insert("target".to_string(), json!(id_for(&ids, record.target)));
            obj.insert("key".to_string(), json!(*key));
            *key += 1;
            for (name, value) in edge_props(&record.edge) {
                obj.insert(name.to_string(), value.to_json());
            }
            Value::Object(obj)
        })
        .collect();

    json!({
        "directed": true,
        "multigraph": true,
        "graph": {},
        "nodes": nodes,
        "links": links,
    })
}

pub fn render_json(graph: &ParameterGraph) -> Result<String, ExportError> {
    Ok(serde_json::to_string_pretty(&to_node_link(graph))?)
}

// =============================================================================
// GraphML
// =============================================================================

/// (attr.name, attr.type) of every key GraphML may use, per domain.
const GRAPHML_NODE_KEYS: &[(&str, &str)] = &[
    ("node_type", "string"),
    ("name", "string"),
    ("tool_name", "string"),
    ("source_system", "string"),
    ("endpoint", "string"),
    ("status_code", "long"),
    ("success", "boolean"),
    ("curl_command", "string"),
    ("timestamp", "string"),
    ("input_keys", "string"),
    ("output_keys", "string"),
];

const GRAPHML_EDGE_KEYS: &[(&str, &str)] = &[
    ("edge_type", "string"),
    ("matching_param", "string"),
    ("confidence", "double"),
    ("match_type", "string"),
    ("reasoning", "string"),
];

fn xml_err<E: fmt::Display>(err: E) -> ExportError {
    ExportError::Xml(err.to_string())
}

struct GraphmlWriter {
    inner: Writer<Vec<u8>>,
}

impl GraphmlWriter {
    fn event(&mut self, event: Event<'_>) -> Result<(), ExportError> {
        self.inner.write_event(event).map_err(xml_err)
    }

    fn start(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), ExportError> {
        self.event(Event::Start(
            BytesStart::new(name).with_attributes(attrs.iter().copied()),
        ))
    }

    fn empty(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), ExportError> {
        self.event(Event::Empty(
            BytesStart::new(name).with_attributes(attrs.iter().copied()),
        ))
    }

    fn end(&mut self, name: &str) -> Result<(), ExportError> {
        self.event(Event::End(BytesEnd::new(name)))
    }

    fn data(&mut self, key: &str, value: &str) -> Result<(), ExportError> {
        self.start("data", &[("key", key)])?;
        self.event(Event::Text(BytesText::new(value)))?;
        self.end("data")
    }
}

pub fn render_graphml(graph: &ParameterGraph) -> Result<String, ExportError> {
    let ids = export_ids(graph);
    let mut w = GraphmlWriter {
        inner: Writer::new_with_indent(Vec::new(), b' ', 2),
    };

    w.event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    w.start(
        "graphml",
        &[
            ("xmlns", "http://graphml.graphdrawing.org/xmlns"),
            ("xmlns:xsi", "http://www.w3.org/2001/XMLSchema-instance"),
            (
                "xsi:schemaLocation",
                "http://graphml.graphdrawing.org/xmlns http://graphml.graphdrawing.org/xmlns/1.0/graphml.xsd",
            ),
        ],
    )?;

    for (domain, prefix, keys) in [
        ("node", "n_", GRAPHML_NODE_KEYS),
        ("edge", "e_", GRAPHML_EDGE_KEYS),
    ] {
        for &(name, ty) in keys {
            let id = format!("{prefix}{name}");
            w.empty(
                "key",
                &[
                    ("id", id.as_str()),
                    ("for", domain),
                    ("attr.name", name),
                    ("attr.type", ty),
                ],
            )?;
        }
    }

    w.start("graph", &[("id", "apigraph"), ("edgedefault", "directed")])?;

    for (id, _, node) in graph.nodes() {
        w.start("node", &[("id", id_for(&ids, id))])?;
        for (name, value) in node_props(node) {
            w.data(&format!("n_{name}"), &value.to_text())?;
        }
        w.end("node")?;
    }

    for (index, record) in graph.edges().enumerate() {
        let edge_id = format!("e{index}");
        w.start(
            "edge",
            &[
                ("id", edge_id.as_str()),
                ("source", id_for(&ids, record.source)),
                ("target", id_for(&ids, record.target)),
            ],
        )?;
        for (name, value) in edge_props(&record.edge) {
            w.data(&format!("e_{name}"), &value.to_text())?;
        }
        w.end("edge")?;
    }

    w.end("graph")?;
    w.end("graphml")?;

    String::from_utf8(w.inner.into_inner()).map_err(xml_err)
}

// =============================================================================
// Graphviz DOT
// =============================================================================

pub(crate) fn node_color(node: &Node) -> &'static str {
    match node.type_label() {
        "tool" => "#FF6B6B",
        "input_param" => "#4ECDC4",
        _ => "#95E1D3",
    }
}

pub(crate) fn edge_color(edge: &Edge) -> &'static str {
    match edge {
        Edge::RequiresInput => "#A8DADC",
        Edge::ProducesOutput => "#457B9D",
        Edge::PotentialFlow(_) => "#E63946",
        Edge::SemanticFlow { .. } => "#F77F00",
    }
}

fn dot_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

pub fn render_dot(graph: &ParameterGraph) -> String {
    let ids = export_ids(graph);
    let mut out = String::new();
    out.push_str("digraph apigraph {\n");
    out.push_str("  rankdir=LR;\n");
    out.push_str("  node [fontname=\"Helvetica\", style=filled];\n");
    out.push_str("  edge [fontname=\"Helvetica\", fontsize=10];\n\n");

    for (id, _, node) in graph.nodes() {
        let (shape, label) = match node {
            Node::Tool(tool) => (
                "box",
                format!("{}\\n{}", dot_escape(&tool.tool_id()), dot_escape(&tool.endpoint)),
            ),
            Node::Parameter(param) => ("ellipse", dot_escape(&param.name)),
        };
        out.push_str(&format!(
            "  \"{}\" [label=\"{}\", shape={}, fillcolor=\"{}\"];\n",
            dot_escape(id_for(&ids, id)),
            label,
            shape,
            node_color(node)
        ));
    }
    out.push('\n');

    for record in graph.edges() {
        out.push_str(&dot_edge(&ids, record));
    }
    out.push_str("}\n");
    out
}

fn dot_edge(ids: &[String], record: &EdgeRecord) -> String {
    let mut attrs = vec![format!("color=\"{}\"", edge_color(&record.edge))];
    match record.edge.flow() {
        Some(flow) => {
            attrs.push(format!(
                "label=\"{} ({:.2})\"",
                dot_escape(&flow.matching_param),
                flow.confidence
            ));
            attrs.push("penwidth=2".to_string());
            if matches!(record.edge, Edge::SemanticFlow { .. }) {
                attrs.push("style=dashed".to_string());
            }
        }
        None => attrs.push(format!("label=\"{}\"", record.edge.kind())),
    }
    format!(
        "  \"{}\" -> \"{}\" [{}];\n",
        dot_escape(id_for(ids, record.source)),
        dot_escape(id_for(ids, record.target)),
        attrs.join(", ")
    )
}

// =============================================================================
// Cypher
// =============================================================================

/// Cypher variable for an exported id: every character outside
/// `[A-Za-z0-9_]` (notably `.`, `[` and `]`) becomes `_`.
pub fn cypher_var(id: &str) -> String {
    let safe: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    format!("n_{safe}")
}

fn cypher_string(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn cypher_value(value: &PropValue) -> String {
    match value {
        PropValue::Str(s) => cypher_string(s),
        PropValue::Int(i) => i.to_string(),
        PropValue::Float(f) => f.to_string(),
        PropValue::Bool(b) => b.to_string(),
        PropValue::List(items) => format!(
            "[{}]",
            items.iter().map(|s| cypher_string(s)).collect::<Vec<_>>().join(", ")
        ),
    }
}

/// `input_param` -> `InputParam`.
fn cypher_label(node: &Node) -> String {
    node.type_label()
        .split('_')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

fn cypher_props(uid: &str, props: Props, skip: &str) -> String {
    let mut parts = vec![format!("uid: {}", cypher_string(uid))];
    parts.extend(
        props
            .iter()
            .filter(|(name, _)| *name != skip)
            .map(|(name, value)| format!("{name}: {}", cypher_value(value))),
    );
    parts.join(", ")
}

pub fn render_cypher(graph: &ParameterGraph) -> String {
    let ids = export_ids(graph);
    let labels: Vec<String> = graph.nodes().map(|(_, _, node)| cypher_label(node)).collect();
    let mut lines = vec!["// Nodes".to_string()];

    for (id, _, node) in graph.nodes() {
        let uid = id_for(&ids, id);
        lines.push(format!(
            "CREATE ({}:{} {{{}}});",
            cypher_var(uid),
            cypher_label(node),
            cypher_props(uid, node_props(node), "node_type")
        ));
    }

    lines.push(String::new());
    lines.push("// Relationships".to_string());

    for (index, record) in graph.edges().enumerate() {
        let source = id_for(&ids, record.source);
        let target = id_for(&ids, record.target);
        let label_of = |id: NodeId| labels.get(id.raw() as usize).map(String::as_str).unwrap_or("");
        let props = cypher_props(&format!("e{index}"), edge_props(&record.edge), "edge_type");
        lines.push(format!(
            "MATCH (a:{} {{uid: {}}}), (b:{} {{uid: {}}}) CREATE (a)-[:{} {{{}}}]->(b);",
            label_of(record.source),
            cypher_string(source),
            label_of(record.target),
            cypher_string(target),
            record.edge.kind().as_str().to_ascii_uppercase(),
            props
        ));
    }

    lines.push(String::new());
    lines.join("\n")
}

// =============================================================================
// Files
// =============================================================================

pub fn render(graph: &ParameterGraph, format: ExportFormat) -> Result<String, ExportError> {
    match format {
        ExportFormat::Json => render_json(graph),
        ExportFormat::Graphml => render_graphml(graph),
        ExportFormat::Dot => Ok(render_dot(graph)),
        ExportFormat::Neo4j => Ok(render_cypher(graph)),
    }
}

pub fn export_graph(
    graph: &ParameterGraph,
    format: ExportFormat,
    path: &Path,
) -> Result<(), ExportError> {
    let text = render(graph, format)?;
    std::fs::write(path, text).map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(path = %path.display(), format = %format, "exported graph");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use apigraph_core::{apply_semantic_matches, ApiRecord, FlowDetector, GraphBuilder, SemanticMatch};

    fn sample() -> ParameterGraph {
        let mut graph = GraphBuilder::new()
            .build_from_records(&[
                ApiRecord {
                    curl_command: Some("curl -d 'x' /users".to_string()),
                    ..ApiRecord::new("get_user", "/users?a=1&b=<x>", "crm")
                        .with_output(r#"{"items": [{"email": "a"}], "note": "n"}"#)
                        .with_status(200, true)
                },
                ApiRecord::new("send", "/mail", "mail").with_input(r#"{"items": [{"email": "a"}]}"#),
            ])
            .unwrap();
        let detector = FlowDetector::default();
        let flows = detector.detect_flows(&graph);
        detector.apply_flows(&mut graph, &flows);
        graph
    }

    #[test]
    fn format_names() {
        let parse = |s: &str| <ExportFormat as clap::ValueEnum>::from_str(s, true);
        assert_eq!(parse("GraphML"), Ok(ExportFormat::Graphml));
        assert_eq!(parse("cypher"), Ok(ExportFormat::Neo4j));
        assert!(parse("png").is_err());
        for format in [ExportFormat::Json, ExportFormat::Graphml, ExportFormat::Dot, ExportFormat::Neo4j] {
            assert_eq!(parse(format.as_str()), Ok(format));
        }
    }

    #[test]
    fn node_link_shape() {
        let graph = sample();
        let doc = to_node_link(&graph);
        assert_eq!(doc["directed"], json!(true));
        assert_eq!(doc["multigraph"], json!(true));
        assert_eq!(doc["nodes"].as_array().unwrap().len(), graph.node_count());
        assert_eq!(doc["links"].as_array().unwrap().len(), graph.edge_count());

        let tool = &doc["nodes"][0];
        assert_eq!(tool["id"], json!("crm.get_user"));
        assert_eq!(tool["node_type"], json!("tool"));
        assert_eq!(tool["status_code"], json!(200));
        assert_eq!(tool["output_keys"], json!(["items", "items[0].email", "note"]));

        let flows: Vec<&Value> = doc["links"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|l| l["edge_type"] == json!("potential_flow"))
            .collect();
        assert_eq!(flows.len(), 2);
        assert_eq!(flows[0]["key"], json!(0));
        assert_eq!(flows[1]["key"], json!(1));
        assert_eq!(flows[0]["match_type"], json!("exact"));
    }

    #[test]
    fn colliding_parameter_ids_are_prefixed() {
        let graph = GraphBuilder::new()
            .build_from_records(&[ApiRecord::new("get", "/", "crm").with_input(r#"{"crm.get": 1}"#)])
            .unwrap();
        assert_eq!(export_ids(&graph), vec!["crm.get", "param:crm.get"]);
    }

    #[test]
    fn graphml_declares_keys_and_escapes_text() {
        let xml = render_graphml(&sample()).unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains(r#"<key id="n_status_code" for="node" attr.name="status_code" attr.type="long"/>"#));
        assert!(xml.contains(r#"<graph id="apigraph" edgedefault="directed">"#));
        assert!(xml.contains(r#"<node id="items[0].email">"#));
        assert!(xml.contains("/users?a=1&amp;b=&lt;x&gt;"));
        assert!(xml.contains(r#"<data key="e_edge_type">potential_flow</data>"#));
    }

    #[test]
    fn dot_has_every_edge() {
        let graph = sample();
        let dot = render_dot(&graph);
        assert!(dot.starts_with("digraph apigraph {"));
        assert_eq!(dot.matches(" -> ").count(), graph.edge_count());
        assert!(dot.contains("\"crm.get_user\" -> \"mail.send\""));
        assert!(dot.contains("label=\"items (1.00)\""));
    }

    #[test]
    fn cypher_sanitizes_variables() {
        assert_eq!(cypher_var("crm.get_user"), "n_crm_get_user");
        assert_eq!(cypher_var("items[0].email"), "n_items_0__email");

        let script = render_cypher(&sample());
        assert!(script.contains("CREATE (n_crm_get_user:Tool {uid: 'crm.get_user', "));
        assert!(script.contains(
            "CREATE (n_items_0__email:OutputParam {uid: 'items[0].email', name: 'items[0].email'});"
        ));
        assert!(script.contains("curl_command: 'curl -d \\'x\\' /users'"));
        assert!(script.contains("-[:POTENTIAL_FLOW {uid: "));
    }

    #[test]
    fn confidences_export_as_written() {
        let mut graph = sample();
        let added = apply_semantic_matches(
            &mut graph,
            &[SemanticMatch {
                source_tool: "crm.get_user".to_string(),
                target_tool: "mail.send".to_string(),
                output_param: "note".to_string(),
                input_param: "items".to_string(),
                confidence: 0.95,
                reasoning: "message body".to_string(),
            }],
        );
        assert_eq!(added, 1);

        let doc = to_node_link(&graph);
        let semantic = doc["links"]
            .as_array()
            .unwrap()
            .iter()
            .find(|l| l["edge_type"] == json!("semantic_flow"))
            .unwrap();
        assert_eq!(semantic["confidence"], json!(0.95));

        assert!(render_cypher(&graph).contains("confidence: 0.95,"));
        assert!(render_graphml(&graph)
            .unwrap()
            .contains(r#"<data key="e_confidence">0.95</data>"#));
    }
}
