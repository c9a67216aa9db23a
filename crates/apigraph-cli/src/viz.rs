//! Self-contained HTML visualisation.
//!
//! Positions are computed here; the page only draws them. Two views:
//! - full graph (tools and parameters), circular or layered layout
//! - flow view: only tools taking part in a flow edge, layered by flow depth

use crate::export::{edge_color, export_ids, node_color};
use anyhow::{Context, Result};
use apigraph_core::{EdgeKind, Node, NodeId, ParameterGraph};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::path::Path;

const LAYER_SPACING: f64 = 300.0;
const ROW_SPACING: f64 = 80.0;
const FLOW_HIGHLIGHT: &str = "#2ECC71";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum VizLayout {
    #[value(alias = "circle")]
    Circular,
    /// Inputs, then tools by flow depth, then outputs.
    #[value(alias = "hierarchical")]
    Layered,
}

#[derive(Debug, Clone, Serialize)]
pub struct VizNode {
    pub id: String,
    pub label: String,
    pub node_type: String,
    pub color: String,
    pub title: String,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct VizEdge {
    pub source: String,
    pub target: String,
    pub edge_type: String,
    pub color: String,
    pub label: String,
    pub dashed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct VizGraph {
    pub title: String,
    pub nodes: Vec<VizNode>,
    pub edges: Vec<VizEdge>,
}

fn viz_node(ids: &[String], id: NodeId, node: &Node) -> VizNode {
    let export_id = ids.get(id.raw() as usize).cloned().unwrap_or_default();
    let (label, title) = match node {
        Node::Tool(tool) => (
            tool.tool_name.clone(),
            format!(
                "{}\n{}\ninputs: {}\noutputs: {}",
                tool.tool_id(),
                tool.endpoint,
                tool.input_keys.len(),
                tool.output_keys.len()
            ),
        ),
        Node::Parameter(param) => (param.name.clone(), format!("{} ({})", param.name, param.kind)),
    };
    VizNode {
        id: export_id,
        label,
        node_type: node.type_label().to_string(),
        color: node_color(node).to_string(),
        title,
        x: 0.0,
        y: 0.0,
    }
}

fn viz_edges(graph: &ParameterGraph, ids: &[String], keep: impl Fn(EdgeKind) -> bool) -> Vec<VizEdge> {
    let id_of = |id: NodeId| ids.get(id.raw() as usize).cloned().unwrap_or_default();
    graph
        .edges()
        .filter(|r| keep(r.edge.kind()))
        .map(|r| VizEdge {
            source: id_of(r.source),
            target: id_of(r.target),
            edge_type: r.edge.kind().as_str().to_string(),
            color: edge_color(&r.edge).to_string(),
            label: r
                .edge
                .flow()
                .map(|f| format!("{} ({:.2})", f.matching_param, f.confidence))
                .unwrap_or_default(),
            dashed: r.edge.kind() == EdgeKind::SemanticFlow,
        })
        .collect()
}

/// Every node and edge.
pub fn full_view(graph: &ParameterGraph, layout: VizLayout) -> VizGraph {
    let ids = export_ids(graph);
    let mut nodes: Vec<VizNode> = graph
        .nodes()
        .map(|(id, _, node)| viz_node(&ids, id, node))
        .collect();
    let edges = viz_edges(graph, &ids, |_| true);

    match layout {
        VizLayout::Circular => circular(&mut nodes),
        VizLayout::Layered => {
            let flow_edges: Vec<(&str, &str)> = edges
                .iter()
                .filter(|e| e.edge_type != EdgeKind::RequiresInput.as_str())
                .filter(|e| e.edge_type != EdgeKind::ProducesOutput.as_str())
                .map(|e| (e.source.as_str(), e.target.as_str()))
                .collect();
            let tools: Vec<&str> = nodes
                .iter()
                .filter(|n| n.node_type == "tool")
                .map(|n| n.id.as_str())
                .collect();

            // Inputs left of every tool, outputs right of them.
            let mut columns: Vec<Vec<String>> = vec![ids_of_type(&nodes, "input_param")];
            columns.extend(
                compute_layers(&tools, &flow_edges)
                    .into_iter()
                    .map(|layer| layer.into_iter().map(str::to_string).collect()),
            );
            columns.push(ids_of_type(&nodes, "output_param"));
            place_columns(&mut nodes, &columns);
        }
    }

    VizGraph {
        title: "API parameter graph".to_string(),
        nodes,
        edges,
    }
}

/// Tools connected by at least one flow edge, with only those edges.
pub fn flow_view(graph: &ParameterGraph) -> VizGraph {
    let ids = export_ids(graph);
    let edges = viz_edges(graph, &ids, EdgeKind::is_flow);

    let in_flow: HashSet<&str> = edges
        .iter()
        .flat_map(|e| [e.source.as_str(), e.target.as_str()])
        .collect();
    let mut nodes: Vec<VizNode> = graph
        .nodes()
        .filter(|(id, _, node)| {
            node.as_tool().is_some()
                && ids
                    .get(id.raw() as usize)
                    .is_some_and(|eid| in_flow.contains(eid.as_str()))
        })
        .map(|(id, _, node)| {
            let mut n = viz_node(&ids, id, node);
            n.color = FLOW_HIGHLIGHT.to_string();
            n
        })
        .collect();

    let tools: Vec<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
    let pairs: Vec<(&str, &str)> = edges
        .iter()
        .map(|e| (e.source.as_str(), e.target.as_str()))
        .collect();
    let columns: Vec<Vec<String>> = compute_layers(&tools, &pairs)
        .into_iter()
        .map(|layer| layer.into_iter().map(str::to_string).collect())
        .collect();
    place_columns(&mut nodes, &columns);

    tracing::info!(
        tools = nodes.len(),
        flows = edges.len(),
        total_tools = graph.statistics().tool_nodes,
        "built flow view"
    );

    VizGraph {
        title: "API flows".to_string(),
        nodes,
        edges,
    }
}

/// Layer nodes by flow depth.
///
/// Layer 0 holds nodes without an incoming edge; each following layer holds
/// the not-yet-placed successors of the previous one. Nodes never reached
/// (cycles without an entry point) form one final layer. Every layer is
/// sorted.
pub fn compute_layers<'a>(nodes: &[&'a str], edges: &[(&'a str, &'a str)]) -> Vec<Vec<&'a str>> {
    let all: BTreeSet<&'a str> = nodes.iter().copied().collect();
    let mut successors: BTreeMap<&'a str, BTreeSet<&'a str>> = BTreeMap::new();
    let mut has_incoming: HashSet<&'a str> = HashSet::new();
    for &(source, target) in edges {
        if source == target || !all.contains(source) || !all.contains(target) {
            continue;
        }
        successors.entry(source).or_default().insert(target);
        has_incoming.insert(target);
    }

    let mut layers: Vec<Vec<&'a str>> = Vec::new();
    let mut visited: HashSet<&'a str> = HashSet::new();
    let mut current: VecDeque<&'a str> = all
        .iter()
        .copied()
        .filter(|n| !has_incoming.contains(n))
        .collect();

    while !current.is_empty() {
        let mut layer = Vec::new();
        let mut next = BTreeSet::new();
        for node in current.drain(..) {
            if !visited.insert(node) {
                continue;
            }
            layer.push(node);
            for &succ in successors.get(node).into_iter().flatten() {
                if !visited.contains(succ) {
                    next.insert(succ);
                }
            }
        }
        if !layer.is_empty() {
            layer.sort_unstable();
            layers.push(layer);
        }
        current.extend(next);
    }

    let rest: Vec<&'a str> = all.into_iter().filter(|n| !visited.contains(n)).collect();
    if !rest.is_empty() {
        layers.push(rest);
    }
    layers
}

fn ids_of_type(nodes: &[VizNode], node_type: &str) -> Vec<String> {
    let mut ids: Vec<String> = nodes
        .iter()
        .filter(|n| n.node_type == node_type)
        .map(|n| n.id.clone())
        .collect();
    ids.sort();
    ids
}

fn place_columns(nodes: &mut [VizNode], columns: &[Vec<String>]) {
    let mut position = std::collections::HashMap::new();
    for (col, ids) in columns.iter().enumerate() {
        let start_y = -((ids.len().saturating_sub(1)) as f64) * ROW_SPACING / 2.0;
        for (row, id) in ids.iter().enumerate() {
            position.insert(
                id.as_str(),
                (col as f64 * LAYER_SPACING, start_y + row as f64 * ROW_SPACING),
            );
        }
    }
    for node in nodes.iter_mut() {
        if let Some(&(x, y)) = position.get(node.id.as_str()) {
            node.x = x;
            node.y = y;
        }
    }
}

fn circular(nodes: &mut [VizNode]) {
    let n = nodes.len();
    if n == 0 {
        return;
    }
    let radius = (n as f64 * 12.0).max(300.0);
    for (i, node) in nodes.iter_mut().enumerate() {
        let angle = 2.0 * std::f64::consts::PI * i as f64 / n as f64;
        node.x = radius * angle.cos();
        node.y = radius * angle.sin();
    }
}

pub fn render_html(g: &VizGraph) -> Result<String> {
    // `</` is escaped so graph data cannot close the script tag.
    let json = serde_json::to_string(g)?.replace("</", "<\\/");

    let template = include_str!("../templates/graph_explorer.html");
    let html = template
        .replace("{{TITLE}}", &html_escape(&g.title))
        .replace("{{NODES_COUNT}}", &g.nodes.len().to_string())
        .replace("{{EDGES_COUNT}}", &g.edges.len().to_string())
        .replace("{{GRAPH_JSON}}", &json);
    Ok(html)
}

pub fn write_html(g: &VizGraph, path: &Path) -> Result<()> {
    let html = render_html(g)?;
    std::fs::write(path, html).with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), nodes = g.nodes.len(), edges = g.edges.len(), "wrote visualization");
    Ok(())
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use apigraph_core::{ApiRecord, FlowDetector, GraphBuilder};

    fn chain() -> ParameterGraph {
        let mut graph = GraphBuilder::new()
            .build_from_records(&[
                ApiRecord::new("login", "/login", "auth").with_output(r#"{"token": "t"}"#),
                ApiRecord::new("me", "/me", "auth")
                    .with_input(r#"{"token": "t"}"#)
                    .with_output(r#"{"user_id": 1}"#),
                ApiRecord::new("orders", "/orders", "shop").with_input(r#"{"user_id": 1}"#),
                ApiRecord::new("health", "/health", "ops"),
            ])
            .unwrap();
        let detector = FlowDetector::default();
        let flows = detector.detect_flows(&graph);
        detector.apply_flows(&mut graph, &flows);
        graph
    }

    #[test]
    fn layers_follow_flow_depth() {
        let layers = compute_layers(
            &["a", "b", "c", "d"],
            &[("a", "b"), ("b", "c"), ("a", "c")],
        );
        assert_eq!(layers, vec![vec!["a", "d"], vec!["b", "c"]]);
    }

    #[test]
    fn cycles_land_in_a_final_layer() {
        let layers = compute_layers(&["x", "y", "z"], &[("x", "y"), ("y", "x")]);
        assert_eq!(layers, vec![vec!["z"], vec!["x", "y"]]);
    }

    #[test]
    fn flow_view_keeps_only_connected_tools() {
        let view = flow_view(&chain());
        let ids: Vec<&str> = view.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["auth.login", "auth.me", "shop.orders"]);
        assert_eq!(view.edges.len(), 2);
        assert!(view.edges.iter().all(|e| e.edge_type == "potential_flow"));

        let x_of = |id: &str| view.nodes.iter().find(|n| n.id == id).map(|n| n.x).unwrap();
        assert!(x_of("auth.login") < x_of("auth.me"));
        assert!(x_of("auth.me") < x_of("shop.orders"));
    }

    #[test]
    fn full_view_has_everything() {
        let graph = chain();
        for layout in [VizLayout::Circular, VizLayout::Layered] {
            let view = full_view(&graph, layout);
            assert_eq!(view.nodes.len(), graph.node_count());
            assert_eq!(view.edges.len(), graph.edge_count());
        }
    }

    #[test]
    fn html_embeds_escaped_json() {
        let mut view = flow_view(&chain());
        view.nodes[0].title = "</script><b>".to_string();
        let html = render_html(&view).unwrap();
        assert!(html.contains("<\\/script>"));
        assert!(!html.contains("{{GRAPH_JSON}}"));
        assert!(html.contains("API flows"));
    }
}
