//! Optional enrichment with externally suggested flows.
//!
//! An enricher sees a summary of every tool and proposes extra flows. It is
//! best-effort: whatever it does (error, panic, nonsense), the graph only
//! ever gains `SemanticFlow` edges between tools it already has.

use crate::flow::resolve_pair;
use crate::graph::{Edge, EdgeKind, FlowAttrs, MatchType, ParameterGraph};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// What an enricher is told about one tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSummary {
    pub tool_id: String,
    pub tool_name: String,
    pub source_system: String,
    pub endpoint: String,
    pub input_keys: Vec<String>,
    pub output_keys: Vec<String>,
}

/// A flow proposed by an enricher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticMatch {
    pub source_tool: String,
    pub target_tool: String,
    pub output_param: String,
    pub input_param: String,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

impl SemanticMatch {
    pub fn matching_param(&self) -> String {
        format!("{}~{}", self.output_param, self.input_param)
    }
}

pub trait FlowEnricher {
    /// Short label for logs.
    fn name(&self) -> &str;

    fn suggest(&self, tools: &[ToolSummary]) -> anyhow::Result<Vec<SemanticMatch>>;
}

/// Summaries of every tool, ordered by tool id.
pub fn tool_summaries(graph: &ParameterGraph) -> Vec<ToolSummary> {
    graph
        .tool_ids()
        .into_iter()
        .filter_map(|id| graph.node(id)?.as_tool())
        .map(|tool| ToolSummary {
            tool_id: tool.tool_id(),
            tool_name: tool.tool_name.clone(),
            source_system: tool.source_system.clone(),
            endpoint: tool.endpoint.clone(),
            input_keys: tool.input_keys.clone(),
            output_keys: tool.output_keys.clone(),
        })
        .collect()
}

/// Run `enricher` and apply its suggestions. Returns the number of edges
/// added; any failure inside the enricher yields zero.
pub fn enrich_graph(graph: &mut ParameterGraph, enricher: &dyn FlowEnricher) -> usize {
    let tools = tool_summaries(graph);
    if tools.len() < 2 {
        tracing::debug!(enricher = enricher.name(), "fewer than two tools; nothing to enrich");
        return 0;
    }

    let outcome = catch_unwind(AssertUnwindSafe(|| enricher.suggest(&tools)));
    let matches = match outcome {
        Ok(Ok(matches)) => matches,
        Ok(Err(err)) => {
            tracing::warn!(enricher = enricher.name(), error = %err, "enrichment failed");
            return 0;
        }
        Err(_) => {
            tracing::warn!(enricher = enricher.name(), "enrichment panicked");
            return 0;
        }
    };

    tracing::info!(
        enricher = enricher.name(),
        suggested = matches.len(),
        "enricher returned suggestions"
    );
    apply_semantic_matches(graph, &matches)
}

/// Insert a `SemanticFlow` edge per match. Returns how many were added.
pub fn apply_semantic_matches(graph: &mut ParameterGraph, matches: &[SemanticMatch]) -> usize {
    let mut added = 0;
    for m in matches {
        let Some((source, target)) = resolve_pair(graph, &m.source_tool, &m.target_tool) else {
            tracing::warn!(
                source = %m.source_tool,
                target = %m.target_tool,
                "semantic match names an unknown tool; skipped"
            );
            continue;
        };
        if !m.confidence.is_finite() {
            tracing::warn!(
                source = %m.source_tool,
                target = %m.target_tool,
                "semantic match confidence is not a number; skipped"
            );
            continue;
        }

        let edge = Edge::SemanticFlow {
            flow: FlowAttrs {
                matching_param: m.matching_param(),
                confidence: m.confidence.clamp(0.0, 1.0),
                match_type: MatchType::Semantic,
            },
            reasoning: m.reasoning.clone(),
        };
        if graph.add_edge(source, target, edge).is_some() {
            added += 1;
        }
    }

    tracing::info!(
        added,
        total = graph.edge_kind_count(EdgeKind::SemanticFlow),
        "applied semantic flows"
    );
    added
}
