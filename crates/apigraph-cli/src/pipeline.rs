//! Records → graph → flows → optional semantic enrichment.

use anyhow::{Context, Result};
use apigraph_core::{
    enrich_graph, ApiRecord, DetectedFlow, FlowConfig, FlowDetector, FlowEnricher, GraphBuilder,
    KindConflict, ParameterGraph,
};

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub detect_flows: bool,
    pub flow: FlowConfig,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub records: usize,
    pub detected_flows: Vec<DetectedFlow>,
    pub flow_edges_added: usize,
    pub semantic_edges_added: usize,
    pub kind_conflicts: Vec<KindConflict>,
}

/// Build the graph and, when asked, add detected and semantic flow edges.
///
/// Semantic enrichment runs after detection and never fails the pipeline.
pub fn run_pipeline(
    records: &[ApiRecord],
    options: &PipelineOptions,
    enricher: Option<&dyn FlowEnricher>,
) -> Result<(ParameterGraph, PipelineReport)> {
    let mut builder = GraphBuilder::new();
    builder
        .add_records(records)
        .context("failed to build graph from records")?;

    let mut report = PipelineReport {
        records: records.len(),
        kind_conflicts: builder.kind_conflicts().to_vec(),
        ..PipelineReport::default()
    };
    for conflict in &report.kind_conflicts {
        tracing::warn!(
            param = %conflict.name,
            kept = %conflict.kept,
            observed = %conflict.observed,
            "parameter seen with both kinds; keeping the first"
        );
    }
    let mut graph = builder.finish();

    if options.detect_flows {
        let detector = FlowDetector::new(options.flow);
        report.detected_flows = detector.detect_flows(&graph);
        report.flow_edges_added = detector.apply_flows(&mut graph, &report.detected_flows);
    }

    if let Some(enricher) = enricher {
        report.semantic_edges_added = enrich_graph(&mut graph, enricher);
    }

    tracing::info!(
        records = report.records,
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        flows = report.flow_edges_added,
        semantic = report.semantic_edges_added,
        "pipeline finished"
    );
    Ok((graph, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use apigraph_core::{EdgeKind, SemanticMatch, ToolSummary};

    fn records() -> Vec<ApiRecord> {
        vec![
            ApiRecord::new("create", "/orders", "shop").with_output(r#"{"order_id": 1}"#),
            ApiRecord::new("ship", "/ship", "logistics").with_input(r#"{"order_id": 1}"#),
        ]
    }

    struct OneMatch;

    impl FlowEnricher for OneMatch {
        fn name(&self) -> &str {
            "one"
        }

        fn suggest(&self, _tools: &[ToolSummary]) -> anyhow::Result<Vec<SemanticMatch>> {
            Ok(vec![SemanticMatch {
                source_tool: "shop.create".to_string(),
                target_tool: "logistics.ship".to_string(),
                output_param: "order_id".to_string(),
                input_param: "order_id".to_string(),
                confidence: 0.9,
                reasoning: "same order".to_string(),
            }])
        }
    }

    #[test]
    fn builds_without_flows_by_default() {
        let (graph, report) = run_pipeline(&records(), &PipelineOptions::default(), None).unwrap();
        assert_eq!(report.records, 2);
        assert!(report.detected_flows.is_empty());
        assert_eq!(graph.edge_kind_count(EdgeKind::PotentialFlow), 0);
    }

    #[test]
    fn detects_and_enriches() {
        let options = PipelineOptions {
            detect_flows: true,
            ..PipelineOptions::default()
        };
        let (graph, report) = run_pipeline(&records(), &options, Some(&OneMatch)).unwrap();
        assert_eq!(report.detected_flows.len(), 1);
        assert_eq!(report.flow_edges_added, 1);
        assert_eq!(report.semantic_edges_added, 1);
        assert_eq!(graph.statistics().flow_connections, 2);
    }

    #[test]
    fn invalid_record_fails_the_pipeline() {
        let mut bad = records();
        bad.push(ApiRecord::new("", "/x", "shop"));
        assert!(run_pipeline(&bad, &PipelineOptions::default(), None).is_err());
    }
}
