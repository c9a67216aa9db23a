use apigraph_core::*;
use approx::assert_relative_eq;

fn crm_records() -> Vec<ApiRecord> {
    vec![
        ApiRecord::new("get_user", "/users/{id}", "crm")
            .with_input(r#"{"user_id": 42}"#)
            .with_output(r#"{"email": "a@example.com", "name": "Ada"}"#)
            .with_status(200, true),
        ApiRecord::new("send_mail", "/mail", "notify")
            .with_input(r#"{"email": "a@example.com", "subject": "hi"}"#)
            .with_output(r#"{"message_id": "m-1"}"#),
    ]
}

#[test]
fn exact_flow_is_directional() {
    let graph = GraphBuilder::new().build_from_records(&crm_records()).unwrap();
    let flows = FlowDetector::default().detect_flows(&graph);

    assert_eq!(
        flows,
        vec![DetectedFlow {
            source_tool: "crm.get_user".to_string(),
            target_tool: "notify.send_mail".to_string(),
            matching_param: "email".to_string(),
            confidence: 1.0,
            match_type: MatchType::Exact,
        }]
    );
}

#[test]
fn reverse_flow_needs_its_own_match() {
    let mut records = crm_records();
    records.push(
        ApiRecord::new("get_user", "/users/{id}", "crm")
            .with_input(r#"{"user_id": 42, "message_id": "m-1"}"#)
            .with_output(r#"{"email": "a@example.com"}"#),
    );
    let graph = GraphBuilder::new().build_from_records(&records).unwrap();
    let flows = FlowDetector::default().detect_flows(&graph);

    let pairs: Vec<(&str, &str, &str)> = flows
        .iter()
        .map(|f| {
            (
                f.source_tool.as_str(),
                f.target_tool.as_str(),
                f.matching_param.as_str(),
            )
        })
        .collect();
    assert_eq!(
        pairs,
        vec![
            ("crm.get_user", "notify.send_mail", "email"),
            ("notify.send_mail", "crm.get_user", "message_id"),
        ]
    );
}

#[test]
fn exact_match_ignores_surrounding_whitespace() {
    let records = vec![
        ApiRecord::new("lookup", "/lookup", "crm").with_output(r#"{" email": "a@example.com"}"#),
        ApiRecord::new("send", "/send", "mail").with_input(r#"{"email": "a@example.com"}"#),
    ];
    let graph = GraphBuilder::new().build_from_records(&records).unwrap();
    assert!(graph.parameter(" email").is_some());

    let expected = vec![DetectedFlow {
        source_tool: "crm.lookup".to_string(),
        target_tool: "mail.send".to_string(),
        matching_param: "email".to_string(),
        confidence: 1.0,
        match_type: MatchType::Exact,
    }];
    assert_eq!(FlowDetector::default().detect_flows(&graph), expected);

    // The trimmed names are already matched, so fuzzy mode adds nothing.
    let fuzzy = FlowDetector::new(FlowConfig::new(true, 0.5).unwrap());
    assert_eq!(fuzzy.detect_flows(&graph), expected);
}

#[test]
fn fuzzy_matching_finds_near_misses() {
    let records = vec![
        ApiRecord::new("create_user", "/users", "crm").with_output(r#"{"user_id": 1}"#),
        ApiRecord::new("get_orders", "/orders", "shop").with_input(r#"{"userId": 1}"#),
    ];
    let graph = GraphBuilder::new().build_from_records(&records).unwrap();

    assert!(FlowDetector::default().detect_flows(&graph).is_empty());

    let detector = FlowDetector::new(FlowConfig::new(true, 0.8).unwrap());
    let flows = detector.detect_flows(&graph);
    assert_eq!(flows.len(), 1);
    assert_eq!(flows[0].matching_param, "user_id~userId");
    assert_eq!(flows[0].match_type, MatchType::Fuzzy);
    assert_relative_eq!(flows[0].confidence, 1.0);
}

#[test]
fn parameterless_tools_take_part_but_never_match() {
    let records = vec![
        ApiRecord::new("health", "/health", "ops"),
        ApiRecord::new("ping", "/ping", "ops").with_input("null"),
    ];
    let graph = GraphBuilder::new().build_from_records(&records).unwrap();
    assert_eq!(graph.statistics().tool_nodes, 2);
    assert!(FlowDetector::default().detect_flows(&graph).is_empty());
}

#[test]
fn only_apply_mutates_the_graph() {
    let mut graph = GraphBuilder::new().build_from_records(&crm_records()).unwrap();
    let detector = FlowDetector::default();
    let before = graph.edge_count();

    let flows = detector.detect_flows(&graph);
    assert_eq!(graph.edge_count(), before);

    assert_eq!(detector.apply_flows(&mut graph, &flows), 1);
    assert_eq!(graph.edge_count(), before + 1);

    let flow_edges = graph.edges_of_kind(EdgeKind::PotentialFlow);
    assert_eq!(flow_edges.len(), 1);
    let edge = flow_edges[0];
    assert_eq!(graph.key(edge.source).map(NodeKey::as_str), Some("crm.get_user"));
    assert_eq!(graph.key(edge.target).map(NodeKey::as_str), Some("notify.send_mail"));
    assert_eq!(edge.edge.flow().map(|f| f.matching_param.as_str()), Some("email"));
}

#[test]
fn apply_skips_unknown_tools() {
    let mut graph = GraphBuilder::new().build_from_records(&crm_records()).unwrap();
    let before = graph.edge_count();
    let bogus = DetectedFlow {
        source_tool: "crm.get_user".to_string(),
        target_tool: "nowhere.tool".to_string(),
        matching_param: "email".to_string(),
        confidence: 1.0,
        match_type: MatchType::Exact,
    };
    assert_eq!(FlowDetector::default().apply_flows(&mut graph, &[bogus]), 0);
    assert_eq!(graph.edge_count(), before);
    assert!(graph.tool("nowhere.tool").is_none());
}

#[test]
fn statistics_count_every_kind() {
    let mut graph = GraphBuilder::new().build_from_records(&crm_records()).unwrap();
    let detector = FlowDetector::default();
    let flows = detector.detect_flows(&graph);
    detector.apply_flows(&mut graph, &flows);

    let stats = graph.statistics();
    // Parameters: user_id, email, name, subject, message_id.
    assert_eq!(stats.tool_nodes, 2);
    assert_eq!(stats.parameter_nodes, 5);
    assert_eq!(stats.input_parameters, 2);
    assert_eq!(stats.output_parameters, 3);
    assert_eq!(stats.requires_input_edges, 3);
    assert_eq!(stats.produces_output_edges, 3);
    assert_eq!(stats.potential_flow_edges, 1);
    assert_eq!(stats.flow_connections, 1);
    assert_eq!(stats.total_edges, 7);
    assert_relative_eq!(stats.density, 7.0 / (7.0 * 6.0));
}

#[test]
fn nodes_and_edges_enumerate_everything() {
    let graph = GraphBuilder::new().build_from_records(&crm_records()).unwrap();
    assert_eq!(graph.nodes().count(), graph.node_count());
    assert_eq!(graph.edges().count(), graph.edge_count());

    let labels: Vec<&str> = graph.nodes().map(|(_, _, node)| node.type_label()).collect();
    assert_eq!(labels.iter().filter(|l| **l == "tool").count(), 2);
}

// ============================================================================
// Enrichment
// ============================================================================

struct FixedEnricher(Vec<SemanticMatch>);

impl FlowEnricher for FixedEnricher {
    fn name(&self) -> &str {
        "fixed"
    }

    fn suggest(&self, _tools: &[ToolSummary]) -> anyhow::Result<Vec<SemanticMatch>> {
        Ok(self.0.clone())
    }
}

struct FailingEnricher;

impl FlowEnricher for FailingEnricher {
    fn name(&self) -> &str {
        "failing"
    }

    fn suggest(&self, _tools: &[ToolSummary]) -> anyhow::Result<Vec<SemanticMatch>> {
        anyhow::bail!("network unreachable")
    }
}

struct PanickingEnricher;

impl FlowEnricher for PanickingEnricher {
    fn name(&self) -> &str {
        "panicking"
    }

    fn suggest(&self, _tools: &[ToolSummary]) -> anyhow::Result<Vec<SemanticMatch>> {
        panic!("enricher bug")
    }
}

fn semantic(source: &str, target: &str, confidence: f64) -> SemanticMatch {
    SemanticMatch {
        source_tool: source.to_string(),
        target_tool: target.to_string(),
        output_param: "name".to_string(),
        input_param: "subject".to_string(),
        confidence,
        reasoning: "greeting uses the user's name".to_string(),
    }
}

#[test]
fn summaries_follow_tool_order() {
    let graph = GraphBuilder::new().build_from_records(&crm_records()).unwrap();
    let summaries = tool_summaries(&graph);
    let ids: Vec<&str> = summaries.iter().map(|s| s.tool_id.as_str()).collect();
    assert_eq!(ids, vec!["crm.get_user", "notify.send_mail"]);
    assert_eq!(summaries[0].output_keys, vec!["email", "name"]);
}

#[test]
fn enricher_adds_semantic_edges() {
    let mut graph = GraphBuilder::new().build_from_records(&crm_records()).unwrap();
    let enricher = FixedEnricher(vec![
        semantic("crm.get_user", "notify.send_mail", 1.7),
        semantic("crm.get_user", "ghost.tool", 0.9),
        semantic("crm.get_user", "notify.send_mail", f64::NAN),
    ]);

    assert_eq!(enrich_graph(&mut graph, &enricher), 1);
    let edges = graph.edges_of_kind(EdgeKind::SemanticFlow);
    assert_eq!(edges.len(), 1);

    let flow = edges[0].edge.flow().unwrap();
    assert_eq!(flow.matching_param, "name~subject");
    assert_eq!(flow.match_type, MatchType::Semantic);
    assert_relative_eq!(flow.confidence, 1.0);
    assert_eq!(edges[0].edge.reasoning(), Some("greeting uses the user's name"));
}

#[test]
fn failing_enricher_leaves_graph_untouched() {
    let mut graph = GraphBuilder::new().build_from_records(&crm_records()).unwrap();
    let before = graph.edge_count();

    assert_eq!(enrich_graph(&mut graph, &FailingEnricher), 0);
    assert_eq!(enrich_graph(&mut graph, &PanickingEnricher), 0);
    assert_eq!(graph.edge_count(), before);
}

#[test]
fn semantic_and_potential_flows_coexist() {
    let mut graph = GraphBuilder::new().build_from_records(&crm_records()).unwrap();
    let detector = FlowDetector::default();
    let flows = detector.detect_flows(&graph);
    detector.apply_flows(&mut graph, &flows);

    let mut email = semantic("crm.get_user", "notify.send_mail", 0.9);
    email.output_param = "email".to_string();
    email.input_param = "email".to_string();
    assert_eq!(apply_semantic_matches(&mut graph, &[email]), 1);

    let stats = graph.statistics();
    assert_eq!(stats.potential_flow_edges, 1);
    assert_eq!(stats.semantic_flow_edges, 1);
    assert_eq!(stats.flow_connections, 2);
}
