//! Data-flow detection between tools.
//!
//! A flow `A -> B` is proposed when a parameter produced by `A` matches a
//! parameter required by `B`. Detection only reads the graph; applying the
//! result is a separate step so a dry run is always possible.
//!
//! Cost is quadratic in the number of tools (every ordered pair is checked),
//! and the fuzzy phase is quadratic again in the leftover names of each pair.

use crate::graph::{Edge, EdgeKind, FlowAttrs, MatchType, NodeId, NodeKey, ParameterGraph};
use serde::{Deserialize, Serialize};
use similar::{DiffTag, TextDiff};
use std::collections::BTreeSet;
use thiserror::Error;

pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.8;

#[derive(Debug, Error, PartialEq)]
pub enum FlowConfigError {
    #[error("fuzzy threshold must be within [0, 1], got {0}")]
    ThresholdOutOfRange(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub fuzzy_enabled: bool,
    pub fuzzy_threshold: f64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            fuzzy_enabled: false,
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
        }
    }
}

impl FlowConfig {
    pub fn new(fuzzy_enabled: bool, fuzzy_threshold: f64) -> Result<Self, FlowConfigError> {
        if !(0.0..=1.0).contains(&fuzzy_threshold) {
            return Err(FlowConfigError::ThresholdOutOfRange(fuzzy_threshold));
        }
        Ok(Self {
            fuzzy_enabled,
            fuzzy_threshold,
        })
    }
}

/// A candidate flow between two tools, identified by tool id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFlow {
    pub source_tool: String,
    pub target_tool: String,
    pub matching_param: String,
    pub confidence: f64,
    pub match_type: MatchType,
}

/// One matched parameter pair within a single tool pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamMatch {
    pub matching_param: String,
    pub confidence: f64,
    pub match_type: MatchType,
}

/// Lowercase and drop `_` / `-`, so `user_id`, `user-id` and `userId` agree.
pub fn normalize_param_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Similarity ratio in [0, 1] of two parameter names after normalization.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_param_name(a);
    let b = normalize_param_name(b);
    let total = a.chars().count() + b.chars().count();
    if total == 0 {
        return 1.0;
    }
    // 2·M / T over matched characters, kept in f64 end to end.
    let matched: usize = TextDiff::from_chars(a.as_str(), b.as_str())
        .ops()
        .iter()
        .filter(|op| op.tag() == DiffTag::Equal)
        .map(|op| op.new_range().len())
        .sum();
    (2 * matched) as f64 / total as f64
}

#[derive(Debug, Clone, Default)]
pub struct FlowDetector {
    config: FlowConfig,
}

struct ToolParams<'g> {
    id: &'g str,
    outputs: BTreeSet<&'g str>,
    inputs: BTreeSet<&'g str>,
}

impl FlowDetector {
    /// A threshold outside [0, 1] is clamped; use [`FlowConfig::new`] to
    /// reject it instead.
    pub fn new(config: FlowConfig) -> Self {
        let threshold = if config.fuzzy_threshold.is_nan() {
            DEFAULT_FUZZY_THRESHOLD
        } else {
            config.fuzzy_threshold.clamp(0.0, 1.0)
        };
        Self {
            config: FlowConfig {
                fuzzy_threshold: threshold,
                ..config
            },
        }
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    /// All candidate flows, ordered by source id, then target id, then match.
    ///
    /// Never mutates the graph.
    pub fn detect_flows(&self, graph: &ParameterGraph) -> Vec<DetectedFlow> {
        let tools: Vec<ToolParams<'_>> = graph
            .tool_ids()
            .into_iter()
            .filter_map(|id| {
                let key = graph.key(id)?;
                Some(ToolParams {
                    id: key.as_str(),
                    outputs: trimmed(graph.output_params(id)),
                    inputs: trimmed(graph.input_params(id)),
                })
            })
            .collect();

        let mut flows = Vec::new();
        for source in &tools {
            if source.outputs.is_empty() {
                continue;
            }
            for target in &tools {
                if source.id == target.id || target.inputs.is_empty() {
                    continue;
                }
                for m in self.find_matching_params(&source.outputs, &target.inputs) {
                    flows.push(DetectedFlow {
                        source_tool: source.id.to_string(),
                        target_tool: target.id.to_string(),
                        matching_param: m.matching_param,
                        confidence: m.confidence,
                        match_type: m.match_type,
                    });
                }
            }
        }

        tracing::info!(
            tools = tools.len(),
            flows = flows.len(),
            fuzzy = self.config.fuzzy_enabled,
            "flow detection finished"
        );
        flows
    }

    /// Match one tool's outputs against another tool's inputs.
    ///
    /// Exact matches come first. The fuzzy phase, when enabled, only sees
    /// names that did not match exactly.
    pub fn find_matching_params(
        &self,
        outputs: &BTreeSet<&str>,
        inputs: &BTreeSet<&str>,
    ) -> Vec<ParamMatch> {
        let mut matches: Vec<ParamMatch> = outputs
            .intersection(inputs)
            .map(|name| ParamMatch {
                matching_param: (*name).to_string(),
                confidence: 1.0,
                match_type: MatchType::Exact,
            })
            .collect();

        if !self.config.fuzzy_enabled {
            return matches;
        }

        let remaining_inputs: Vec<&str> = inputs.difference(outputs).copied().collect();
        for output in outputs.difference(inputs) {
            for input in &remaining_inputs {
                let ratio = name_similarity(output, input);
                if ratio >= self.config.fuzzy_threshold {
                    matches.push(ParamMatch {
                        matching_param: format!("{output}~{input}"),
                        confidence: ratio,
                        match_type: MatchType::Fuzzy,
                    });
                }
            }
        }
        matches
    }

    /// Insert one `PotentialFlow` edge per candidate. Returns how many edges
    /// were added.
    ///
    /// Candidates naming an unknown tool, or carrying a non-finite
    /// confidence, are skipped. Re-applying the same candidates adds nothing.
    pub fn apply_flows(&self, graph: &mut ParameterGraph, flows: &[DetectedFlow]) -> usize {
        let mut added = 0;
        for flow in flows {
            let Some((source, target)) = resolve_pair(graph, &flow.source_tool, &flow.target_tool)
            else {
                tracing::warn!(
                    source = %flow.source_tool,
                    target = %flow.target_tool,
                    "flow names an unknown tool; skipped"
                );
                continue;
            };
            if !flow.confidence.is_finite() {
                tracing::warn!(
                    source = %flow.source_tool,
                    target = %flow.target_tool,
                    "flow confidence is not a number; skipped"
                );
                continue;
            }

            let edge = Edge::PotentialFlow(FlowAttrs {
                matching_param: flow.matching_param.clone(),
                confidence: flow.confidence.clamp(0.0, 1.0),
                match_type: flow.match_type,
            });
            if graph.add_edge(source, target, edge).is_some() {
                added += 1;
            }
        }

        tracing::info!(
            added,
            total = graph.edge_kind_count(EdgeKind::PotentialFlow),
            "applied potential flows"
        );
        added
    }
}

/// Resolve a pair of tool ids to node handles.
pub(crate) fn resolve_pair(
    graph: &ParameterGraph,
    source_tool: &str,
    target_tool: &str,
) -> Option<(NodeId, NodeId)> {
    let source = graph.id_of(&NodeKey::Tool(source_tool.to_string()))?;
    let target = graph.id_of(&NodeKey::Tool(target_tool.to_string()))?;
    Some((source, target))
}

fn trimmed(names: BTreeSet<&str>) -> BTreeSet<&str> {
    names.into_iter().map(str::trim).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn set<'a>(names: &[&'a str]) -> BTreeSet<&'a str> {
        names.iter().copied().collect()
    }

    #[test]
    fn config_rejects_out_of_range_threshold() {
        assert!(FlowConfig::new(true, 0.5).is_ok());
        assert!(FlowConfig::new(true, 0.0).is_ok());
        assert!(FlowConfig::new(true, 1.0).is_ok());
        assert_eq!(
            FlowConfig::new(true, 1.5),
            Err(FlowConfigError::ThresholdOutOfRange(1.5))
        );
        assert!(FlowConfig::new(true, f64::NAN).is_err());
    }

    #[test]
    fn detector_clamps_threshold() {
        let detector = FlowDetector::new(FlowConfig {
            fuzzy_enabled: true,
            fuzzy_threshold: 3.0,
        });
        assert_relative_eq!(detector.config().fuzzy_threshold, 1.0);
    }

    #[test]
    fn normalization_ignores_case_and_separators() {
        assert_eq!(normalize_param_name("User_ID"), "userid");
        assert_eq!(normalize_param_name("user-id"), "userid");
        assert_relative_eq!(name_similarity("user_id", "userId"), 1.0);
        assert!(name_similarity("email", "zipcode") < 0.5);
    }

    #[test]
    fn exact_matches_only_when_fuzzy_disabled() {
        let detector = FlowDetector::default();
        let matches = detector.find_matching_params(
            &set(&["email", "user_id"]),
            &set(&["email", "userId"]),
        );
        assert_eq!(
            matches,
            vec![ParamMatch {
                matching_param: "email".to_string(),
                confidence: 1.0,
                match_type: MatchType::Exact,
            }]
        );
    }

    #[test]
    fn fuzzy_phase_skips_exact_names() {
        let detector = FlowDetector::new(FlowConfig {
            fuzzy_enabled: true,
            fuzzy_threshold: 0.8,
        });
        let matches = detector.find_matching_params(
            &set(&["email", "user_id"]),
            &set(&["email", "userId"]),
        );
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].match_type, MatchType::Exact);
        assert_eq!(matches[1].matching_param, "user_id~userId");
        assert_eq!(matches[1].match_type, MatchType::Fuzzy);
        assert_relative_eq!(matches[1].confidence, 1.0);
    }

    #[test]
    fn zero_threshold_matches_every_leftover_pair() {
        let detector = FlowDetector::new(FlowConfig {
            fuzzy_enabled: true,
            fuzzy_threshold: 0.0,
        });
        let matches = detector.find_matching_params(&set(&["a", "b"]), &set(&["x", "y"]));
        let params: Vec<&str> = matches.iter().map(|m| m.matching_param.as_str()).collect();
        assert_eq!(params, vec!["a~x", "a~y", "b~x", "b~y"]);
    }

    #[test]
    fn empty_graph_has_no_flows() {
        let graph = ParameterGraph::new();
        assert!(FlowDetector::default().detect_flows(&graph).is_empty());
    }
}
