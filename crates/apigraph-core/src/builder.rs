//! Graph construction from API records.
//!
//! The builder owns the graph under construction together with the
//! name -> node index used to deduplicate parameters across every tool.

use crate::graph::{Edge, NodeId, ParamKind, ParameterGraph, ParameterNode, ToolNode};
use crate::record::ApiRecord;
use apigraph_ingest_json::extract_keys;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("required field `{field}` is empty")]
    EmptyField { field: &'static str },

    #[error("record {index}: required field `{field}` is empty")]
    InvalidRecord { index: usize, field: &'static str },
}

/// Direction of a structural tool -> parameter edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    pub fn param_kind(self) -> ParamKind {
        match self {
            Direction::Input => ParamKind::Input,
            Direction::Output => ParamKind::Output,
        }
    }

    fn edge(self) -> Edge {
        match self {
            Direction::Input => Edge::RequiresInput,
            Direction::Output => Edge::ProducesOutput,
        }
    }
}

/// Everything about a tool except its identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub endpoint: String,
    pub status_code: Option<i64>,
    pub success: Option<bool>,
    pub curl_command: Option<String>,
    pub timestamp: Option<String>,
    pub input_keys: Vec<String>,
    pub output_keys: Vec<String>,
}

/// A parameter name seen with the kind opposite to the one it was created
/// with. The existing kind is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindConflict {
    pub name: String,
    pub kept: ParamKind,
    pub observed: ParamKind,
}

/// Parameter name -> (node, kind at creation).
#[derive(Debug, Default)]
struct ParamIndex {
    by_name: HashMap<String, (NodeId, ParamKind)>,
    conflicts: Vec<KindConflict>,
    conflicted: HashSet<String>,
}

impl ParamIndex {
    fn lookup(&mut self, name: &str, kind: ParamKind) -> Option<NodeId> {
        let &(id, kept) = self.by_name.get(name)?;
        if kept != kind && self.conflicted.insert(name.to_string()) {
            tracing::debug!(
                param = name,
                kept = %kept,
                observed = %kind,
                "parameter seen with both kinds; keeping the first"
            );
            self.conflicts.push(KindConflict {
                name: name.to_string(),
                kept,
                observed: kind,
            });
        }
        Some(id)
    }
}

#[derive(Debug, Default)]
pub struct GraphBuilder {
    graph: ParameterGraph,
    params: ParamIndex,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert the tool `{source_system}.{tool_name}`, overwriting the
    /// attributes of an earlier tool with the same identifier.
    pub fn add_tool_node(
        &mut self,
        tool_name: &str,
        source_system: &str,
        metadata: ToolMetadata,
    ) -> Result<NodeId, BuildError> {
        if tool_name.trim().is_empty() {
            return Err(BuildError::EmptyField { field: "tool_name" });
        }
        if source_system.trim().is_empty() {
            return Err(BuildError::EmptyField {
                field: "source_system",
            });
        }

        let id = self.graph.upsert_tool(ToolNode {
            tool_name: tool_name.to_string(),
            source_system: source_system.to_string(),
            endpoint: metadata.endpoint,
            status_code: metadata.status_code,
            success: metadata.success,
            curl_command: metadata.curl_command,
            timestamp: metadata.timestamp,
            input_keys: metadata.input_keys,
            output_keys: metadata.output_keys,
        });
        tracing::debug!(source_system, tool_name, "added tool node");
        Ok(id)
    }

    /// Return the node for `name`, creating it with `kind` if absent.
    ///
    /// The kind of an existing node is never changed; a mismatch is recorded
    /// in [`GraphBuilder::kind_conflicts`].
    pub fn add_parameter_node(&mut self, name: &str, kind: ParamKind) -> NodeId {
        if let Some(id) = self.params.lookup(name, kind) {
            return id;
        }
        let id = self.graph.add_parameter(ParameterNode {
            name: name.to_string(),
            kind,
        });
        self.params.by_name.insert(name.to_string(), (id, kind));
        id
    }

    /// Link a tool to a parameter. Returns `false` if the edge already existed.
    pub fn add_edge(&mut self, tool: NodeId, param: NodeId, direction: Direction) -> bool {
        self.graph.add_edge(tool, param, direction.edge()).is_some()
    }

    /// Add every record to the graph under construction.
    ///
    /// Stops at the first record with a blank tool name or source system.
    /// Records before it stay in the graph.
    pub fn add_records(&mut self, records: &[ApiRecord]) -> Result<(), BuildError> {
        for (index, record) in records.iter().enumerate() {
            if let Some(field) = record.missing_field() {
                return Err(BuildError::InvalidRecord { index, field });
            }
            self.add_record(record)?;
        }
        Ok(())
    }

    fn add_record(&mut self, record: &ApiRecord) -> Result<NodeId, BuildError> {
        let input_keys = extract_keys(&record.input_payload);
        let output_keys = extract_keys(&record.output_response);

        let tool = self.add_tool_node(
            &record.tool_name,
            &record.source_system,
            ToolMetadata {
                endpoint: record.api_endpoint.clone(),
                status_code: record.status_code,
                success: record.success,
                curl_command: record.curl_command.clone(),
                timestamp: record.timestamp.clone(),
                input_keys: input_keys.clone(),
                output_keys: output_keys.clone(),
            },
        )?;

        for (keys, direction) in [(input_keys, Direction::Input), (output_keys, Direction::Output)] {
            for key in keys {
                let param = self.add_parameter_node(&key, direction.param_kind());
                self.add_edge(tool, param, direction);
            }
        }
        Ok(tool)
    }

    /// Build a graph from `records` in one step.
    pub fn build_from_records(mut self, records: &[ApiRecord]) -> Result<ParameterGraph, BuildError> {
        self.add_records(records)?;
        let stats = self.graph.statistics();
        tracing::info!(
            records = records.len(),
            nodes = stats.total_nodes,
            edges = stats.total_edges,
            tools = stats.tool_nodes,
            parameters = stats.parameter_nodes,
            "built parameter graph"
        );
        Ok(self.finish())
    }

    pub fn graph(&self) -> &ParameterGraph {
        &self.graph
    }

    /// Parameter names observed with both kinds, in first-seen order.
    pub fn kind_conflicts(&self) -> &[KindConflict] {
        &self.params.conflicts
    }

    pub fn finish(self) -> ParameterGraph {
        self.graph
    }
}
