//! APIGraph core: tool/parameter graphs and data-flow detection.
//!
//! Pipeline:
//! 1. [`GraphBuilder`] turns [`ApiRecord`]s into a [`ParameterGraph`], one
//!    tool node per `{source_system}.{tool_name}` and one parameter node per
//!    distinct payload key.
//! 2. [`FlowDetector::detect_flows`] proposes tool -> tool flows where an
//!    output name of one tool matches an input name of another.
//! 3. [`FlowDetector::apply_flows`] writes them back as `PotentialFlow` edges.
//! 4. Optionally, a [`FlowEnricher`] contributes `SemanticFlow` edges through
//!    [`enrich_graph`].
//!
//! Everything here is synchronous and in-memory.

pub mod builder;
pub mod enrich;
pub mod flow;
pub mod graph;
pub mod record;

pub use builder::{BuildError, Direction, GraphBuilder, KindConflict, ToolMetadata};
pub use enrich::{
    apply_semantic_matches, enrich_graph, tool_summaries, FlowEnricher, SemanticMatch, ToolSummary,
};
pub use flow::{
    name_similarity, normalize_param_name, DetectedFlow, FlowConfig, FlowConfigError, FlowDetector,
    ParamMatch, DEFAULT_FUZZY_THRESHOLD,
};
pub use graph::{
    tool_id, Edge, EdgeKind, EdgeRecord, FlowAttrs, GraphStatistics, MatchType, Node, NodeId,
    NodeKey, ParamKind, ParameterGraph, ParameterNode, ToolNode,
};
pub use record::ApiRecord;
