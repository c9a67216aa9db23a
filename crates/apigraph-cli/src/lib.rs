//! Library half of the `apigraph` binary.
//!
//! The binary parses flags and prints; everything it does to a graph lives
//! here so the workspace integration tests can drive the same pipeline.

pub mod export;
pub mod pipeline;
pub mod viz;

pub use export::{export_graph, render, ExportError, ExportFormat};
pub use pipeline::{run_pipeline, PipelineOptions, PipelineReport};
pub use viz::{flow_view, full_view, render_html, write_html, VizGraph, VizLayout};
