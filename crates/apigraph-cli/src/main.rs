//! APIGraph CLI
//!
//! Turns CSV API documentation into a tool/parameter graph:
//! - `build`: graph, optional flow detection and semantic matching, export, HTML view
//! - `flows`: dry-run flow detection
//! - `stats`: graph statistics

use anyhow::{bail, Result};
use apigraph_cli::{
    export_graph, run_pipeline, write_html, ExportFormat, PipelineOptions, VizLayout,
};
use apigraph_core::{ApiRecord, FlowConfig, FlowDetector, FlowEnricher, GraphBuilder, GraphStatistics};
use apigraph_semantic::LlmSemanticMatcher;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "apigraph")]
#[command(
    author,
    version,
    about = "APIGraph: turn CSV API documentation into a tool/parameter graph"
)]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the graph and export it.
    Build(BuildArgs),

    /// Detect flows without writing anything.
    Flows {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        fuzzy: FuzzyArgs,

        /// Print flows as JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Print graph statistics.
    Stats {
        #[command(flatten)]
        input: InputArgs,
    },
}

#[derive(Args)]
struct InputArgs {
    /// Input CSV file(s); the file stem becomes the source system.
    #[arg(long, short, required = true, num_args = 1..)]
    input: Vec<PathBuf>,
}

#[derive(Args)]
struct FuzzyArgs {
    /// Also match parameter names by normalized similarity.
    #[arg(long, env = "APIGRAPH_ENABLE_FUZZY")]
    enable_fuzzy: bool,

    /// Minimum similarity ratio for a fuzzy match (0.0-1.0).
    #[arg(
        long,
        env = "APIGRAPH_FUZZY_THRESHOLD",
        default_value_t = apigraph_core::DEFAULT_FUZZY_THRESHOLD
    )]
    fuzzy_threshold: f64,
}

impl FuzzyArgs {
    fn config(&self) -> Result<FlowConfig> {
        Ok(FlowConfig::new(self.enable_fuzzy, self.fuzzy_threshold)?)
    }
}

#[derive(Args)]
struct BuildArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Output file path.
    #[arg(long, short, default_value = "graph.json")]
    output: PathBuf,

    #[arg(long, short, value_enum, env = "APIGRAPH_EXPORT", default_value_t = ExportFormat::Json)]
    export: ExportFormat,

    /// Add potential-flow edges between tools.
    #[arg(long)]
    detect_flows: bool,

    #[command(flatten)]
    fuzzy: FuzzyArgs,

    /// Ask an LLM for semantic flows (GEMINI_API_KEY, OPENAI_API_KEY, ANTHROPIC_API_KEY or OLLAMA_HOST).
    #[arg(long)]
    semantic_matching: bool,

    /// Write an interactive HTML view of the whole graph.
    #[arg(long)]
    visualize: bool,

    /// Write an HTML view of tool-to-tool flows only.
    #[arg(long)]
    flow_viz: bool,

    #[arg(long, default_value = "graph.html")]
    viz_output: PathBuf,

    /// Layout for --visualize.
    #[arg(long, value_enum, default_value_t = VizLayout::Layered)]
    viz_layout: VizLayout,
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Build(args) => cmd_build(&args),
        Commands::Flows { input, fuzzy, json } => cmd_flows(&input, &fuzzy, json),
        Commands::Stats { input } => cmd_stats(&input),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if cli.verbose {
                eprintln!("{} {e:?}", "error:".red().bold());
            } else {
                eprintln!("{} {e:#}", "error:".red().bold());
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_records(input: &InputArgs) -> Result<Vec<ApiRecord>> {
    eprintln!(
        "{} {} CSV file(s)",
        "Parsing".green().bold(),
        input.input.len()
    );
    let records = apigraph_ingest_csv::parse_multiple(&input.input);
    if records.is_empty() {
        bail!("no API records found in input files");
    }
    Ok(records)
}

fn cmd_build(args: &BuildArgs) -> Result<()> {
    let options = PipelineOptions {
        detect_flows: args.detect_flows,
        flow: args.fuzzy.config()?,
    };
    let records = load_records(&args.input)?;

    let matcher = if args.semantic_matching {
        match LlmSemanticMatcher::from_env() {
            Ok(matcher) => Some(matcher),
            Err(e) => {
                tracing::warn!(error = %e, "semantic matching disabled");
                None
            }
        }
    } else {
        None
    };
    let enricher = matcher.as_ref().map(|m| m as &dyn FlowEnricher);

    let (graph, report) = run_pipeline(&records, &options, enricher)?;
    if args.detect_flows {
        eprintln!(
            "{} {} flow(s)",
            "Detected".green().bold(),
            report.flow_edges_added
        );
    }
    if let Some(m) = &matcher {
        eprintln!(
            "{} {} semantic flow(s) via {}",
            "Matched".green().bold(),
            report.semantic_edges_added,
            m.name()
        );
    }

    export_graph(&graph, args.export, &args.output)?;
    eprintln!(
        "{} {} ({}, {} nodes, {} edges)",
        "wrote".green().bold(),
        args.output.display().to_string().bold(),
        args.export,
        graph.node_count(),
        graph.edge_count()
    );

    if args.visualize || args.flow_viz {
        let view = if args.flow_viz {
            apigraph_cli::flow_view(&graph)
        } else {
            apigraph_cli::full_view(&graph, args.viz_layout)
        };
        write_html(&view, &args.viz_output)?;
        eprintln!(
            "{} {}",
            "wrote".green().bold(),
            args.viz_output.display().to_string().bold()
        );
        print_statistics(&graph.statistics());
    }
    Ok(())
}

fn cmd_flows(input: &InputArgs, fuzzy: &FuzzyArgs, json: bool) -> Result<()> {
    let detector = FlowDetector::new(fuzzy.config()?);
    let records = load_records(input)?;
    let graph = GraphBuilder::new().build_from_records(&records)?;
    let flows = detector.detect_flows(&graph);

    if json {
        println!("{}", serde_json::to_string_pretty(&flows)?);
        return Ok(());
    }

    if flows.is_empty() {
        println!("{}", "no flows detected".yellow());
        return Ok(());
    }
    for flow in &flows {
        println!(
            "{} {} {}  {} ({:.2}, {})",
            flow.source_tool.bold(),
            "->".cyan(),
            flow.target_tool.bold(),
            flow.matching_param,
            flow.confidence,
            flow.match_type
        );
    }
    println!("{} flow(s)", flows.len());
    Ok(())
}

fn cmd_stats(input: &InputArgs) -> Result<()> {
    let records = load_records(input)?;
    let graph = GraphBuilder::new().build_from_records(&records)?;
    print_statistics(&graph.statistics());
    Ok(())
}

fn print_statistics(stats: &GraphStatistics) {
    println!("{}", "Graph statistics".bold());
    println!("  Tool nodes:        {}", stats.tool_nodes);
    println!(
        "  Parameter nodes:   {} ({} input, {} output)",
        stats.parameter_nodes, stats.input_parameters, stats.output_parameters
    );
    println!("  Edges:             {}", stats.total_edges);
    println!("    requires_input:  {}", stats.requires_input_edges);
    println!("    produces_output: {}", stats.produces_output_edges);
    println!("    potential_flow:  {}", stats.potential_flow_edges);
    println!("    semantic_flow:   {}", stats.semantic_flow_edges);
    println!("  Flow connections:  {}", stats.flow_connections);
    println!("  Density:           {:.4}", stats.density);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_args(argv: &[&str]) -> BuildArgs {
        let mut full = vec!["apigraph", "build", "--input", "a.csv"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Commands::Build(args) => args,
            _ => unreachable!(),
        }
    }

    #[test]
    fn enumerated_flags_are_validated() {
        let args = build_args(&["--export", "cypher", "--viz-layout", "circular"]);
        assert_eq!(args.export, ExportFormat::Neo4j);
        assert_eq!(args.viz_layout, VizLayout::Circular);

        let defaults = build_args(&[]);
        assert_eq!(defaults.export, ExportFormat::Json);
        assert_eq!(defaults.viz_layout, VizLayout::Layered);

        assert!(Cli::try_parse_from(["apigraph", "build", "-i", "a.csv", "--export", "png"]).is_err());
        assert!(Cli::try_parse_from(["apigraph", "build", "-i", "a.csv", "--viz-layout", "spring"]).is_err());
    }

    #[test]
    fn fuzzy_threshold_falls_back_to_env() {
        assert_eq!(build_args(&[]).fuzzy.fuzzy_threshold, 0.8);

        std::env::set_var("APIGRAPH_FUZZY_THRESHOLD", "0.65");
        let from_env = build_args(&[]).fuzzy.fuzzy_threshold;
        let from_flag = build_args(&["--fuzzy-threshold", "0.9"]).fuzzy.fuzzy_threshold;
        std::env::remove_var("APIGRAPH_FUZZY_THRESHOLD");

        assert_eq!(from_env, 0.65);
        assert_eq!(from_flag, 0.9);
    }
}
