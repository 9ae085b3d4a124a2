//! Traces the parser state machines and control blocks of a JSON program
//! description.
//!
//! Usage: `irwalk <program.json> [--json]`

use std::fs;
use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::{error, info};

use irwalk::config::Config;
use irwalk::ir::builder::ProgramDesc;
use irwalk::ir::control_trace::{ControlReport, ControlTrace};
use irwalk::ir::node::NodeKind;
use irwalk::ir::trace::{FlowTrace, TraceReport};
use irwalk::logging;
use irwalk::session::{Diagnostic, Session};

#[derive(Parser, Debug)]
#[command(name = "irwalk")]
#[command(about = "Report parser join points and loops, and the call flow of control blocks")]
struct Args {
    /// Path to the JSON program description
    program: PathBuf,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level filter for stderr (overrides RUST_LOG)
    #[arg(long = "log-level")]
    log_level: Option<String>,

    #[arg(long = "no-color")]
    no_color: bool,

    /// Also write a debug-level session log to the user cache directory
    #[arg(long = "log-file")]
    log_file: bool,

    /// Override the traversal depth limit
    #[arg(long = "max-depth")]
    max_depth: Option<usize>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct Report<'a> {
    parsers: Vec<TraceReport>,
    controls: Vec<ControlReport>,
    diagnostics: Vec<&'a Diagnostic>,
}

fn main() {
    let args = Args::parse();

    let _guard = match logging::init_logger(args.no_color, args.log_level.as_deref(), args.log_file) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            process::exit(1);
        }
    };

    match run(&args) {
        Ok(errors) if errors > 0 => {
            error!("{} error(s) reported", errors);
            process::exit(1);
        }
        Ok(_) => {}
        Err(e) => {
            error!("{:#}", e);
            process::exit(2);
        }
    }
}

/// Returns the number of error diagnostics.
fn run(args: &Args) -> anyhow::Result<usize> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(max_depth) = args.max_depth {
        config.traversal.max_depth = max_depth;
    }

    let text = fs::read_to_string(&args.program)
        .with_context(|| format!("failed to read {}", args.program.display()))?;
    let desc = ProgramDesc::from_json(&text)
        .with_context(|| format!("invalid program description {}", args.program.display()))?;

    let mut session = Session::new(config.session.clone());
    let program = desc.lower(&mut session);
    info!(declarations = program.children().len(), "program lowered");

    let mut parsers = Vec::new();
    let mut controls = Vec::new();
    for child in program.children() {
        match child.node.kind() {
            NodeKind::Parser => {
                let trace = FlowTrace::run(child.node, config.traversal.clone())
                    .with_context(|| format!("tracing {}", child.node))?;
                parsers.push(trace.report());
            }
            NodeKind::Control => {
                let trace = ControlTrace::run(Some(&program), child.node, config.traversal.clone())
                    .with_context(|| format!("tracing {}", child.node))?;
                controls.push(trace.report());
            }
            _ => {}
        }
    }

    let diagnostics = session.diagnostics();
    if args.json {
        let report = Report { parsers, controls, diagnostics: diagnostics.iter().collect() };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for parser in &parsers {
            print_report(parser);
        }
        for control in &controls {
            print_control(control);
        }
        for diagnostic in diagnostics.iter() {
            println!("{}", diagnostic);
        }
    }
    Ok(diagnostics.error_count())
}

fn print_report(report: &TraceReport) {
    println!("parser {}", report.parser);
    if report.join_points.is_empty() {
        println!("  join points: none");
    } else {
        println!("  join points:");
        for join in &report.join_points {
            println!("    {} ({} incoming)", join.state, join.incoming);
        }
    }
    println!("  loop edges: {}", report.loop_edges);
    println!("  trace:");
    for event in &report.events {
        println!("    {}", event);
    }
}

fn print_control(report: &ControlReport) {
    println!("control {}", report.control);
    println!("  actions: [{}]", report.actions.join(", "));
    println!("  trace:");
    for event in &report.events {
        println!("    {}", event);
    }
}
