//! CLI entry point for `rlscheck`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use rlscheck::analysis::{analyze, load_inputs};
use rlscheck::config::AnalyzerConfig;
use rlscheck::eval::{simulate, SessionContext, SessionValue, SimulationRequest};
use rlscheck::graph::{build_graph, detect_cycles};
use rlscheck::model::Value;
use rlscheck::output::formatter::{self, GraphFormat, OutputFormat};
use rlscheck::parser::document::{read_json, SimulationRequestDocument};

#[derive(Parser, Debug)]
#[command(
    name = "rlscheck",
    version,
    about = "Analyze PostgreSQL row-level security policies and simulate row visibility"
)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,

    /// Print debug logs to stderr
    #[arg(long, global = true)]
    verbose: bool,

    /// Rule engine worker threads (default: available parallelism)
    #[arg(long, global = true, env = "RLSCHECK_THREADS")]
    threads: Option<usize>,

    /// Nesting budget for correlated subqueries
    #[arg(long, global = true, env = "RLSCHECK_MAX_DEPTH")]
    max_depth: Option<usize>,

    /// Synthetic rows explored per policy by sampling rules
    #[arg(long, global = true, env = "RLSCHECK_MAX_SAMPLE_ROWS")]
    max_sample_rows: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every anti-pattern rule and print the report
    Analyze {
        /// Schema document (JSON)
        schema: PathBuf,
        /// Policy document (JSON)
        policies: PathBuf,
        /// Report format: markdown or json
        #[arg(long, default_value = "markdown")]
        format: OutputFormat,
        /// Write the report here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Evaluate candidate rows under a session context
    Simulate {
        /// Schema document (JSON)
        schema: PathBuf,
        /// Policy document (JSON)
        policies: PathBuf,
        /// Simulation request document (JSON)
        #[arg(long)]
        request: Option<PathBuf>,
        /// Table to simulate (overrides the request)
        #[arg(long)]
        table: Option<String>,
        /// Command to simulate (overrides the request; default SELECT)
        #[arg(long)]
        command: Option<String>,
        /// Active role (overrides the request)
        #[arg(long)]
        role: Option<String>,
        /// Session variables as `k=v,k2=null`, merged over the request context
        #[arg(long)]
        context: Option<String>,
        /// JSON array of candidate rows (replaces the request's rows)
        #[arg(long)]
        rows: Option<PathBuf>,
        /// Result format: markdown or json
        #[arg(long, default_value = "markdown")]
        format: OutputFormat,
        /// Write the result here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Export the table reference graph
    Graph {
        /// Schema document (JSON)
        schema: PathBuf,
        /// Policy document (JSON)
        policies: PathBuf,
        /// Graph format: edges or json
        #[arg(long, default_value = "edges")]
        format: GraphFormat,
        /// Write the graph here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

/// Outcome of a command that ran to completion.
enum Outcome {
    Clean,
    Findings,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config =
        AnalyzerConfig::default().with_overrides(cli.threads, cli.max_depth, cli.max_sample_rows);
    debug!(?config, "configuration resolved");

    let result = match cli.cmd {
        Command::Analyze {
            schema,
            policies,
            format,
            output,
        } => run_analyze(&schema, &policies, format, output.as_deref(), &config),
        Command::Simulate {
            schema,
            policies,
            request,
            table,
            command,
            role,
            context,
            rows,
            format,
            output,
        } => {
            let overrides = SimulateOverrides {
                request,
                table,
                command,
                role,
                context,
                rows,
            };
            run_simulate(&schema, &policies, overrides, format, output.as_deref(), &config)
        }
        Command::Graph {
            schema,
            policies,
            format,
            output,
        } => run_graph(&schema, &policies, format, output.as_deref()),
    };

    match result {
        Ok(Outcome::Clean) => {}
        Ok(Outcome::Findings) => process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(2);
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("rlscheck=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_analyze(
    schema_path: &Path,
    policy_path: &Path,
    format: OutputFormat,
    output: Option<&Path>,
    config: &AnalyzerConfig,
) -> Result<Outcome, String> {
    let (schema, policies) = load_inputs(schema_path, policy_path).map_err(|e| e.to_string())?;
    let report = analyze(&schema, &policies, config);
    formatter::write_output(output, &formatter::render_report(&report, format)?)?;
    Ok(if report.is_clean() {
        Outcome::Clean
    } else {
        Outcome::Findings
    })
}

struct SimulateOverrides {
    request: Option<PathBuf>,
    table: Option<String>,
    command: Option<String>,
    role: Option<String>,
    context: Option<String>,
    rows: Option<PathBuf>,
}

fn run_simulate(
    schema_path: &Path,
    policy_path: &Path,
    overrides: SimulateOverrides,
    format: OutputFormat,
    output: Option<&Path>,
    config: &AnalyzerConfig,
) -> Result<Outcome, String> {
    let (schema, policies) = load_inputs(schema_path, policy_path).map_err(|e| e.to_string())?;

    let mut doc = match &overrides.request {
        Some(path) => read_json::<SimulationRequestDocument>("simulation request", path)
            .map_err(|e| e.to_string())?,
        None => SimulationRequestDocument::default(),
    };
    if overrides.table.is_some() {
        doc.table = overrides.table;
    }
    if overrides.command.is_some() {
        doc.command = overrides.command;
    }
    if overrides.role.is_some() {
        doc.role = overrides.role;
    }
    if let Some(path) = &overrides.rows {
        doc.candidate_rows =
            read_json::<Vec<BTreeMap<String, Value>>>("rows", path).map_err(|e| e.to_string())?;
    }

    let mut request = SimulationRequest::from_document(&schema, doc).map_err(|e| e.to_string())?;
    if let Some(text) = &overrides.context {
        let assigned = SessionContext::parse_assignments(text)
            .map_err(|e| format!("Invalid --context: {e}"))?;
        request.context = merge_context(request.context, &assigned);
    }

    let result = simulate(&policies, &request, config);
    formatter::write_output(output, &formatter::render_simulation(&result, format)?)?;
    Ok(if result.findings.is_empty() {
        Outcome::Clean
    } else {
        Outcome::Findings
    })
}

fn merge_context(base: SessionContext, overrides: &SessionContext) -> SessionContext {
    overrides
        .vars()
        .iter()
        .fold(base, |ctx, (name, state)| match state {
            SessionValue::Known(value) => ctx.with_value(name, value.clone()),
            SessionValue::Unknown => ctx.with_unknown(name),
            SessionValue::Unset => ctx,
        })
}

fn run_graph(
    schema_path: &Path,
    policy_path: &Path,
    format: GraphFormat,
    output: Option<&Path>,
) -> Result<Outcome, String> {
    let (_, policies) = load_inputs(schema_path, policy_path).map_err(|e| e.to_string())?;
    let graph = build_graph(&policies);
    formatter::write_output(output, &formatter::render_graph(&graph, format))?;
    Ok(if detect_cycles(&graph).is_empty() {
        Outcome::Clean
    } else {
        Outcome::Findings
    })
}
