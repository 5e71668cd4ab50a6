use std::fmt;
use std::io::Write as _;
use std::path::Path;
use std::str::FromStr;

use crate::eval::simulate::SimulationResult;
use crate::graph::DependencyGraph;
use crate::output::report::{self, Report};

/// Rendering of analysis and simulation output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable markdown.
    #[default]
    Markdown,
    /// Pretty-printed JSON.
    Json,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Markdown => f.write_str("markdown"),
            OutputFormat::Json => f.write_str("json"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid output format '{s}': expected markdown or json")),
        }
    }
}

/// Rendering of the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GraphFormat {
    /// Tab-separated `source target policy` lines.
    #[default]
    Edges,
    /// `{"nodes": [...], "edges": [...]}`
    Json,
}

impl fmt::Display for GraphFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphFormat::Edges => f.write_str("edges"),
            GraphFormat::Json => f.write_str("json"),
        }
    }
}

impl FromStr for GraphFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "edges" | "edge-list" => Ok(GraphFormat::Edges),
            "json" => Ok(GraphFormat::Json),
            _ => Err(format!("Invalid graph format '{s}': expected edges or json")),
        }
    }
}

/// Render an analysis report.
pub fn render_report(report: &Report, format: OutputFormat) -> Result<String, String> {
    match format {
        OutputFormat::Markdown => Ok(report::build_report(report)),
        OutputFormat::Json => report
            .to_json()
            .map_err(|e| format!("Failed to serialize report: {e}")),
    }
}

/// Render a simulation result.
pub fn render_simulation(result: &SimulationResult, format: OutputFormat) -> Result<String, String> {
    match format {
        OutputFormat::Markdown => Ok(report::build_simulation_report(result)),
        OutputFormat::Json => serde_json::to_string_pretty(result)
            .map_err(|e| format!("Failed to serialize simulation result: {e}")),
    }
}

/// Render the dependency graph.
pub fn render_graph(graph: &DependencyGraph, format: GraphFormat) -> String {
    match format {
        GraphFormat::Edges => graph.to_edge_list(),
        GraphFormat::Json => graph.to_json(),
    }
}

/// Write `content` to `path`, or to stdout when no path is given.
pub fn write_output(path: Option<&Path>, content: &str) -> Result<(), String> {
    let Some(path) = path else {
        let mut stdout = std::io::stdout().lock();
        return stdout
            .write_all(content.as_bytes())
            .and_then(|()| stdout.flush())
            .map_err(|e| format!("Failed to write to stdout: {e}"));
    };
    validate_output_path(path)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create output directory: {e}"))?;
    }
    std::fs::write(path, content).map_err(|e| format!("Failed to write {}: {e}", path.display()))
}

fn validate_output_path(path: &Path) -> Result<(), String> {
    if path.as_os_str().is_empty() {
        return Err("Output path must not be empty".to_string());
    }
    if path.is_dir() {
        return Err(format!(
            "Invalid output path '{}': it is a directory",
            path.display()
        ));
    }
    Ok(())
}
