use std::fmt::Write;

use serde::Serialize;

use crate::eval::simulate::SimulationResult;
use crate::eval::trilean::Trilean;
use crate::graph::{Cycle, DependencyGraph};
use crate::rules::finding::{has_actionable, Finding};

/// Everything one analysis run produced.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    /// Findings in report order.
    pub findings: Vec<Finding>,
    /// Table reference graph.
    pub graph: DependencyGraph,
    /// Cycles in `graph`.
    pub cycles: Vec<Cycle>,
}

impl Report {
    /// Whether nothing above `Info` was found and the graph is acyclic.
    pub fn is_clean(&self) -> bool {
        self.cycles.is_empty() && !has_actionable(&self.findings)
    }

    /// Serialize as pretty JSON. The graph is embedded as its edge list.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        #[derive(Serialize)]
        struct JsonReport<'a> {
            clean: bool,
            findings: &'a [Finding],
            cycles: &'a [Cycle],
            graph: String,
        }
        serde_json::to_string_pretty(&JsonReport {
            clean: self.is_clean(),
            findings: &self.findings,
            cycles: &self.cycles,
            graph: self.graph.to_edge_list(),
        })
    }
}

/// Build a markdown report: finding summary, per-finding details, and the
/// dependency graph as an edge list.
pub fn build_report(report: &Report) -> String {
    let mut out = String::new();

    writeln!(out, "# rlscheck Analysis Report").unwrap();
    writeln!(out).unwrap();

    writeln!(out, "## Findings").unwrap();
    writeln!(out).unwrap();
    if report.findings.is_empty() {
        writeln!(out, "No findings.").unwrap();
    } else {
        writeln!(out, "| Severity | Category | Table | Policies |").unwrap();
        writeln!(out, "|----------|----------|-------|----------|").unwrap();
        for finding in &report.findings {
            writeln!(
                out,
                "| {} | {} | {} | {} |",
                finding.severity,
                finding.category,
                finding.table,
                finding.policies.join(", ")
            )
            .unwrap();
        }

        writeln!(out).unwrap();
        writeln!(out, "## Details").unwrap();
        for finding in &report.findings {
            writeln!(out).unwrap();
            writeln!(
                out,
                "- **[{}] {}** on `{}`: {}",
                finding.severity, finding.category, finding.table, finding.explanation
            )
            .unwrap();
            if let Some(cycle) = &finding.cycle {
                writeln!(out, "  - cycle: `{}`", cycle.describe()).unwrap();
            }
            if let Some(context) = &finding.reproduction {
                writeln!(out, "  - reproduce with: `--context {context}`").unwrap();
            }
            if let Some(row) = &finding.counterexample {
                let row = serde_json::to_string(row).unwrap_or_default();
                writeln!(out, "  - counter-example row: `{row}`").unwrap();
            }
        }
    }

    writeln!(out).unwrap();
    writeln!(out, "## Dependency Graph").unwrap();
    writeln!(out).unwrap();
    writeln!(out, "```").unwrap();
    write!(out, "{}", report.graph.to_edge_list()).unwrap();
    writeln!(out, "```").unwrap();

    out
}

/// Build a markdown table of per-row verdicts with the deciding policies.
pub fn build_simulation_report(result: &SimulationResult) -> String {
    let mut out = String::new();

    writeln!(out, "# rlscheck Simulation: {} on `{}`", result.command, result.table).unwrap();
    writeln!(out).unwrap();
    let context = if result.context.is_empty() {
        "(empty)"
    } else {
        result.context.as_str()
    };
    writeln!(out, "- context: `{context}`").unwrap();
    writeln!(out, "- role: {}", result.role.as_deref().unwrap_or("(none, PUBLIC only)")).unwrap();
    writeln!(out, "- granted: {} of {}", result.granted(), result.rows.len()).unwrap();
    writeln!(out).unwrap();

    writeln!(out, "| Row | Verdict | Deciding policies |").unwrap();
    writeln!(out, "|-----|---------|-------------------|").unwrap();
    for verdict in &result.rows {
        let (label, deciding) = match (&verdict.resolution, &verdict.error) {
            (Some(res), _) => {
                let deciding: Vec<String> = res
                    .deciding()
                    .iter()
                    .map(|o| format!("{} ({} {} = {})", o.policy, o.disposition, o.clause, o.result))
                    .collect();
                let deciding = if deciding.is_empty() {
                    "no applicable policy".to_string()
                } else {
                    deciding.join("; ")
                };
                (verdict_label(res.verdict), deciding)
            }
            (None, Some(err)) => ("error", err.clone()),
            (None, None) => ("error", String::new()),
        };
        writeln!(out, "| {} | {label} | {deciding} |", verdict.index).unwrap();
    }

    if !result.findings.is_empty() {
        writeln!(out).unwrap();
        writeln!(out, "## Findings").unwrap();
        writeln!(out).unwrap();
        for finding in &result.findings {
            writeln!(
                out,
                "- **[{}] {}**: {}",
                finding.severity, finding.category, finding.explanation
            )
            .unwrap();
        }
    }

    out
}

fn verdict_label(verdict: Trilean) -> &'static str {
    match verdict {
        Trilean::True => "granted",
        Trilean::False => "denied",
        Trilean::Unknown => "denied (unknown)",
    }
}
