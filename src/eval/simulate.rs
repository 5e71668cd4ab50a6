use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, info_span, warn};

use crate::config::AnalyzerConfig;
use crate::eval::combinator::Resolution;
use crate::eval::context::{normalize_row, Dataset, Row, SessionContext};
use crate::eval::error::{EvalError, SimulationError};
use crate::eval::evaluator::Evaluator;
use crate::eval::trilean::Trilean;
use crate::model::{Command, PolicySet, Schema};
use crate::parser::document::SimulationRequestDocument;
use crate::parser::names::normalize_relation_name;
use crate::rules::finding::{Category, Finding, Severity};

/// A validated simulation request.
#[derive(Debug, Clone, Default)]
pub struct SimulationRequest {
    /// Table whose rows are checked.
    pub table: String,
    /// Command being simulated.
    pub command: Option<Command>,
    /// Session under which rows are checked.
    pub context: SessionContext,
    /// Candidate rows of `table`.
    pub rows: Vec<Row>,
    /// Rows of other tables for subqueries.
    pub related: Dataset,
}

impl SimulationRequest {
    /// Validate a request document against the schema.
    pub fn from_document(
        schema: &Schema,
        doc: SimulationRequestDocument,
    ) -> Result<Self, SimulationError> {
        let table = doc
            .table
            .as_deref()
            .map(normalize_relation_name)
            .ok_or(SimulationError::MissingTable)?;
        if schema.table(&table).is_none() {
            return Err(SimulationError::UnknownTable(table));
        }
        let command = match doc.command.as_deref() {
            None => None,
            Some(raw) => Some(raw.parse::<Command>().map_err(SimulationError::InvalidCommand)?),
        };
        let mut context = SessionContext::from_values(&doc.context);
        if let Some(role) = &doc.role {
            context = context.with_role(role);
        }
        let mut related = Dataset::new();
        for (name, rows) in doc.related_rows {
            let name = normalize_relation_name(&name);
            if schema.table(&name).is_none() {
                return Err(SimulationError::UnknownTable(name));
            }
            related.insert(&name, rows);
        }
        Ok(Self {
            table,
            command,
            context,
            rows: doc.candidate_rows.iter().map(normalize_row).collect(),
            related,
        })
    }

    /// Command to simulate; `SELECT` when unspecified.
    pub fn effective_command(&self) -> Command {
        self.command.unwrap_or(Command::Select)
    }
}

/// Verdict for one candidate row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowVerdict {
    /// Position in the request.
    pub index: usize,
    /// The row as evaluated.
    pub row: Row,
    /// Combined verdict and per-policy outcomes; absent when evaluation failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    /// Evaluation failure for this row.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RowVerdict {
    /// Final truth value; failed rows count as `Unknown`.
    pub fn verdict(&self) -> Trilean {
        self.resolution
            .as_ref()
            .map_or(Trilean::Unknown, |r| r.verdict)
    }
}

/// Outcome of a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationResult {
    /// Simulated table.
    pub table: String,
    /// Simulated command.
    pub command: Command,
    /// Session as `k=v,...`.
    pub context: String,
    /// Active role.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// One entry per candidate row.
    pub rows: Vec<RowVerdict>,
    /// Runtime problems, one per distinct failure.
    pub findings: Vec<Finding>,
}

impl SimulationResult {
    /// Number of rows whose verdict is `True`.
    pub fn granted(&self) -> usize {
        self.rows.iter().filter(|r| r.verdict().is_true()).count()
    }
}

/// Evaluate every candidate row. A failing row is recorded with its error
/// instead of aborting the run; cycles and depth overruns also become
/// `RuntimeCycle` findings.
pub fn simulate(
    policies: &PolicySet,
    request: &SimulationRequest,
    config: &AnalyzerConfig,
) -> SimulationResult {
    let command = request.effective_command();
    let span = info_span!("simulate", table = %request.table, %command);
    let _guard = span.enter();

    let evaluator = Evaluator::new(policies, &request.related, &request.context)
        .with_max_depth(config.max_depth);
    let reproduction = request.context.to_assignments();
    let involved: Vec<String> = policies
        .applicable(&request.table, command, request.context.role())
        .into_iter()
        .map(|p| p.name.clone())
        .collect();

    let mut rows = Vec::with_capacity(request.rows.len());
    let mut findings = Vec::new();
    let mut seen_errors = BTreeSet::new();
    for (index, row) in request.rows.iter().enumerate() {
        match evaluator.resolve_command(&request.table, command, row) {
            Ok(resolution) => {
                debug!(index, verdict = %resolution.verdict, "row evaluated");
                rows.push(RowVerdict {
                    index,
                    row: row.clone(),
                    resolution: Some(resolution),
                    error: None,
                });
            }
            Err(err) => {
                let message = err.to_string();
                warn!(index, error = %message, "row evaluation failed");
                let recursion = matches!(
                    err,
                    EvalError::CycleDetectedAtRuntime { .. } | EvalError::DepthExceeded { .. }
                );
                if recursion && seen_errors.insert(message.clone()) {
                    findings.push(
                        Finding::new(
                            Category::RuntimeCycle,
                            Severity::High,
                            request.table.clone(),
                            involved.clone(),
                            format!("{command} on `{}` cannot be evaluated: {message}", request.table),
                        )
                        .with_reproduction(reproduction.clone())
                        .with_counterexample(row.clone()),
                    );
                }
                rows.push(RowVerdict {
                    index,
                    row: row.clone(),
                    resolution: None,
                    error: Some(message),
                });
            }
        }
    }

    SimulationResult {
        table: request.table.clone(),
        command,
        context: reproduction,
        role: request.context.role().map(str::to_string),
        rows,
        findings,
    }
}
