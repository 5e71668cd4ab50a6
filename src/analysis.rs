use std::path::Path;

use thiserror::Error;
use tracing::{info, info_span};

use crate::config::AnalyzerConfig;
use crate::graph::{build_graph, detect_cycles};
use crate::model::{load_policies, load_schema, PolicyError, PolicySet, Schema, SchemaError};
use crate::output::report::Report;
use crate::parser::document::{read_json, DocumentError, PolicyDocument, SchemaDocument};
use crate::rules::{default_rules, run_rules, AnalysisInput};

/// Any fatal problem while loading the schema and policy documents.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Unreadable or malformed document.
    #[error(transparent)]
    Document(#[from] DocumentError),
    /// Schema failed validation.
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// Policy failed validation.
    #[error(transparent)]
    Policy(#[from] PolicyError),
}

/// Read, parse and validate both input documents.
pub fn load_inputs(schema_path: &Path, policy_path: &Path) -> Result<(Schema, PolicySet), LoadError> {
    let span = info_span!("load", schema = %schema_path.display(), policies = %policy_path.display());
    let _guard = span.enter();

    let schema = load_schema(read_json::<SchemaDocument>("schema", schema_path)?)?;
    let policies = load_policies(&schema, read_json::<PolicyDocument>("policy", policy_path)?)?;
    info!(
        tables = schema.tables().count(),
        policies = policies.policies().len(),
        diagnostics = policies.diagnostics().len(),
        "inputs loaded"
    );
    Ok((schema, policies))
}

/// Build the dependency graph, detect cycles, and run every rule.
pub fn analyze(schema: &Schema, policies: &PolicySet, config: &AnalyzerConfig) -> Report {
    let span = info_span!("analyze");
    let _guard = span.enter();

    let graph = build_graph(policies);
    let cycles = detect_cycles(&graph);
    let input = AnalysisInput {
        schema,
        policies,
        graph: &graph,
        cycles: &cycles,
        config,
    };
    let findings = run_rules(&input, &default_rules());
    info!(findings = findings.len(), cycles = cycles.len(), "analysis finished");
    Report {
        findings,
        graph,
        cycles,
    }
}
