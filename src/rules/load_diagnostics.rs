use crate::model::DiagnosticKind;
use crate::rules::engine::{AnalysisInput, Rule};
use crate::rules::finding::{Category, Finding, Severity};

/// Re-reports dangling and shadowed column references found while binding.
pub struct LoadDiagnosticsRule;

impl Rule for LoadDiagnosticsRule {
    fn category(&self) -> Category {
        Category::DanglingColumnRef
    }

    fn check_table(&self, input: &AnalysisInput<'_>, table: &str) -> Vec<Finding> {
        input
            .policies
            .diagnostics()
            .iter()
            .filter(|d| d.table == table)
            .map(|d| {
                let category = match d.kind {
                    DiagnosticKind::DanglingColumn => Category::DanglingColumnRef,
                    DiagnosticKind::ShadowedColumn => Category::ShadowedColumnRef,
                };
                Finding::new(
                    category,
                    Severity::Medium,
                    table,
                    [d.policy.clone()],
                    format!("{} of `{}`: `{}`: {}", d.clause, d.policy, d.column, d.explanation),
                )
            })
            .collect()
    }
}
