use crate::model::ast::KNOWN_FUNCTIONS;
use crate::model::Expr;
use crate::rules::engine::{AnalysisInput, Rule};
use crate::rules::finding::{Category, Finding, Severity};

/// Constructs the evaluator cannot interpret.
pub struct UnsupportedConstructRule;

impl Rule for UnsupportedConstructRule {
    fn category(&self) -> Category {
        Category::UnsupportedConstruct
    }

    fn check_table(&self, input: &AnalysisInput<'_>, table: &str) -> Vec<Finding> {
        let mut findings = Vec::new();
        for policy in input.policies.on_table(table) {
            for (clause, expr) in policy.expressions() {
                expr.walk(&mut |node| match node {
                    Expr::Opaque { sql } => findings.push(Finding::new(
                        Category::UnsupportedConstruct,
                        Severity::Medium,
                        table,
                        [policy.name.clone()],
                        format!(
                            "{clause} of `{}` contains `{sql}`, which is outside the supported grammar \
                             and always evaluates to UNKNOWN",
                            policy.name
                        ),
                    )),
                    Expr::FunctionCall { name, .. } if !KNOWN_FUNCTIONS.contains(&name.as_str()) => {
                        findings.push(Finding::new(
                            Category::UnsupportedConstruct,
                            Severity::Low,
                            table,
                            [policy.name.clone()],
                            format!(
                                "{clause} of `{}` calls unknown function `{name}()`, which evaluates to NULL",
                                policy.name
                            ),
                        ));
                    }
                    _ => {}
                });
            }
        }
        findings.dedup();
        findings
    }
}
