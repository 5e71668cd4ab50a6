use crate::model::{BinaryOperator, Expr, Schema, SubqueryMode};
use crate::rules::engine::{AnalysisInput, Rule};
use crate::rules::finding::{Category, Finding, Severity};
use crate::rules::predicates::comparisons;

/// Text compared byte-for-byte against session input or another text column.
pub struct CaseSensitivityRule;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operand {
    /// Case-sensitive text column.
    Text { normalized: bool },
    /// Session variable.
    Session { normalized: bool },
    /// `citext` column.
    Insensitive,
    Other,
}

impl Operand {
    fn classify(expr: &Expr, schema: &Schema) -> Self {
        let (inner, normalized) = expr.peel_case_normalization();
        match inner {
            Expr::ColumnRef(col) => {
                let Some(column) = col
                    .table
                    .as_deref()
                    .and_then(|t| schema.table(t))
                    .and_then(|t| t.column(&col.column))
                else {
                    return Operand::Other;
                };
                if column.is_case_insensitive() {
                    Operand::Insensitive
                } else if column.is_text() {
                    Operand::Text { normalized }
                } else {
                    Operand::Other
                }
            }
            Expr::SessionVar { .. } => Operand::Session { normalized },
            _ => Operand::Other,
        }
    }

    fn normalized(&self) -> bool {
        match self {
            Operand::Text { normalized, .. } | Operand::Session { normalized, .. } => *normalized,
            Operand::Insensitive | Operand::Other => false,
        }
    }

    fn is_text(&self) -> bool {
        matches!(self, Operand::Text { .. })
    }

    fn is_candidate(&self) -> bool {
        matches!(self, Operand::Text { .. } | Operand::Session { .. })
    }
}

/// Severity for a text comparison: `None` when it is not a mismatch.
fn mismatch(left: &Operand, right: &Operand) -> Option<Severity> {
    let text_involved = left.is_text() || right.is_text();
    if !text_involved || !left.is_candidate() || !right.is_candidate() {
        return None;
    }
    match (left.normalized(), right.normalized()) {
        (true, true) => None,
        (false, false) => Some(Severity::Medium),
        _ => Some(Severity::Low),
    }
}

impl Rule for CaseSensitivityRule {
    fn category(&self) -> Category {
        Category::CaseSensitivityMismatch
    }

    fn check_table(&self, input: &AnalysisInput<'_>, table: &str) -> Vec<Finding> {
        let schema = input.schema;
        let mut findings = Vec::new();
        for policy in input.policies.on_table(table) {
            for (clause, expr) in policy.expressions() {
                let mut report = |severity: Severity, shown: String| {
                    let advice = if severity == Severity::Low {
                        "only one side is case-normalized"
                    } else {
                        "neither side is case-normalized"
                    };
                    findings.push(Finding::new(
                        Category::CaseSensitivityMismatch,
                        severity,
                        table,
                        [policy.name.clone()],
                        format!(
                            "{clause} of `{}` compares `{shown}` byte-for-byte and {advice}; \
                             values differing only in letter case will not match",
                            policy.name
                        ),
                    ));
                };

                for (left, op, right) in comparisons(expr) {
                    if !matches!(op, BinaryOperator::Eq | BinaryOperator::NotEq | BinaryOperator::Like) {
                        continue;
                    }
                    let l = Operand::classify(left, schema);
                    let r = Operand::classify(right, schema);
                    if let Some(severity) = mismatch(&l, &r) {
                        report(severity, format!("{left} {} {right}", op_symbol(op)));
                    }
                }

                for sub in expr.subqueries() {
                    let (SubqueryMode::In { expr: subject }, Some(column)) = (&sub.mode, &sub.column)
                    else {
                        continue;
                    };
                    let l = Operand::classify(subject, schema);
                    let projected = schema
                        .table(&sub.table)
                        .and_then(|t| t.column(column))
                        .map_or(Operand::Other, |c| {
                            if c.is_case_insensitive() {
                                Operand::Insensitive
                            } else if c.is_text() {
                                Operand::Text { normalized: false }
                            } else {
                                Operand::Other
                            }
                        });
                    if let Some(severity) = mismatch(&l, &projected) {
                        report(
                            severity,
                            format!("{subject} IN (SELECT {column} FROM {})", sub.table),
                        );
                    }
                }
            }
        }
        findings.dedup();
        findings
    }
}

fn op_symbol(op: BinaryOperator) -> &'static str {
    match op {
        BinaryOperator::NotEq => "<>",
        BinaryOperator::Like => "LIKE",
        _ => "=",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalyzerConfig;
    use crate::graph::{build_graph, detect_cycles};
    use crate::model::{load_policies, load_schema};
    use crate::parser::document::parse_json;

    fn check(using: &str) -> Vec<Finding> {
        let schema = load_schema(
            parse_json(
                "schema",
                r#"{"tables":[
                    {"name":"users","columns":[{"name":"email","type":"text"},{"name":"login","type":"citext"},{"name":"id","type":"int"}]},
                    {"name":"invites","columns":[{"name":"email","type":"varchar(255)"}]}]}"#,
            )
            .expect("schema json should parse"),
        )
        .expect("schema should load");
        let doc = parse_json(
            "policy",
            &serde_json::json!({"policies":[{"table":"users","policy_name":"by_email","commands":["SELECT"],"using_expr":using}]})
                .to_string(),
        )
        .expect("policy json should parse");
        let set = load_policies(&schema, doc).expect("policies should load");
        let graph = build_graph(&set);
        let cycles = detect_cycles(&graph);
        let config = AnalyzerConfig::default();
        let input = AnalysisInput {
            schema: &schema,
            policies: &set,
            graph: &graph,
            cycles: &cycles,
            config: &config,
        };
        CaseSensitivityRule.check_table(&input, "users")
    }

    #[test]
    fn raw_text_equality_with_session_input_is_flagged() {
        let findings = check("email = sessionvar(email)");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Medium);
        assert_eq!(findings[0].category, Category::CaseSensitivityMismatch);
    }

    #[test]
    fn normalization_on_both_sides_is_clean() {
        assert!(check("lower(email) = lower(sessionvar(email))").is_empty());
        assert!(check("email ILIKE sessionvar(email)").is_empty());
    }

    #[test]
    fn one_sided_normalization_is_low() {
        let findings = check("lower(email) = sessionvar(email)");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Low);
    }

    #[test]
    fn citext_and_non_text_columns_are_exempt() {
        assert!(check("login = sessionvar(email)").is_empty());
        assert!(check("id = sessionvar(user_id)").is_empty());
        assert!(check("email = 'a@example.com'").is_empty());
    }

    #[test]
    fn membership_subqueries_over_text_are_checked() {
        let findings = check("email IN (SELECT email FROM invites)");
        assert_eq!(findings.len(), 1);
        assert!(findings[0].explanation.contains("IN (SELECT email FROM invites)"));
    }
}
