use std::collections::{BTreeMap, BTreeSet};

use crate::model::{BinaryOperator, Expr, SubqueryMode};
use crate::rules::engine::{AnalysisInput, Rule};
use crate::rules::finding::{Category, Finding, Severity};

/// Equality and membership predicate columns with no index leading on them.
pub struct UnindexedPredicateRule;

fn column_of(expr: &Expr) -> Option<(&str, &str)> {
    match expr.peel_case_normalization().0 {
        Expr::ColumnRef(col) => col.table.as_deref().map(|t| (t, col.column.as_str())),
        _ => None,
    }
}

/// `(table, column)` pairs a predicate looks rows up by.
fn lookup_columns(expr: &Expr) -> BTreeSet<(&str, &str)> {
    let mut cols = BTreeSet::new();
    expr.walk(&mut |node| match node {
        Expr::BinaryOp {
            op: BinaryOperator::Eq,
            left,
            right,
        } => {
            cols.extend(column_of(left));
            cols.extend(column_of(right));
        }
        Expr::InList { expr, .. } => cols.extend(column_of(expr)),
        Expr::Subquery(sub) => {
            if let SubqueryMode::In { expr } = &sub.mode {
                cols.extend(column_of(expr));
                if let Some(column) = &sub.column {
                    cols.insert((sub.table.as_str(), column.as_str()));
                }
            }
        }
        _ => {}
    });
    cols
}

impl Rule for UnindexedPredicateRule {
    fn category(&self) -> Category {
        Category::UnindexedPredicateColumn
    }

    fn check_global(&self, input: &AnalysisInput<'_>) -> Vec<Finding> {
        if input.schema.index_catalog().is_some() || input.policies.policies().is_empty() {
            return Vec::new();
        }
        vec![Finding::new(
            Category::UnindexedPredicateColumn,
            Severity::Info,
            "*",
            Vec::new(),
            "no index catalog was supplied; unindexed predicate check skipped, insufficient data",
        )]
    }

    fn check_table(&self, input: &AnalysisInput<'_>, table: &str) -> Vec<Finding> {
        let Some(catalog) = input.schema.index_catalog() else {
            return Vec::new();
        };
        let mut uses: BTreeMap<(&str, &str), BTreeSet<&str>> = BTreeMap::new();
        for policy in input.policies.on_table(table) {
            for (_, expr) in policy.expressions() {
                for key in lookup_columns(expr) {
                    uses.entry(key).or_default().insert(policy.name.as_str());
                }
            }
        }

        uses.into_iter()
            .filter(|((owner, column), _)| {
                input
                    .schema
                    .table(owner)
                    .is_some_and(|t| t.has_column(column))
                    && !catalog.has_leading(owner, column)
            })
            .map(|((owner, column), policies)| {
                Finding::new(
                    Category::UnindexedPredicateColumn,
                    Severity::Low,
                    owner,
                    policies.iter().map(|p| p.to_string()),
                    format!(
                        "`{owner}.{column}` is matched by policies on `{table}` but no index leads with it; \
                         every policy check scans `{owner}`"
                    ),
                )
            })
            .collect()
    }
}
