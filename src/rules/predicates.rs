use std::collections::BTreeSet;

use crate::model::{
    BinaryOperator, ColumnRef, Command, Expr, Phase, Policy, SubqueryMode, UnaryOperator, Value,
};
use crate::parser::names::{is_identity_column_name, is_tenant_column_name};

/// Phases a command checks.
pub fn phases(command: Command) -> &'static [Phase] {
    match command {
        Command::Select | Command::Delete => &[Phase::Read],
        Command::Insert => &[Phase::Write],
        Command::Update => &[Phase::Read, Phase::Write],
    }
}

/// Distinct expressions `policy` contributes to `command`.
pub fn governing_exprs(policy: &Policy, command: Command) -> Vec<&Expr> {
    let mut exprs: Vec<&Expr> = Vec::new();
    for phase in phases(command) {
        if let Some((_, expr)) = policy.governing(*phase) {
            if !exprs.iter().any(|e| std::ptr::eq(*e, expr)) {
                exprs.push(expr);
            }
        }
    }
    exprs
}

/// Column of the policy's own row, looking through `lower`/`upper`.
pub fn outer_column<'e>(expr: &'e Expr, table: &str) -> Option<&'e ColumnRef> {
    match expr.peel_case_normalization().0 {
        Expr::ColumnRef(col)
            if col.table.as_deref() == Some(table) && col.binding.as_deref() == Some(table) =>
        {
            Some(col)
        }
        _ => None,
    }
}

/// Session variable, looking through `lower`/`upper`.
pub fn session_var(expr: &Expr) -> Option<&str> {
    match expr.peel_case_normalization().0 {
        Expr::SessionVar { name } => Some(name),
        _ => None,
    }
}

/// Every `(left, op, right)` comparison in the tree.
pub fn comparisons(expr: &Expr) -> Vec<(&Expr, BinaryOperator, &Expr)> {
    let mut found = Vec::new();
    expr.walk(&mut |node| {
        if let Expr::BinaryOp { op, left, right } = node {
            if op.is_comparison() {
                found.push((&**left, *op, &**right));
            }
        }
    });
    found
}

/// Session variables compared with `=` or `<>`.
pub fn equality_session_vars(expr: &Expr) -> BTreeSet<&str> {
    comparisons(expr)
        .into_iter()
        .filter(|(_, op, _)| matches!(op, BinaryOperator::Eq | BinaryOperator::NotEq))
        .flat_map(|(l, _, r)| [session_var(l), session_var(r)])
        .flatten()
        .collect()
}

/// Whether some top-level disjunct tests a session variable with `IS NULL`.
pub fn has_null_guard(expr: &Expr) -> bool {
    expr.disjuncts().into_iter().any(|disjunct| {
        let mut guarded = false;
        disjunct.walk(&mut |node| {
            if let Expr::UnaryOp {
                op: UnaryOperator::IsNull,
                expr,
            } = node
            {
                if !expr.session_vars().is_empty() {
                    guarded = true;
                }
            }
        });
        guarded
    })
}

/// Columns of the policy's own row that are tested for equality or membership.
pub fn equality_columns<'e>(expr: &'e Expr, table: &str) -> Vec<&'e ColumnRef> {
    let mut cols = Vec::new();
    expr.walk(&mut |node| match node {
        Expr::BinaryOp {
            op: BinaryOperator::Eq,
            left,
            right,
        } => {
            cols.extend(outer_column(left, table));
            cols.extend(outer_column(right, table));
        }
        Expr::InList { expr, .. } => cols.extend(outer_column(expr, table)),
        Expr::Subquery(sub) => {
            if let SubqueryMode::In { expr } = &sub.mode {
                cols.extend(outer_column(expr, table));
            }
        }
        _ => {}
    });
    cols
}

/// Whether the expression scopes rows by an owner or tenant column.
pub fn restricts_identity(expr: &Expr, table: &str) -> bool {
    equality_columns(expr, table)
        .iter()
        .any(|col| is_identity_column_name(&col.column))
}

/// Tenant columns of the policy's own row compared against session input
/// or a subquery.
pub fn tenant_columns<'e>(expr: &'e Expr, table: &str) -> BTreeSet<&'e str> {
    let mut cols = BTreeSet::new();
    for (left, op, right) in comparisons(expr) {
        if op != BinaryOperator::Eq {
            continue;
        }
        for (col, other) in [(left, right), (right, left)] {
            if let Some(col) = outer_column(col, table) {
                if is_tenant_column_name(&col.column) && !other.session_vars().is_empty() {
                    cols.insert(col.column.as_str());
                }
            }
        }
    }
    expr.walk(&mut |node| {
        if let Expr::Subquery(sub) = node {
            if let SubqueryMode::In { expr } = &sub.mode {
                if let Some(col) = outer_column(expr, table) {
                    if is_tenant_column_name(&col.column) {
                        cols.insert(col.column.as_str());
                    }
                }
            }
        }
    });
    cols
}

/// Session variables compared against a tenant column of the policy's own row.
pub fn tenant_session_vars<'e>(expr: &'e Expr, table: &str) -> BTreeSet<&'e str> {
    let mut vars = BTreeSet::new();
    for (left, op, right) in comparisons(expr) {
        if op != BinaryOperator::Eq {
            continue;
        }
        for (col, other) in [(left, right), (right, left)] {
            if outer_column(col, table).is_some_and(|c| is_tenant_column_name(&c.column)) {
                vars.extend(other.session_vars());
            }
        }
    }
    vars
}

/// Literals compared against `column` of the policy's own row.
pub fn literals_for(expr: &Expr, table: &str, column: &str) -> Vec<Value> {
    let is_target = |e: &Expr| outer_column(e, table).is_some_and(|c| c.column == column);
    let literal = |e: &Expr| match e.peel_case_normalization().0 {
        Expr::Literal { value } => Some(value.clone()),
        _ => None,
    };
    let mut values = Vec::new();
    expr.walk(&mut |node| match node {
        Expr::BinaryOp { op, left, right } if op.is_comparison() => {
            if is_target(&**left) {
                values.extend(literal(&**right));
            }
            if is_target(&**right) {
                values.extend(literal(&**left));
            }
        }
        Expr::InList { expr, list } if is_target(&**expr) => {
            values.extend(list.iter().filter_map(|item| literal(item)));
        }
        _ => {}
    });
    values
}
