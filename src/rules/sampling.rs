use std::collections::{BTreeMap, BTreeSet};

use crate::eval::context::Row;
use crate::model::{Column, Expr, Table, Value};
use crate::rules::predicates::literals_for;

/// Candidate values for each column referenced by a set of expressions.
///
/// A column's domain is the literals it is compared against, plus `NULL`
/// when nullable, `true`/`false` for booleans, and a placeholder of the
/// column's type. Extra values supplied through [`SampleSpace::with_values`]
/// come first.
#[derive(Debug, Clone, Default)]
pub struct SampleSpace {
    domains: BTreeMap<String, Vec<Value>>,
}

impl SampleSpace {
    /// Domains for the outer-row columns of `table` used in `exprs`.
    pub fn for_table<'e>(table: &Table, exprs: impl IntoIterator<Item = &'e Expr>) -> Self {
        let exprs: Vec<&Expr> = exprs.into_iter().collect();
        let mut used = BTreeSet::new();
        for expr in &exprs {
            for col in expr.column_refs() {
                if col.table.as_deref() == Some(table.name.as_str())
                    && col.binding.as_deref() == Some(table.name.as_str())
                {
                    used.insert(col.column.as_str());
                }
            }
        }

        let mut domains = BTreeMap::new();
        for name in used {
            let Some(column) = table.column(name) else {
                continue;
            };
            let mut domain = Vec::new();
            for expr in &exprs {
                for value in literals_for(expr, &table.name, name) {
                    push_unique(&mut domain, value);
                }
            }
            for value in type_domain(column) {
                push_unique(&mut domain, value);
            }
            domains.insert(name.to_string(), domain);
        }
        Self { domains }
    }

    /// Put `values` at the front of `column`'s domain.
    pub fn with_values(mut self, column: &str, values: impl IntoIterator<Item = Value>) -> Self {
        let domain = self.domains.entry(column.to_string()).or_default();
        let mut front: Vec<Value> = Vec::new();
        for value in values {
            push_unique(&mut front, value);
        }
        for value in domain.drain(..) {
            push_unique(&mut front, value);
        }
        *domain = front;
        self
    }

    /// Number of rows in the full cartesian product, saturating.
    pub fn size(&self) -> usize {
        self.domains
            .values()
            .fold(1usize, |acc, d| acc.saturating_mul(d.len().max(1)))
    }

    /// The first `limit` rows of the cartesian product, varying the last
    /// column fastest.
    pub fn rows(&self, limit: usize) -> Vec<Row> {
        let total = self.size().min(limit);
        let domains: Vec<(&String, &Vec<Value>)> = self
            .domains
            .iter()
            .filter(|(_, d)| !d.is_empty())
            .collect();
        (0..total)
            .map(|mut index| {
                let mut row = Row::new();
                for (name, domain) in domains.iter().rev() {
                    row.insert((*name).clone(), domain[index % domain.len()].clone());
                    index /= domain.len();
                }
                row
            })
            .collect()
    }
}

fn push_unique(domain: &mut Vec<Value>, value: Value) {
    if !domain.contains(&value) {
        domain.push(value);
    }
}

fn type_domain(column: &Column) -> Vec<Value> {
    let mut values = Vec::new();
    if column.nullable {
        values.push(Value::Null);
    }
    if column.is_boolean() {
        values.push(Value::Bool(true));
        values.push(Value::Bool(false));
    } else if column.is_numeric() {
        values.push(Value::Int(0));
    } else {
        values.push(Value::Text("sample".to_string()));
    }
    values
}
