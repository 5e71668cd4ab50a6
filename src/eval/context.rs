use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::model::Value;
use crate::parser::names::{fold_identifier, normalize_identifier, normalize_session_var};

/// State of one session variable.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "value")]
pub enum SessionValue {
    /// Set to a concrete value.
    Known(Value),
    /// Set to NULL.
    Unknown,
    /// Never set. Reads as NULL, like `current_setting(name, true)`.
    Unset,
}

impl fmt::Display for SessionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionValue::Known(v) => write!(f, "{v}"),
            SessionValue::Unknown => f.write_str("NULL"),
            SessionValue::Unset => f.write_str("unset"),
        }
    }
}

static UNSET: SessionValue = SessionValue::Unset;

/// Immutable session state handed to every evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionContext {
    vars: BTreeMap<String, SessionValue>,
    role: Option<String>,
}

impl SessionContext {
    /// Empty context: every variable unset, no role.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a `{name: value|null}` map; `null` means UNKNOWN.
    pub fn from_values(values: &BTreeMap<String, Value>) -> Self {
        values
            .iter()
            .fold(Self::new(), |ctx, (name, value)| ctx.with_value(name, value.clone()))
    }

    /// Parse `k=v,k2=null` as accepted by `simulate --context`.
    pub fn parse_assignments(text: &str) -> Result<Self, String> {
        let mut ctx = Self::new();
        for entry in text.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let Some((name, raw)) = entry.split_once('=') else {
                return Err(format!("expected `name=value`, found `{entry}`"));
            };
            if name.trim().is_empty() {
                return Err(format!("empty variable name in `{entry}`"));
            }
            ctx = ctx.with_value(name, Value::parse_loose(raw));
        }
        Ok(ctx)
    }

    /// Copy with `name` set; `Value::Null` records UNKNOWN.
    pub fn with_value(mut self, name: &str, value: Value) -> Self {
        let state = if value.is_null() {
            SessionValue::Unknown
        } else {
            SessionValue::Known(value)
        };
        self.vars.insert(normalize_session_var(name), state);
        self
    }

    /// Copy with `name` set to UNKNOWN.
    pub fn with_unknown(self, name: &str) -> Self {
        self.with_value(name, Value::Null)
    }

    /// Copy with the active role set.
    pub fn with_role(mut self, role: &str) -> Self {
        self.role = Some(normalize_identifier(role));
        self
    }

    /// State of `name`.
    pub fn get(&self, name: &str) -> &SessionValue {
        self.vars.get(&normalize_session_var(name)).unwrap_or(&UNSET)
    }

    /// Value of `name` as seen by an expression; UNKNOWN and unset read as NULL.
    pub fn lookup(&self, name: &str) -> Value {
        match self.get(name) {
            SessionValue::Known(v) => v.clone(),
            SessionValue::Unknown | SessionValue::Unset => Value::Null,
        }
    }

    /// Active role, if any.
    pub fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }

    /// Explicitly set variables.
    pub fn vars(&self) -> &BTreeMap<String, SessionValue> {
        &self.vars
    }

    /// Render as `k=v,...`, the inverse of [`SessionContext::parse_assignments`].
    /// Unset variables are omitted.
    pub fn to_assignments(&self) -> String {
        self.vars
            .iter()
            .filter_map(|(name, state)| match state {
                SessionValue::Known(Value::Text(s)) => {
                    if Value::parse_loose(s) == Value::Text(s.clone()) {
                        Some(format!("{name}={s}"))
                    } else {
                        Some(format!("{name}='{s}'"))
                    }
                }
                SessionValue::Known(v) => Some(format!("{name}={v}")),
                SessionValue::Unknown => Some(format!("{name}=null")),
                SessionValue::Unset => None,
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// A candidate row: column name to value. Missing columns read as NULL.
pub type Row = BTreeMap<String, Value>;

/// Normalize the column keys of a row.
pub fn normalize_row(row: &BTreeMap<String, Value>) -> Row {
    row.iter()
        .map(|(k, v)| (fold_identifier(k), v.clone()))
        .collect()
}

/// Rows supplied for each table, visible to correlated subqueries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    tables: BTreeMap<String, Vec<Row>>,
}

impl Dataset {
    /// Empty dataset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy with `rows` appended to `table`.
    pub fn with_rows(mut self, table: &str, rows: Vec<Row>) -> Self {
        self.insert(table, rows);
        self
    }

    /// Append rows to `table`.
    pub fn insert(&mut self, table: &str, rows: Vec<Row>) {
        self.tables
            .entry(crate::parser::names::normalize_relation_name(table))
            .or_default()
            .extend(rows.iter().map(normalize_row));
    }

    /// Rows of `table`; empty when none were supplied.
    pub fn rows(&self, table: &str) -> &[Row] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or_default()
    }
}
