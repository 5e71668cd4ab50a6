use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ast::{Expr, Value};

/// Errors raised while reading or decoding an input document.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that failed to load.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The file is not a valid document of the expected shape.
    #[error("invalid {kind} document{}: {source}", describe_location(.location))]
    Json {
        /// Document kind (`schema`, `policy`, `simulation request`, `rows`).
        kind: &'static str,
        /// File the document came from, when known.
        location: Option<PathBuf>,
        /// Underlying decode error (carries line and column).
        source: serde_json::Error,
    },
}

fn describe_location(location: &Option<PathBuf>) -> String {
    location
        .as_ref()
        .map(|path| format!(" {}", path.display()))
        .unwrap_or_default()
}

/// Companion schema document: tables, typed columns and an optional index catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaDocument {
    /// Table definitions.
    pub tables: Vec<TableDefinition>,
    /// Index catalog; `None` when not supplied (distinct from an empty catalog).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexes: Option<Vec<IndexDefinition>>,
}

/// One table in the schema document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableDefinition {
    /// Table name, optionally schema-qualified.
    pub name: String,
    /// Ordered column list.
    pub columns: Vec<ColumnDefinition>,
}

/// One column in a table definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnDefinition {
    /// Column name.
    pub name: String,
    /// Declared SQL type (`uuid`, `text`, `boolean`, ...).
    #[serde(rename = "type")]
    pub data_type: String,
    /// Whether the column accepts NULL. Defaults to `true`, as in SQL.
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

/// One entry in the index catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexDefinition {
    /// Optional index name, for reporting.
    #[serde(default)]
    pub name: Option<String>,
    /// Indexed table.
    pub table: String,
    /// Indexed columns in key order.
    pub columns: Vec<String>,
}

/// Policy definition document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyDocument {
    /// Functions that read the session context, mapped to the variable they
    /// expose (e.g. `"current_user_id": "user_id"`).
    #[serde(default)]
    pub session_functions: BTreeMap<String, String>,
    /// One record per policy.
    pub policies: Vec<PolicyDefinition>,
}

/// One policy record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyDefinition {
    /// Table the policy is attached to.
    pub table: String,
    /// Policy name, unique per table.
    pub policy_name: String,
    /// Commands (`SELECT`, `INSERT`, `UPDATE`, `DELETE`, `ALL`). Defaults to `ALL`.
    #[serde(default = "default_commands")]
    pub commands: Vec<String>,
    /// `PERMISSIVE` (default) or `RESTRICTIVE`.
    #[serde(default)]
    pub disposition: Option<String>,
    /// Roles the policy applies to. Empty means `PUBLIC`.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Read filter.
    #[serde(default)]
    pub using_expr: Option<ExprSource>,
    /// Write filter.
    #[serde(default)]
    pub with_check_expr: Option<ExprSource>,
}

fn default_commands() -> Vec<String> {
    vec!["ALL".to_string()]
}

/// A policy expression given either as grammar text or as a pre-parsed tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExprSource {
    /// Expression text in the policy grammar.
    Text(String),
    /// Pre-parsed expression tree.
    Ast(Expr),
}

/// Simulation request document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationRequestDocument {
    /// Table whose rows are checked.
    #[serde(default)]
    pub table: Option<String>,
    /// Command to simulate. Defaults to `SELECT`.
    #[serde(default)]
    pub command: Option<String>,
    /// Active role; only `PUBLIC` policies apply when absent.
    #[serde(default)]
    pub role: Option<String>,
    /// Session variables; `null` means UNKNOWN, absent means unset.
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
    /// Rows of `table` to evaluate.
    #[serde(default)]
    pub candidate_rows: Vec<BTreeMap<String, Value>>,
    /// Rows of other tables, visible to correlated subqueries.
    #[serde(default)]
    pub related_rows: BTreeMap<String, Vec<BTreeMap<String, Value>>>,
}

/// Decode a JSON document from a string.
pub fn parse_json<T: DeserializeOwned>(kind: &'static str, text: &str) -> Result<T, DocumentError> {
    serde_json::from_str(text).map_err(|source| DocumentError::Json {
        kind,
        location: None,
        source,
    })
}

/// Read and decode a JSON document from disk.
pub fn read_json<T: DeserializeOwned>(kind: &'static str, path: &Path) -> Result<T, DocumentError> {
    let text = std::fs::read_to_string(path).map_err(|source| DocumentError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| DocumentError::Json {
        kind,
        location: Some(path.to_path_buf()),
        source,
    })
}
