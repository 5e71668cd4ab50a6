use thiserror::Error;

use crate::model::policy::Clause;

/// Fatal errors raised while loading the schema document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// A table entry has an empty name.
    #[error("schema contains a table with an empty name")]
    EmptyTableName,
    /// Two table entries normalize to the same name.
    #[error("table `{table}` is defined more than once")]
    DuplicateTable {
        /// Offending table.
        table: String,
    },
    /// A column entry has an empty name.
    #[error("table `{table}` contains a column with an empty name")]
    EmptyColumnName {
        /// Owning table.
        table: String,
    },
    /// Two columns of one table normalize to the same name.
    #[error("column `{column}` is defined more than once on table `{table}`")]
    DuplicateColumn {
        /// Owning table.
        table: String,
        /// Offending column.
        column: String,
    },
    /// An index references a table that is not in the schema.
    #[error("index {index} references unknown table `{table}`")]
    IndexUnknownTable {
        /// Index label (name or position).
        index: String,
        /// Referenced table.
        table: String,
    },
    /// An index references a column its table does not declare.
    #[error("index {index} references unknown column `{table}.{column}`")]
    IndexUnknownColumn {
        /// Index label (name or position).
        index: String,
        /// Indexed table.
        table: String,
        /// Referenced column.
        column: String,
    },
    /// An index lists no columns.
    #[error("index {index} on `{table}` has no columns")]
    EmptyIndex {
        /// Index label (name or position).
        index: String,
        /// Indexed table.
        table: String,
    },
}

/// Fatal errors raised while loading the policy document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// The policy is attached to a table that is not in the schema.
    #[error("policy `{policy}` is attached to unknown table `{table}`")]
    UnknownTable {
        /// Referenced table.
        table: String,
        /// Offending policy.
        policy: String,
    },
    /// A subquery references a table that is not in the schema.
    #[error("policy `{policy}` on `{table}` ({clause}) references unknown table `{referenced}`")]
    UnknownSubqueryTable {
        /// Table the policy is attached to.
        table: String,
        /// Offending policy.
        policy: String,
        /// Clause containing the subquery.
        clause: Clause,
        /// Unknown table named by the subquery.
        referenced: String,
    },
    /// The policy name is empty.
    #[error("a policy on `{table}` has an empty name")]
    EmptyPolicyName {
        /// Table the policy is attached to.
        table: String,
    },
    /// Two policies on one table share a name.
    #[error("policy `{policy}` is defined more than once on `{table}`")]
    DuplicatePolicy {
        /// Table the policies are attached to.
        table: String,
        /// Duplicated name.
        policy: String,
    },
    /// The command list is empty.
    #[error("policy `{policy}` on `{table}` lists no commands")]
    NoCommands {
        /// Table the policy is attached to.
        table: String,
        /// Offending policy.
        policy: String,
    },
    /// A command is not one of `SELECT`, `INSERT`, `UPDATE`, `DELETE`, `ALL`.
    #[error("policy `{policy}` on `{table}` has invalid command `{command}`")]
    InvalidCommand {
        /// Table the policy is attached to.
        table: String,
        /// Offending policy.
        policy: String,
        /// Command as written.
        command: String,
    },
    /// The disposition is not `PERMISSIVE` or `RESTRICTIVE`.
    #[error("policy `{policy}` on `{table}` has invalid disposition `{disposition}`")]
    InvalidDisposition {
        /// Table the policy is attached to.
        table: String,
        /// Offending policy.
        policy: String,
        /// Disposition as written.
        disposition: String,
    },
    /// The policy has neither a `USING` nor a `WITH CHECK` expression.
    #[error("policy `{policy}` on `{table}` has neither USING nor WITH CHECK")]
    MissingExpression {
        /// Table the policy is attached to.
        table: String,
        /// Offending policy.
        policy: String,
    },
    /// A clause required by the policy's commands is absent.
    #[error("policy `{policy}` on `{table}` requires a {clause} expression: {reason}")]
    MissingClause {
        /// Table the policy is attached to.
        table: String,
        /// Offending policy.
        policy: String,
        /// Required clause.
        clause: Clause,
        /// Rule that requires it.
        reason: &'static str,
    },
    /// A clause is present that the policy's commands do not allow.
    #[error("policy `{policy}` on `{table}` must not have a {clause} expression: {reason}")]
    ForbiddenClause {
        /// Table the policy is attached to.
        table: String,
        /// Offending policy.
        policy: String,
        /// Forbidden clause.
        clause: Clause,
        /// Rule that forbids it.
        reason: &'static str,
    },
    /// Expression text could not be parsed.
    #[error("failed to parse {clause} of policy `{policy}` on `{table}`: {message}")]
    Parse {
        /// Table the policy is attached to.
        table: String,
        /// Offending policy.
        policy: String,
        /// Clause being parsed.
        clause: Clause,
        /// Parser message, including the location when known.
        message: String,
    },
}
