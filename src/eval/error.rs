use thiserror::Error;

/// Failure of a single evaluation call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    /// A correlated subquery walk re-entered a table already being evaluated.
    #[error("policy cycle reached at runtime: {}", .path.join(" -> "))]
    CycleDetectedAtRuntime {
        /// Tables on the active stack, ending with the revisited one.
        path: Vec<String>,
    },
    /// Nested subquery evaluation went deeper than the configured budget.
    #[error("subquery nesting exceeded depth budget of {max_depth} at `{table}`")]
    DepthExceeded {
        /// Configured budget.
        max_depth: usize,
        /// Table that would have been entered.
        table: String,
    },
    /// Operands cannot be compared.
    #[error("cannot compare {left} with {right} using {op}")]
    TypeMismatch {
        /// Operator.
        op: String,
        /// Left operand type.
        left: &'static str,
        /// Right operand type.
        right: &'static str,
    },
    /// An operand that must be boolean was not.
    #[error("expected a boolean, found {found} in `{expr}`")]
    NotBoolean {
        /// Type found.
        found: &'static str,
        /// Offending expression.
        expr: String,
    },
}

/// Fatal problems with a simulation request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimulationError {
    /// The request names a table absent from the schema.
    #[error("simulation table `{0}` is not in the schema")]
    UnknownTable(String),
    /// The request names no table.
    #[error("simulation request does not name a table")]
    MissingTable,
    /// The command is not a SQL command.
    #[error("invalid simulation command: {0}")]
    InvalidCommand(String),
}
