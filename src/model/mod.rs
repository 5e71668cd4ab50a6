/// Policy expression tree.
pub mod ast;
/// Fatal load errors.
pub mod error;
/// Policies, commands, dispositions and column binding.
pub mod policy;
/// Tables, columns and the optional index catalog.
pub mod schema;

pub use ast::{BinaryOperator, ColumnRef, Expr, Subquery, SubqueryMode, UnaryOperator, Value};
pub use error::{PolicyError, SchemaError};
pub use policy::{
    load_policies, Clause, Command, Diagnostic, DiagnosticKind, Disposition, Phase, Policy,
    PolicySet, PUBLIC_ROLE,
};
pub use schema::{load_schema, Column, Index, IndexCatalog, Schema, Table};
