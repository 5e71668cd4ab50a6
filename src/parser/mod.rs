/// JSON input documents (schema, policies, simulation requests).
pub mod document;
/// Policy expression text to [`crate::model::Expr`] lowering.
pub mod expr;
/// Identifier and table-name normalization helpers (schema-qualified names, quoted identifiers).
pub mod names;
