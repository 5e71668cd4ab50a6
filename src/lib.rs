//! Static analysis and visibility simulation for `PostgreSQL` row-level security policies.
#![warn(missing_docs)]

/// Loading input documents and running a full analysis.
pub mod analysis;
/// Analyzer configuration.
pub mod config;
/// Three-valued evaluation, policy combination, and simulation.
pub mod eval;
/// Table reference graph and cycle detection.
pub mod graph;
/// Expression AST, schema, and policy model.
pub mod model;
/// Report rendering and output.
pub mod output;
/// Input documents, expression parsing, and identifier normalization.
pub mod parser;
/// Anti-pattern rules and the rule engine.
pub mod rules;
