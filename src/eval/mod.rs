/// Policy combination and per-policy outcomes.
pub mod combinator;
/// Session variables, rows and related-row datasets.
pub mod context;
/// Evaluation and simulation errors.
pub mod error;
/// Three-valued expression evaluator with runtime cycle detection.
pub mod evaluator;
/// Row-by-row simulation of a request document.
pub mod simulate;
/// Kleene three-valued logic.
pub mod trilean;

pub use combinator::{resolve_command, resolve_visibility, resolve_write, PolicyOutcome, Resolution};
pub use context::{Dataset, Row, SessionContext, SessionValue};
pub use error::{EvalError, SimulationError};
pub use evaluator::{evaluate, Evaluator, DEFAULT_MAX_DEPTH};
pub use simulate::{simulate, RowVerdict, SimulationRequest, SimulationResult};
pub use trilean::Trilean;
