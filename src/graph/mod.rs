/// Strongly connected components and policy cycles.
pub mod cycles;
/// Table reference graph built from policy subqueries, with edge-list and JSON export.
pub mod dependency;

pub use cycles::{detect_cycles, strongly_connected_components, Cycle};
pub use dependency::{build_graph, DependencyGraph, Edge, GraphError};
