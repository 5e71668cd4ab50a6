use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt::Write;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::model::PolicySet;

/// Malformed graph export.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// A line did not have one (isolated node) or three tab-separated fields.
    #[error("line {line}: expected `source\\ttarget\\tpolicy` or a single table name, found {fields} fields")]
    MalformedLine {
        /// One-based line number.
        line: usize,
        /// Number of fields found.
        fields: usize,
    },
    /// A field was empty.
    #[error("line {line}: empty field")]
    EmptyField {
        /// One-based line number.
        line: usize,
    },
    /// JSON export could not be decoded.
    #[error("invalid graph json: {0}")]
    Json(String),
}

/// Directed edge `source -> target`, contributed by `policy` on `source`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Edge {
    /// Table carrying the policy.
    pub source: String,
    /// Table referenced by a subquery.
    pub target: String,
    /// Policy containing the subquery.
    pub policy: String,
}

/// Table-to-table reference graph derived from policy subqueries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyGraph {
    nodes: BTreeSet<String>,
    edges: BTreeSet<Edge>,
}

impl DependencyGraph {
    /// Add a node with no edges.
    pub fn add_node(&mut self, table: &str) {
        self.nodes.insert(table.to_string());
    }

    /// Add an edge (and both endpoints).
    pub fn add_edge(&mut self, source: &str, target: &str, policy: &str) {
        self.nodes.insert(source.to_string());
        self.nodes.insert(target.to_string());
        self.edges.insert(Edge {
            source: source.to_string(),
            target: target.to_string(),
            policy: policy.to_string(),
        });
    }

    /// Nodes in name order.
    pub fn nodes(&self) -> &BTreeSet<String> {
        &self.nodes
    }

    /// Edges in `(source, target, policy)` order.
    pub fn edges(&self) -> &BTreeSet<Edge> {
        &self.edges
    }

    /// Distinct direct targets of `table`.
    pub fn successors(&self, table: &str) -> BTreeSet<&str> {
        self.edges
            .iter()
            .filter(|e| e.source == table)
            .map(|e| e.target.as_str())
            .collect()
    }

    /// Adjacency map over distinct targets.
    pub fn adjacency(&self) -> BTreeMap<&str, BTreeSet<&str>> {
        let mut adj: BTreeMap<&str, BTreeSet<&str>> =
            self.nodes.iter().map(|n| (n.as_str(), BTreeSet::new())).collect();
        for edge in &self.edges {
            adj.entry(edge.source.as_str())
                .or_default()
                .insert(edge.target.as_str());
        }
        adj
    }

    /// Tables transitively referenced from `table`. `table` itself is only
    /// included when it lies on a cycle.
    pub fn reachable_from(&self, table: &str) -> BTreeSet<&str> {
        let adj = self.adjacency();
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&str> = adj
            .get(table)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            if let Some(next) = adj.get(current) {
                queue.extend(next.iter().copied().filter(|n| !seen.contains(n)));
            }
        }
        seen
    }

    /// Tab-separated edge list. Nodes without edges are written as a
    /// single field so they survive a round-trip.
    pub fn to_edge_list(&self) -> String {
        let mut out = String::new();
        writeln!(out, "# source\ttarget\tpolicy").unwrap();
        let connected: BTreeSet<&str> = self
            .edges
            .iter()
            .flat_map(|e| [e.source.as_str(), e.target.as_str()])
            .collect();
        for node in &self.nodes {
            if !connected.contains(node.as_str()) {
                writeln!(out, "{node}").unwrap();
            }
        }
        for edge in &self.edges {
            writeln!(out, "{}\t{}\t{}", edge.source, edge.target, edge.policy).unwrap();
        }
        out
    }

    /// Parse the format written by [`DependencyGraph::to_edge_list`].
    /// Blank lines and `#` comments are ignored.
    pub fn from_edge_list(text: &str) -> Result<Self, GraphError> {
        let mut graph = DependencyGraph::default();
        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = trimmed.split('\t').map(str::trim).collect();
            if fields.iter().any(|f| f.is_empty()) {
                return Err(GraphError::EmptyField { line });
            }
            match fields.as_slice() {
                [node] => graph.add_node(node),
                [source, target, policy] => graph.add_edge(source, target, policy),
                _ => {
                    return Err(GraphError::MalformedLine {
                        line,
                        fields: fields.len(),
                    })
                }
            }
        }
        Ok(graph)
    }

    /// Pretty JSON export: `{"nodes": [...], "edges": [{source, target, policy}]}`.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Parse the JSON export.
    pub fn from_json(text: &str) -> Result<Self, GraphError> {
        let mut graph: DependencyGraph =
            serde_json::from_str(text).map_err(|e| GraphError::Json(e.to_string()))?;
        let endpoints: Vec<String> = graph
            .edges
            .iter()
            .flat_map(|e| [e.source.clone(), e.target.clone()])
            .collect();
        graph.nodes.extend(endpoints);
        Ok(graph)
    }
}

/// Derive the graph from every policy's `USING` and `WITH CHECK` trees.
///
/// Every table with a policy is a node. Each subquery on `T` inside a policy
/// on `S`, nested ones included, adds `S -> T`: reading `T` applies `T`'s own
/// policies, which is where the next hop starts.
pub fn build_graph(policies: &PolicySet) -> DependencyGraph {
    let mut graph = DependencyGraph::default();
    for policy in policies.policies() {
        graph.add_node(&policy.table);
        for (_, expr) in policy.expressions() {
            for sub in expr.subqueries() {
                graph.add_edge(&policy.table, &sub.table, &policy.name);
            }
        }
    }
    debug!(
        nodes = graph.nodes.len(),
        edges = graph.edges.len(),
        "dependency graph built"
    );
    graph
}
