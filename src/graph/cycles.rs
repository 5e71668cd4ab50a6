use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::Serialize;
use tracing::debug;

use crate::graph::dependency::{DependencyGraph, Edge};

/// A set of tables whose policies reference each other.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Cycle {
    /// Member tables, sorted.
    pub tables: Vec<String>,
    /// Edges between members, with the policies responsible.
    pub edges: Vec<Edge>,
}

impl Cycle {
    /// Names of the responsible policies as `table.policy`, deduplicated.
    pub fn policies(&self) -> Vec<String> {
        self.edges
            .iter()
            .map(|e| format!("{}.{}", e.source, e.policy))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// A closed walk through the cycle starting at its smallest table,
    /// e.g. `documents -> memberships -> documents`.
    pub fn path(&self) -> Vec<String> {
        let Some(start) = self.tables.first() else {
            return Vec::new();
        };
        let mut adj: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for edge in &self.edges {
            adj.entry(edge.source.as_str())
                .or_default()
                .insert(edge.target.as_str());
        }
        if adj.get(start.as_str()).is_some_and(|t| t.contains(start.as_str())) {
            return vec![start.clone(), start.clone()];
        }

        // Shortest walk from `start` back to itself.
        let mut parent: BTreeMap<&str, &str> = BTreeMap::new();
        let mut queue = VecDeque::from([start.as_str()]);
        while let Some(current) = queue.pop_front() {
            for &next in adj.get(current).into_iter().flatten() {
                if next == start.as_str() {
                    let mut middle = Vec::new();
                    let mut node = current;
                    while node != start.as_str() {
                        middle.push(node.to_string());
                        node = parent.get(node).copied().unwrap_or(start.as_str());
                    }
                    middle.reverse();
                    let mut walk = vec![start.clone()];
                    walk.extend(middle);
                    walk.push(start.clone());
                    return walk;
                }
                if !parent.contains_key(next) {
                    parent.insert(next, current);
                    queue.push_back(next);
                }
            }
        }
        self.tables.clone()
    }

    /// `a -> b -> a`
    pub fn describe(&self) -> String {
        self.path().join(" -> ")
    }
}

struct Tarjan<'a> {
    adj: &'a BTreeMap<&'a str, BTreeSet<&'a str>>,
    index: usize,
    indices: BTreeMap<&'a str, usize>,
    lowlink: BTreeMap<&'a str, usize>,
    stack: Vec<&'a str>,
    on_stack: BTreeSet<&'a str>,
    components: Vec<Vec<&'a str>>,
}

impl<'a> Tarjan<'a> {
    fn visit(&mut self, node: &'a str) {
        self.indices.insert(node, self.index);
        self.lowlink.insert(node, self.index);
        self.index += 1;
        self.stack.push(node);
        self.on_stack.insert(node);

        let adj = self.adj;
        for &next in adj.get(node).into_iter().flatten() {
            if !self.indices.contains_key(next) {
                self.visit(next);
                let low = self.lowlink[node].min(self.lowlink[next]);
                self.lowlink.insert(node, low);
            } else if self.on_stack.contains(next) {
                let low = self.lowlink[node].min(self.indices[next]);
                self.lowlink.insert(node, low);
            }
        }

        if self.lowlink[node] == self.indices[node] {
            let mut component = Vec::new();
            while let Some(member) = self.stack.pop() {
                self.on_stack.remove(member);
                component.push(member);
                if member == node {
                    break;
                }
            }
            component.sort_unstable();
            self.components.push(component);
        }
    }
}

/// Tarjan's strongly connected components. Members are sorted within each
/// component and components are sorted by their first member.
pub fn strongly_connected_components(graph: &DependencyGraph) -> Vec<Vec<String>> {
    let adj = graph.adjacency();
    let mut tarjan = Tarjan {
        adj: &adj,
        index: 0,
        indices: BTreeMap::new(),
        lowlink: BTreeMap::new(),
        stack: Vec::new(),
        on_stack: BTreeSet::new(),
        components: Vec::new(),
    };
    for &node in adj.keys() {
        if !tarjan.indices.contains_key(node) {
            tarjan.visit(node);
        }
    }
    let mut components: Vec<Vec<String>> = tarjan
        .components
        .into_iter()
        .map(|c| c.into_iter().map(str::to_string).collect())
        .collect();
    components.sort();
    components
}

/// Every component of size > 1 and every self-loop, in table order.
pub fn detect_cycles(graph: &DependencyGraph) -> Vec<Cycle> {
    let mut cycles: Vec<Cycle> = strongly_connected_components(graph)
        .into_iter()
        .filter_map(|tables| {
            let members: BTreeSet<&str> = tables.iter().map(String::as_str).collect();
            let edges: Vec<Edge> = graph
                .edges()
                .iter()
                .filter(|e| members.contains(e.source.as_str()) && members.contains(e.target.as_str()))
                .cloned()
                .collect();
            let is_cycle = tables.len() > 1 || !edges.is_empty();
            is_cycle.then_some(Cycle { tables, edges })
        })
        .collect();
    cycles.sort();
    debug!(cycles = cycles.len(), "cycle detection finished");
    cycles
}
