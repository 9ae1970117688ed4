//! Dependency Graph
//!
//! Tracks which declarations must exist before others. The same graph is used
//! for resources inside a stack and for stacks inside an app. This enables:
//!
//! - Cycle detection with the members of each cycle
//! - Creation order (topological) and teardown order (reverse)
//! - Transitive dependency and dependent queries
//! - Graphviz export

use std::collections::{BTreeSet, HashMap, VecDeque};

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::error::{Error, Result};

/// A node in the graph: a logical id or a stack name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
    /// Logical id or stack name
    pub id: String,
    /// Resource type (`AWS::S3::Bucket`) or `Stack`
    pub kind: String,
}

/// How a dependency was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// `Ref`, `Fn::GetAtt` or `Fn::Sub` inside properties
    Reference,
    /// Explicit `DependsOn`
    Explicit,
    /// Cross-stack export consumed through `Fn::ImportValue`
    Export,
}

/// Directed graph where an edge runs from a prerequisite to its dependent.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: DiGraph<GraphNode, EdgeKind>,
    node_indices: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node, returning the existing index if the id is already known.
    pub fn add_node(&mut self, id: impl Into<String>, kind: impl Into<String>) -> NodeIndex {
        let id = id.into();
        if let Some(&idx) = self.node_indices.get(&id) {
            return idx;
        }
        let idx = self.graph.add_node(GraphNode {
            id: id.clone(),
            kind: kind.into(),
        });
        self.node_indices.insert(id, idx);
        idx
    }

    /// Records that `dependent` needs `prerequisite` to exist first.
    pub fn add_dependency(&mut self, dependent: &str, prerequisite: &str, kind: EdgeKind) -> Result<()> {
        let to_idx = *self
            .node_indices
            .get(dependent)
            .ok_or_else(|| Error::NotFound(dependent.to_string()))?;
        let from_idx = *self
            .node_indices
            .get(prerequisite)
            .ok_or_else(|| Error::DanglingReference {
                from: dependent.to_string(),
                to: prerequisite.to_string(),
            })?;

        if self.graph.find_edge(from_idx, to_idx).is_none() {
            self.graph.add_edge(from_idx, to_idx, kind);
        }
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.node_indices.contains_key(id)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn has_cycles(&self) -> bool {
        !self.cycles().is_empty()
    }

    /// Every strongly connected component that forms a cycle, including
    /// nodes that depend on themselves. Members are sorted.
    pub fn cycles(&self) -> Vec<Vec<String>> {
        let mut cycles: Vec<Vec<String>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1 || scc.iter().any(|&idx| self.graph.find_edge(idx, idx).is_some())
            })
            .map(|scc| {
                let mut members: Vec<String> = scc
                    .into_iter()
                    .filter_map(|idx| self.graph.node_weight(idx).map(|n| n.id.clone()))
                    .collect();
                members.sort();
                members
            })
            .collect();
        cycles.sort();
        cycles
    }

    /// Order in which declarations can be created.
    pub fn creation_order(&self) -> Result<Vec<String>> {
        match toposort(&self.graph, None) {
            Ok(order) => Ok(order
                .into_iter()
                .filter_map(|idx| self.graph.node_weight(idx).map(|n| n.id.clone()))
                .collect()),
            Err(_) => Err(Error::DependencyCycle {
                members: self.cycles().into_iter().next().unwrap_or_default(),
            }),
        }
    }

    /// Order in which declarations must be deleted: dependents first.
    pub fn teardown_order(&self) -> Result<Vec<String>> {
        let mut order = self.creation_order()?;
        order.reverse();
        Ok(order)
    }

    /// Direct prerequisites of a node, sorted.
    pub fn direct_dependencies(&self, id: &str) -> Vec<String> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Direct dependents of a node, sorted.
    pub fn direct_dependents(&self, id: &str) -> Vec<String> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// All nodes this node depends on, directly or transitively.
    pub fn dependencies(&self, id: &str) -> Vec<String> {
        self.walk(id, Direction::Incoming)
    }

    /// All nodes that depend on this node, directly or transitively.
    pub fn dependents(&self, id: &str) -> Vec<String> {
        self.walk(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &str, direction: Direction) -> Vec<String> {
        let found: BTreeSet<String> = self
            .node_indices
            .get(id)
            .map(|&idx| {
                self.graph
                    .neighbors_directed(idx, direction)
                    .filter_map(|n| self.graph.node_weight(n).map(|node| node.id.clone()))
                    .collect()
            })
            .unwrap_or_default();
        found.into_iter().collect()
    }

    fn walk(&self, id: &str, direction: Direction) -> Vec<String> {
        let mut found = BTreeSet::new();
        let mut queue = VecDeque::new();

        if let Some(&start_idx) = self.node_indices.get(id) {
            queue.push_back(start_idx);

            while let Some(current) = queue.pop_front() {
                for neighbor in self.graph.neighbors_directed(current, direction) {
                    if let Some(node) = self.graph.node_weight(neighbor) {
                        if node.id != id && found.insert(node.id.clone()) {
                            queue.push_back(neighbor);
                        }
                    }
                }
            }
        }

        found.into_iter().collect()
    }

    /// Graphviz representation, nodes in insertion order.
    pub fn to_dot(&self, name: &str) -> String {
        let mut output = String::new();
        output.push_str(&format!("digraph \"{}\" {{\n", name));
        output.push_str("  rankdir=LR;\n");
        output.push_str("  node [shape=box];\n\n");

        for idx in self.graph.node_indices() {
            if let Some(node) = self.graph.node_weight(idx) {
                let label = format!("{}\\n{}", node.id, node.kind);
                output.push_str(&format!("  \"{}\" [label=\"{}\"];\n", node.id, label));
            }
        }

        output.push('\n');

        let mut edges: Vec<(String, String, EdgeKind)> = self
            .graph
            .edge_references()
            .filter_map(|edge| {
                let source = self.graph.node_weight(edge.source())?;
                let target = self.graph.node_weight(edge.target())?;
                Some((source.id.clone(), target.id.clone(), *edge.weight()))
            })
            .collect();
        edges.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));

        for (source, target, kind) in edges {
            let style = match kind {
                EdgeKind::Reference => "solid",
                EdgeKind::Explicit => "dashed",
                EdgeKind::Export => "bold",
            };
            output.push_str(&format!(
                "  \"{}\" -> \"{}\" [style={}];\n",
                source, target, style
            ));
        }

        output.push_str("}\n");
        output
    }
}
