//! # Concept Graphs
//!
//! Weighted undirected graphs over the concepts that survive preparation.
//! Nodes are dense indices into [`PreparedNodes::ids`]; the graph itself
//! carries no names so layout code can stay index-only.
//!
//! Two topologies:
//!
//! | Mode | Edges | Same graph for both spaces? |
//! |------|-------|-----------------------------|
//! | `Shared` | relationship table rows | yes |
//! | `Independent` | k-NN on cosine distance, per space | no |

pub mod builder;
pub mod knn;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub use builder::{DataIssue, ExclusionReport, GraphBuilder, PreparedNodes};

/// Where a graph's edges come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyMode {
    /// Both spaces use the relationship table.
    Shared,
    /// Each space derives its own k-NN graph from its embeddings.
    Independent,
}

impl std::fmt::Display for TopologyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopologyMode::Shared => f.write_str("shared"),
            TopologyMode::Independent => f.write_str("independent"),
        }
    }
}

/// One half of an undirected edge, stored on its source node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub target: usize,
    /// Semantic distance the weight was derived from.
    pub distance: f64,
    /// Attraction strength, monotonically decreasing in `distance`.
    pub weight: f64,
}

/// Weighted undirected graph without self-loops or parallel edges.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConceptGraph {
    adjacency: Vec<SmallVec<[Edge; 8]>>,
    edge_count: usize,
}

impl ConceptGraph {
    /// A graph with `n` isolated nodes.
    pub fn with_nodes(n: usize) -> Self {
        Self {
            adjacency: vec![SmallVec::new(); n],
            edge_count: 0,
        }
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn neighbors(&self, node: usize) -> &[Edge] {
        &self.adjacency[node]
    }

    pub fn degree(&self, node: usize) -> usize {
        self.adjacency[node].len()
    }

    pub fn edge(&self, a: usize, b: usize) -> Option<&Edge> {
        self.adjacency.get(a)?.iter().find(|e| e.target == b)
    }

    pub fn has_edge(&self, a: usize, b: usize) -> bool {
        self.edge(a, b).is_some()
    }

    /// Insert an undirected edge.
    ///
    /// Self-loops are refused. If the pair is already connected, the
    /// shorter distance (stronger weight) wins. Returns true when a new
    /// edge was created.
    pub fn add_edge(&mut self, a: usize, b: usize, distance: f64, weight: f64) -> bool {
        if a == b {
            return false;
        }
        if let Some(existing) = self.edge(a, b).map(|e| e.distance) {
            if distance < existing {
                for (from, to) in [(a, b), (b, a)] {
                    if let Some(e) = self.adjacency[from].iter_mut().find(|e| e.target == to) {
                        e.distance = distance;
                        e.weight = weight;
                    }
                }
            }
            return false;
        }
        self.adjacency[a].push(Edge { target: b, distance, weight });
        self.adjacency[b].push(Edge { target: a, distance, weight });
        self.edge_count += 1;
        true
    }

    /// Every undirected edge once, as `(low, high, edge)`.
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize, &Edge)> + '_ {
        self.adjacency.iter().enumerate().flat_map(|(a, edges)| {
            edges.iter().filter(move |e| e.target > a).map(move |e| (a, e.target, e))
        })
    }

    pub fn isolated_count(&self) -> usize {
        self.adjacency.iter().filter(|e| e.is_empty()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_edge_is_symmetric() {
        let mut g = ConceptGraph::with_nodes(3);
        assert!(g.add_edge(0, 2, 0.5, 1.0));
        assert!(g.has_edge(0, 2));
        assert!(g.has_edge(2, 0));
        assert_eq!(g.edge_count(), 1);
        assert_eq!(g.isolated_count(), 1);
    }

    #[test]
    fn test_self_loop_refused() {
        let mut g = ConceptGraph::with_nodes(2);
        assert!(!g.add_edge(1, 1, 0.0, 10.0));
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn test_duplicate_keeps_shorter_distance() {
        let mut g = ConceptGraph::with_nodes(2);
        g.add_edge(0, 1, 0.8, 1.0);
        assert!(!g.add_edge(1, 0, 0.2, 3.0));
        assert_eq!(g.edge_count(), 1);
        assert_eq!(g.edge(0, 1).unwrap().distance, 0.2);
        assert_eq!(g.edge(1, 0).unwrap().weight, 3.0);

        g.add_edge(0, 1, 0.9, 0.5);
        assert_eq!(g.edge(0, 1).unwrap().distance, 0.2);
    }

    #[test]
    fn test_edges_iterates_each_once() {
        let mut g = ConceptGraph::with_nodes(4);
        g.add_edge(0, 1, 0.1, 1.0);
        g.add_edge(2, 1, 0.1, 1.0);
        g.add_edge(3, 0, 0.1, 1.0);
        let mut pairs: Vec<(usize, usize)> = g.edges().map(|(a, b, _)| (a, b)).collect();
        pairs.sort();
        assert_eq!(pairs, vec![(0, 1), (0, 3), (1, 2)]);
    }
}
