//! GraphBuilder: from concepts and relationship rows to per-space graphs.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::GraphConfig;
use crate::model::*;
use crate::{Error, Result};
use super::{knn, ConceptGraph, TopologyMode};

// ============================================================================
// Data issues
// ============================================================================

/// A concept- or row-level problem that was recovered by exclusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum DataIssue {
    MissingEmbedding { concept: ConceptId, space: Space },
    ZeroNorm { concept: ConceptId, space: Space },
    NonFinite { concept: ConceptId, space: Space },
    DimensionMismatch { concept: ConceptId, space: Space, expected: usize, actual: usize },
    /// A relationship row points at a concept that is not in the node set.
    DanglingRelationship { a: ConceptId, b: ConceptId, missing: ConceptId },
    InvalidDistance { a: ConceptId, b: ConceptId, distance: f64 },
    SelfLoop { concept: ConceptId },
}

impl DataIssue {
    /// The concept this issue removed from the node set, if any.
    pub fn excluded_concept(&self) -> Option<&ConceptId> {
        match self {
            DataIssue::MissingEmbedding { concept, .. }
            | DataIssue::ZeroNorm { concept, .. }
            | DataIssue::NonFinite { concept, .. }
            | DataIssue::DimensionMismatch { concept, .. } => Some(concept),
            _ => None,
        }
    }
}

impl std::fmt::Display for DataIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataIssue::MissingEmbedding { concept, space } => {
                write!(f, "'{concept}' has no {space} embedding")
            }
            DataIssue::ZeroNorm { concept, space } => {
                write!(f, "'{concept}' has a zero-norm {space} embedding")
            }
            DataIssue::NonFinite { concept, space } => {
                write!(f, "'{concept}' has non-finite values in its {space} embedding")
            }
            DataIssue::DimensionMismatch { concept, space, expected, actual } => write!(
                f,
                "'{concept}' {space} embedding has {actual} dimensions, expected {expected}"
            ),
            DataIssue::DanglingRelationship { a, b, missing } => {
                write!(f, "relationship {a} <-> {b} references excluded or unknown '{missing}'")
            }
            DataIssue::InvalidDistance { a, b, distance } => {
                write!(f, "relationship {a} <-> {b} has invalid distance {distance}")
            }
            DataIssue::SelfLoop { concept } => write!(f, "relationship {concept} <-> {concept} is a self-loop"),
        }
    }
}

/// Everything that was dropped while preparing one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExclusionReport {
    pub issues: Vec<DataIssue>,
}

impl ExclusionReport {
    pub fn record(&mut self, issue: DataIssue) {
        warn!(%issue, "excluded from layout");
        self.issues.push(issue);
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// Distinct concepts removed from the node set.
    pub fn excluded_concepts(&self) -> Vec<&ConceptId> {
        let mut out: Vec<&ConceptId> = self.issues.iter().filter_map(DataIssue::excluded_concept).collect();
        out.sort();
        out.dedup();
        out
    }

    pub fn dropped_relationships(&self) -> usize {
        self.issues.iter().filter(|i| i.excluded_concept().is_none()).count()
    }

    /// Why `id` is missing from the node set, if it was excluded.
    pub fn reason_for(&self, id: &str) -> Option<&DataIssue> {
        self.issues
            .iter()
            .find(|i| i.excluded_concept().is_some_and(|c| c.as_str() == id))
    }
}

// ============================================================================
// Prepared nodes
// ============================================================================

/// The node set of one run: concepts with a usable embedding in every
/// required space, in snapshot order.
#[derive(Debug, Clone, Default)]
pub struct PreparedNodes {
    pub ids: Vec<ConceptId>,
    index: HashMap<ConceptId, usize>,
    /// Embeddings as f64, row-aligned with `ids`. Empty for spaces that
    /// were not required.
    pub vectors: PerSpace<Vec<Vec<f64>>>,
    pub spaces: Vec<Space>,
}

impl PreparedNodes {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn vectors(&self, space: Space) -> &[Vec<f64>] {
        self.vectors.get(space)
    }
}

// ============================================================================
// GraphBuilder
// ============================================================================

/// Builds node sets and graphs. Holds no state beyond its configuration.
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    config: GraphConfig,
}

impl GraphBuilder {
    pub fn new(config: GraphConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Keep the concepts that have a finite, non-zero embedding of the
    /// space's common dimension in every space listed in `spaces`.
    ///
    /// The common dimension of a space is the dimension of the first valid
    /// embedding seen in snapshot order.
    pub fn prepare(&self, concepts: &[Concept], spaces: &[Space], report: &mut ExclusionReport) -> PreparedNodes {
        let mut dims: PerSpace<Option<usize>> = PerSpace::default();
        let mut nodes = PreparedNodes { spaces: spaces.to_vec(), ..PreparedNodes::default() };

        'concepts: for concept in concepts {
            let mut rows: Vec<(Space, Vec<f64>)> = Vec::with_capacity(spaces.len());
            for &space in spaces {
                let Some(raw) = concept.embedding(space) else {
                    report.record(DataIssue::MissingEmbedding { concept: concept.id.clone(), space });
                    continue 'concepts;
                };
                if raw.iter().any(|x| !x.is_finite()) {
                    report.record(DataIssue::NonFinite { concept: concept.id.clone(), space });
                    continue 'concepts;
                }
                if raw.is_empty() || raw.iter().all(|x| *x == 0.0) {
                    report.record(DataIssue::ZeroNorm { concept: concept.id.clone(), space });
                    continue 'concepts;
                }
                if let Some(expected) = *dims.get(space) {
                    if raw.len() != expected {
                        report.record(DataIssue::DimensionMismatch {
                            concept: concept.id.clone(),
                            space,
                            expected,
                            actual: raw.len(),
                        });
                        continue 'concepts;
                    }
                }
                rows.push((space, raw.iter().map(|&x| f64::from(x)).collect()));
            }

            for (space, row) in rows {
                let dim = dims.get_mut(space);
                if dim.is_none() {
                    *dim = Some(row.len());
                }
                nodes.vectors.get_mut(space).push(row);
            }
            nodes.index.insert(concept.id.clone(), nodes.ids.len());
            nodes.ids.push(concept.id.clone());
        }

        debug!(kept = nodes.len(), total = concepts.len(), "prepared node set");
        nodes
    }

    /// Graph from relationship rows restricted to the node set.
    pub fn shared(&self, nodes: &PreparedNodes, relationships: &[Relationship], report: &mut ExclusionReport) -> ConceptGraph {
        let mut graph = ConceptGraph::with_nodes(nodes.len());
        for rel in relationships {
            if rel.is_self_loop() {
                report.record(DataIssue::SelfLoop { concept: rel.a.clone() });
                continue;
            }
            if !(rel.distance.is_finite() && rel.distance >= 0.0) {
                report.record(DataIssue::InvalidDistance {
                    a: rel.a.clone(),
                    b: rel.b.clone(),
                    distance: rel.distance,
                });
                continue;
            }
            let (Some(a), Some(b)) = (nodes.index_of(rel.a.as_str()), nodes.index_of(rel.b.as_str())) else {
                let missing = if nodes.index_of(rel.a.as_str()).is_none() { &rel.a } else { &rel.b };
                report.record(DataIssue::DanglingRelationship {
                    a: rel.a.clone(),
                    b: rel.b.clone(),
                    missing: missing.clone(),
                });
                continue;
            };
            graph.add_edge(a, b, rel.distance, self.config.weight(rel.distance));
        }
        graph
    }

    /// k-NN graph on cosine distance, symmetrized by union.
    ///
    /// Every node gets edges to its `knn_k` nearest others (fewer only when
    /// the space has fewer than `knn_k + 1` nodes), so after the union every
    /// degree is at least `min(knn_k, n - 1)`. Rows must come from
    /// [`GraphBuilder::prepare`]; a zero-norm row is a data error.
    pub fn independent(&self, vectors: &[Vec<f64>]) -> Result<ConceptGraph> {
        let n = vectors.len();
        let distances = knn::cosine_distances(vectors)
            .ok_or_else(|| Error::Data("k-NN graph input contains a zero-norm embedding".into()))?;
        let mut graph = ConceptGraph::with_nodes(n);
        for (i, row) in distances.iter().enumerate() {
            for (j, d) in knn::nearest(row, i, self.config.knn_k) {
                graph.add_edge(i, j, d, self.config.weight(d));
            }
        }
        Ok(graph)
    }

    /// Graphs for both spaces under `topology`.
    pub fn build(
        &self,
        topology: TopologyMode,
        nodes: &PreparedNodes,
        relationships: &[Relationship],
        report: &mut ExclusionReport,
    ) -> Result<PerSpace<ConceptGraph>> {
        let graphs = match topology {
            TopologyMode::Shared => {
                let graph = self.shared(nodes, relationships, report);
                PerSpace::new(graph.clone(), graph)
            }
            TopologyMode::Independent => PerSpace::new(
                self.independent(nodes.vectors(Space::Baseline))?,
                self.independent(nodes.vectors(Space::Comparison))?,
            ),
        };
        info!(
            %topology,
            nodes = nodes.len(),
            baseline_edges = graphs.baseline.edge_count(),
            comparison_edges = graphs.comparison.edge_count(),
            "built concept graphs"
        );
        Ok(graphs)
    }
}

// ============================================================================
// Tests
// ============================================================================
