//! Output artifacts. Everything here is plain serializable data handed to
//! renderers; none of it is read back by the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::align::AlignmentMode;
use crate::distortion::DistortionTier;
use crate::graph::{ExclusionReport, TopologyMode};
use crate::layout::LayoutMode;
use crate::model::{ConceptId, Coord, Direction, Space};

// ============================================================================
// Dual-space layout
// ============================================================================

/// Coordinates of one concept from a force-directed dual layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphModeCoordinates {
    #[serde(rename = "pos_A")]
    pub pos_a: Coord,
    /// Comparison position after alignment.
    #[serde(rename = "pos_B")]
    pub pos_b: Coord,
    /// Amplified comparison position.
    #[serde(rename = "pos_B_organic")]
    pub pos_b_organic: Coord,
    pub drift: f64,
}

/// Coordinates of one concept from a manifold dual layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifoldModeCoordinates {
    #[serde(rename = "pos_A_umap")]
    pub pos_a_umap: Coord,
    #[serde(rename = "pos_B_umap")]
    pub pos_b_umap: Coord,
    #[serde(rename = "pos_B_organic")]
    pub pos_b_organic: Coord,
    pub drift_umap: f64,
}

/// Mode-specific coordinates. Each variant carries exactly the fields its
/// layout mode produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "layout", rename_all = "snake_case")]
pub enum ModeCoordinates {
    #[serde(rename = "force_directed")]
    Graph(GraphModeCoordinates),
    Manifold(ManifoldModeCoordinates),
}

impl ModeCoordinates {
    pub fn baseline(&self) -> Coord {
        match self {
            ModeCoordinates::Graph(c) => c.pos_a,
            ModeCoordinates::Manifold(c) => c.pos_a_umap,
        }
    }

    pub fn aligned(&self) -> Coord {
        match self {
            ModeCoordinates::Graph(c) => c.pos_b,
            ModeCoordinates::Manifold(c) => c.pos_b_umap,
        }
    }

    pub fn amplified(&self) -> Coord {
        match self {
            ModeCoordinates::Graph(c) => c.pos_b_organic,
            ModeCoordinates::Manifold(c) => c.pos_b_organic,
        }
    }

    pub fn drift(&self) -> f64 {
        match self {
            ModeCoordinates::Graph(c) => c.drift,
            ModeCoordinates::Manifold(c) => c.drift_umap,
        }
    }

    /// Position in `space` (aligned for the comparison space).
    pub fn position(&self, space: Space) -> Coord {
        match space {
            Space::Baseline => self.baseline(),
            Space::Comparison => self.aligned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DualNode {
    pub name: ConceptId,
    #[serde(flatten)]
    pub coordinates: ModeCoordinates,
    /// Mean relationship distance; absent when the concept has no rows.
    #[serde(rename = "avgDistance")]
    pub avg_distance: Option<f64>,
    pub connections: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DualMetadata {
    /// Mode-scoped: only comparable with disparities of the same `alignment_mode`.
    pub disparity: f64,
    pub num_concepts: usize,
    pub topology: TopologyMode,
    pub layout: LayoutMode,
    pub alignment_mode: AlignmentMode,
    pub reflected: bool,
    pub amplification: f64,
    pub mean_drift: f64,
    pub max_drift: f64,
    pub baseline_model: String,
    pub comparison_model: String,
    pub method: String,
    pub revision: u64,
    pub computed_at: DateTime<Utc>,
}

/// Hull faces of both aligned point sets. Indices point into `nodes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HullFaces {
    pub baseline: Option<Vec<[usize; 3]>>,
    pub comparison: Option<Vec<[usize; 3]>>,
}

/// A dual-space layout, nodes sorted by drift, largest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DualLayout {
    pub nodes: Vec<DualNode>,
    pub metadata: DualMetadata,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub hulls: Option<HullFaces>,
    pub exclusions: ExclusionReport,
}

impl DualLayout {
    pub fn node(&self, name: &str) -> Option<&DualNode> {
        self.nodes.iter().find(|n| n.name.as_str() == name)
    }
}

// ============================================================================
// Single-space layout
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeEdge {
    pub target: ConceptId,
    pub weight: f64,
    pub distance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleNode {
    pub name: ConceptId,
    pub position: Coord,
    #[serde(rename = "avgDistance")]
    pub avg_distance: Option<f64>,
    pub connections: usize,
    pub edges: Vec<NodeEdge>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRow {
    pub source: ConceptId,
    pub target: ConceptId,
    pub distance: f64,
    pub annotation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleMetadata {
    pub space: Space,
    pub model: String,
    pub layout: LayoutMode,
    pub total_nodes: usize,
    pub total_edges: usize,
    pub method: String,
    pub revision: u64,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleSpaceLayout {
    pub nodes: Vec<SingleNode>,
    pub edges: Vec<EdgeRow>,
    pub metadata: SingleMetadata,
    pub exclusions: ExclusionReport,
}

impl SingleSpaceLayout {
    pub fn node(&self, name: &str) -> Option<&SingleNode> {
        self.nodes.iter().find(|n| n.name.as_str() == name)
    }
}

// ============================================================================
// Queries
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailEdge {
    pub target: ConceptId,
    /// Raw high-dimensional distance from the relationship row.
    pub distance: f64,
    pub comparison_distance: Option<f64>,
    pub direction: Direction,
    pub annotation: Option<String>,
    /// Rendered distance and tier, when the detail was taken against a layout.
    pub rendered_distance: Option<f64>,
    pub distortion: Option<DistortionTier>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptDetail {
    pub name: ConceptId,
    pub definition: Option<String>,
    #[serde(rename = "avgDistance")]
    pub avg_distance: Option<f64>,
    /// Absent unless taken against a layout that contains the concept.
    pub drift: Option<f64>,
    pub position: Option<Coord>,
    pub relationships: Vec<DetailEdge>,
    pub relationship_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborEntry {
    pub name: ConceptId,
    pub distance: f64,
    /// Whether a relationship row connects the two concepts.
    pub linked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub name: ConceptId,
    /// Baseline position, when a baseline layout has been computed.
    pub position: Option<Coord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtlasStats {
    pub concepts: usize,
    pub relationships: usize,
    #[serde(rename = "avgDistance")]
    pub avg_distance: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DivergentEdge {
    pub a: ConceptId,
    pub b: ConceptId,
    pub distance: f64,
    pub comparison_distance: f64,
    pub delta: f64,
    pub annotation: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_graph_node_wire_shape() {
        let node = DualNode {
            name: "love".into(),
            coordinates: ModeCoordinates::Graph(GraphModeCoordinates {
                pos_a: [1.0, 2.0, 3.0],
                pos_b: [1.5, 2.0, 3.0],
                pos_b_organic: [2.5, 2.0, 3.0],
                drift: 0.5,
            }),
            avg_distance: None,
            connections: 0,
        };
        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(
            value,
            json!({
                "name": "love",
                "layout": "force_directed",
                "pos_A": [1.0, 2.0, 3.0],
                "pos_B": [1.5, 2.0, 3.0],
                "pos_B_organic": [2.5, 2.0, 3.0],
                "drift": 0.5,
                "avgDistance": null,
                "connections": 0
            })
        );
        let back: DualNode = serde_json::from_value(value).unwrap();
        assert_eq!(back, node);
    }

    #[test]
    fn test_manifold_node_has_no_graph_fields() {
        let coords = ModeCoordinates::Manifold(ManifoldModeCoordinates {
            pos_a_umap: [0.0; 3],
            pos_b_umap: [1.0; 3],
            pos_b_organic: [3.0; 3],
            drift_umap: 1.7,
        });
        let value = serde_json::to_value(&coords).unwrap();
        assert!(value.get("pos_A").is_none());
        assert!(value.get("drift").is_none());
        assert_eq!(value["pos_B_umap"], json!([1.0, 1.0, 1.0]));
        assert_eq!(coords.drift(), 1.7);
        assert_eq!(coords.position(Space::Comparison), [1.0; 3]);
    }
}
