//! # Distortion
//!
//! How well the rendered 3D layout preserves each concept's relationships.
//!
//! For a focal concept, every graph neighbor's *rendered* distance is
//! classified against percentiles of that concept's own neighbor
//! distances. The percentiles are local, so the same absolute distance can
//! be `Local` for one concept and a `Wormhole` for another.
//!
//! Separately, [`DistortionAnalyzer::spatial_neighbors`] finds the concepts
//! closest in rendered space whether or not any relationship links them.

use serde::{Deserialize, Serialize};

use crate::config::DistortionConfig;
use crate::graph::ConceptGraph;
use crate::model::Coord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistortionTier {
    /// At or below the low percentile.
    Local,
    /// Between the two percentiles.
    Stretching,
    /// At or above the high percentile.
    Wormhole,
}

/// Percentile cut points of one concept's neighbor distances.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierBoundaries {
    pub low: f64,
    pub high: f64,
    /// False when there were too few neighbors for percentiles to mean
    /// anything; tiers then come from rank order instead.
    pub stable: bool,
}

impl TierBoundaries {
    pub fn classify(&self, distance: f64) -> DistortionTier {
        if distance <= self.low {
            DistortionTier::Local
        } else if distance < self.high {
            DistortionTier::Stretching
        } else {
            DistortionTier::Wormhole
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborDistortion {
    pub neighbor: usize,
    /// Euclidean distance in the rendered layout.
    pub rendered: f64,
    /// Distance the relationship was built from.
    pub semantic: f64,
    pub tier: DistortionTier,
}

/// Distortion of one focal concept's neighborhood, nearest rendered first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistortionIndex {
    pub focal: usize,
    pub neighbors: Vec<NeighborDistortion>,
    /// Absent when the concept has no neighbors.
    pub boundaries: Option<TierBoundaries>,
}

impl DistortionIndex {
    pub fn tier_of(&self, neighbor: usize) -> Option<DistortionTier> {
        self.neighbors.iter().find(|n| n.neighbor == neighbor).map(|n| n.tier)
    }

    pub fn count(&self, tier: DistortionTier) -> usize {
        self.neighbors.iter().filter(|n| n.tier == tier).count()
    }
}

/// A concept near the focal one in rendered space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialNeighbor {
    pub index: usize,
    pub distance: f64,
    /// Whether the graph has an edge between the two.
    pub linked: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DistortionAnalyzer {
    config: DistortionConfig,
}

impl DistortionAnalyzer {
    pub fn new(config: DistortionConfig) -> Self {
        Self { config }
    }

    pub fn index(&self, focal: usize, graph: &ConceptGraph, positions: &[Coord]) -> DistortionIndex {
        let mut neighbors: Vec<NeighborDistortion> = graph
            .neighbors(focal)
            .iter()
            .map(|e| NeighborDistortion {
                neighbor: e.target,
                rendered: distance(positions[focal], positions[e.target]),
                semantic: e.distance,
                tier: DistortionTier::Local,
            })
            .collect();
        neighbors.sort_by(|x, y| x.rendered.total_cmp(&y.rendered).then(x.neighbor.cmp(&y.neighbor)));

        let sorted: Vec<f64> = neighbors.iter().map(|n| n.rendered).collect();
        let Some(boundaries) = self.boundaries(&sorted) else {
            return DistortionIndex { focal, neighbors, boundaries: None };
        };

        if boundaries.stable {
            for n in neighbors.iter_mut() {
                n.tier = boundaries.classify(n.rendered);
            }
        } else {
            let (shortest, longest) = (sorted[0], sorted[sorted.len() - 1]);
            for n in neighbors.iter_mut() {
                n.tier = if n.rendered <= shortest {
                    DistortionTier::Local
                } else if n.rendered >= longest {
                    DistortionTier::Wormhole
                } else {
                    DistortionTier::Stretching
                };
            }
        }
        DistortionIndex { focal, neighbors, boundaries: Some(boundaries) }
    }

    /// Cut points for ascending `sorted` distances.
    pub fn boundaries(&self, sorted: &[f64]) -> Option<TierBoundaries> {
        if sorted.is_empty() {
            return None;
        }
        Some(TierBoundaries {
            low: percentile(sorted, self.config.low_percentile),
            high: percentile(sorted, self.config.high_percentile),
            stable: sorted.len() >= self.config.min_neighbors,
        })
    }

    /// The `spatial_k` concepts nearest to `focal` in `positions`.
    pub fn spatial_neighbors(&self, focal: usize, graph: &ConceptGraph, positions: &[Coord]) -> Vec<SpatialNeighbor> {
        let origin = positions[focal];
        let mut all: Vec<(usize, f64)> = positions
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != focal)
            .map(|(i, p)| (i, distance(origin, *p)))
            .collect();
        all.sort_by(|x, y| x.1.total_cmp(&y.1).then(x.0.cmp(&y.0)));
        all.truncate(self.config.spatial_k);
        all.into_iter()
            .map(|(index, distance)| SpatialNeighbor {
                index,
                distance,
                linked: graph.has_edge(focal, index),
            })
            .collect()
    }
}

/// Linear-interpolation percentile of ascending `sorted`, `q` in `[0, 100]`.
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let rank = (q / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = (lo + 1).min(n - 1);
            sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
        }
    }
}

fn distance(a: Coord, b: Coord) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
}
