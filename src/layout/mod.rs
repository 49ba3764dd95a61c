//! # Layout Strategies
//!
//! Map one space's nodes to 3D coordinates.
//!
//! | Strategy | Reads | Module |
//! |----------|-------|--------|
//! | `ForceDirectedLayout` | the [`ConceptGraph`] | `force` |
//! | `ManifoldLayout` | the raw embedding vectors | `manifold` |
//!
//! A strategy is chosen once at the service boundary and injected as
//! `&dyn LayoutStrategy`; the pipeline never branches on the mode itself.
//! Both strategies are pure functions of their input and seed.

pub mod force;
pub mod manifold;

use serde::{Deserialize, Serialize};

use crate::graph::ConceptGraph;
use crate::model::{Coord, Space};

pub use force::ForceDirectedLayout;
pub use manifold::ManifoldLayout;

/// Which family of layout produced the coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutMode {
    /// Spring embedder over the concept graph.
    ForceDirected,
    /// Neighborhood-preserving reduction of the embeddings themselves.
    Manifold,
}

impl std::fmt::Display for LayoutMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayoutMode::ForceDirected => f.write_str("force_directed"),
            LayoutMode::Manifold => f.write_str("manifold"),
        }
    }
}

/// Numeric failure inside an iterative layout.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LayoutError {
    #[error("{mode} layout of the {space} space diverged at iteration {iteration}")]
    Diverged {
        mode: LayoutMode,
        space: Space,
        iteration: usize,
    },

    #[error("invalid layout input for the {space} space: {reason}")]
    InvalidInput { space: Space, reason: String },
}

/// Everything a strategy may read for one space.
#[derive(Debug, Clone, Copy)]
pub struct LayoutInput<'a> {
    pub space: Space,
    pub graph: &'a ConceptGraph,
    /// Embeddings, row-aligned with the graph's node indices.
    pub vectors: &'a [Vec<f64>],
}

impl<'a> LayoutInput<'a> {
    pub fn new(space: Space, graph: &'a ConceptGraph, vectors: &'a [Vec<f64>]) -> Self {
        Self { space, graph, vectors }
    }
}

/// A layout algorithm.
///
/// Implementations must return exactly one finite coordinate per node,
/// including isolated ones, and the same output for the same input.
pub trait LayoutStrategy: Send + Sync + std::fmt::Debug {
    fn mode(&self) -> LayoutMode;

    fn layout(&self, input: &LayoutInput<'_>) -> Result<Vec<Coord>, LayoutError>;
}

/// Fail with `Diverged` if any coordinate is NaN or infinite.
pub(crate) fn ensure_finite(
    coords: &[Coord],
    mode: LayoutMode,
    space: Space,
    iteration: usize,
) -> Result<(), LayoutError> {
    if coords.iter().flatten().all(|x| x.is_finite()) {
        Ok(())
    } else {
        Err(LayoutError::Diverged { mode, space, iteration })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_finite() {
        let ok = [[0.0, 1.0, 2.0]];
        assert!(ensure_finite(&ok, LayoutMode::ForceDirected, Space::Baseline, 3).is_ok());

        let bad = [[0.0, f64::NAN, 2.0]];
        let err = ensure_finite(&bad, LayoutMode::Manifold, Space::Comparison, 7).unwrap_err();
        assert_eq!(
            err,
            LayoutError::Diverged { mode: LayoutMode::Manifold, space: Space::Comparison, iteration: 7 }
        );
        assert!(err.to_string().contains("comparison"));
    }
}
