//! # latent-atlas: Aligned Layouts of Two Concept Spaces
//!
//! Lays out the same set of concepts twice, once from a *baseline*
//! embedding space and once from a *comparison* space. It aligns the two 3D
//! point clouds so their geometry is comparable, and measures where they
//! disagree.
//!
//! ## Pipeline
//!
//! ```text
//! ConceptStore ──snapshot──▶ GraphBuilder ──▶ LayoutStrategy (per space)
//!                                                  │
//!       DistortionAnalyzer ◀── DriftAnalyzer ◀── AlignmentStrategy
//!                │
//!                ▼
//!         LayoutService (cached, single-flight) ──▶ JSON artifact
//! ```
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `ConceptStore` is the contract between the pipeline and storage
//! 2. **Clean DTOs**: `Concept`, `Relationship`, `Space` cross all boundaries
//! 3. **Strategies chosen once**: layout and alignment are selected at the service
//!    boundary and injected; nothing downstream branches on mode strings
//! 4. **Pure pipeline**: every stage is a deterministic function of an immutable snapshot
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use latent_atlas::{Concept, LayoutService, MemoryStore, Relationship, Space};
//! use latent_atlas::service::{DualKey, LayoutMode, TopologyMode};
//!
//! # async fn example() -> latent_atlas::Result<()> {
//! let store = MemoryStore::new();
//! store.insert_concept(
//!     Concept::new("love")
//!         .with_embedding(Space::Baseline, vec![0.1, 0.9, 0.2])
//!         .with_embedding(Space::Comparison, vec![0.3, 0.1, 0.8, 0.4]),
//! )?;
//! // ... more concepts ...
//! store.add_relationship(Relationship::new("love", "trust", 0.21))?;
//!
//! let service = LayoutService::with_defaults(store)?;
//! let layout = service
//!     .dual_layout(DualKey::new(TopologyMode::Independent, LayoutMode::ForceDirected))
//!     .await?;
//! println!("disparity = {}", layout.metadata.disparity);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod config;
pub mod storage;
pub mod graph;
pub mod layout;
pub mod align;
pub mod drift;
pub mod distortion;
pub mod service;
pub mod export;

// ============================================================================
// Re-exports: Model (the DTOs)
// ============================================================================

pub use model::{
    Concept, ConceptId, Coord, Direction, Embedding, PerSpace, Relationship, Space,
};

// ============================================================================
// Re-exports: Storage
// ============================================================================

pub use storage::{ConceptStore, CorpusSnapshot, MemoryStore};

// ============================================================================
// Re-exports: Pipeline
// ============================================================================

pub use config::AtlasConfig;
pub use graph::{ConceptGraph, ExclusionReport, GraphBuilder, TopologyMode};
pub use layout::{ForceDirectedLayout, LayoutError, LayoutMode, LayoutStrategy, ManifoldLayout};
pub use align::{AlignmentError, AlignmentMode, AlignmentResult, AlignmentStrategy, Procrustes};
pub use drift::{ConvexHull, DriftAnalyzer, DriftReport};
pub use distortion::{DistortionAnalyzer, DistortionIndex, DistortionTier, SpatialNeighbor};

// ============================================================================
// Re-exports: Service
// ============================================================================

pub use service::{DualKey, DualLayout, LayoutService, SingleKey, SingleSpaceLayout};

// ============================================================================
// Error Types
// ============================================================================

/// Coarse error category, stable across variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Data,
    Alignment,
    Layout,
    Configuration,
    NotFound,
    Storage,
    Internal,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("Alignment error: {0}")]
    Alignment(#[from] AlignmentError),

    #[error("Layout error: {0}")]
    Layout(#[from] LayoutError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Data error: {0}")]
    Data(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Alignment(_) => ErrorKind::Alignment,
            Error::Layout(_) => ErrorKind::Layout,
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::Data(_) => ErrorKind::Data,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Storage(_) | Error::ConstraintViolation(_) => ErrorKind::Storage,
            Error::Worker(_) | Error::Serialization(_) | Error::Io(_) => ErrorKind::Internal,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
