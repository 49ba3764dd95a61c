//! # Concept Store Trait
//!
//! This is THE contract between the layout pipeline and wherever concepts,
//! embeddings and relationships actually live (a relational table plus a
//! vector store, in the deployments this crate was built for).
//!
//! The pipeline only ever *reads* through this trait, and only through an
//! immutable [`CorpusSnapshot`]; writes belong to the upstream scanner and
//! are modelled on the concrete store types, not here.
//!
//! ## Implementations
//!
//! | Store | Module | Description |
//! |-------|--------|-------------|
//! | `MemoryStore` | `memory` | In-memory for testing/embedding |

pub mod memory;

use async_trait::async_trait;
use crate::model::*;
use crate::Result;

pub use memory::MemoryStore;

// ============================================================================
// Snapshot
// ============================================================================

/// Everything one pipeline run reads, captured at a single revision.
#[derive(Debug, Clone, Default)]
pub struct CorpusSnapshot {
    pub concepts: Vec<Concept>,
    pub relationships: Vec<Relationship>,
    /// Store revision the snapshot was taken at.
    pub revision: u64,
}

impl CorpusSnapshot {
    pub fn concept(&self, id: &str) -> Option<&Concept> {
        self.concepts.iter().find(|c| c.name() == id)
    }

    /// Relationship rows touching `id`, in table order.
    pub fn relationships_of<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Relationship> + 'a {
        self.relationships.iter().filter(move |r| r.touches(id))
    }

    /// Mean relationship distance for `id`; absent when it has no rows.
    pub fn average_distance(&self, id: &str) -> Option<f64> {
        let (sum, count) = self
            .relationships_of(id)
            .fold((0.0, 0usize), |(s, n), r| (s + r.distance, n + 1));
        (count > 0).then(|| sum / count as f64)
    }

    pub fn connection_count(&self, id: &str) -> usize {
        self.relationships_of(id).count()
    }
}

// ============================================================================
// ConceptStore Trait
// ============================================================================

/// The read contract for concept data.
///
/// Any store that implements this trait can feed the layout service.
/// `revision()` must change whenever anything a snapshot would contain
/// changes; the service uses it to invalidate cached layouts.
#[async_trait]
pub trait ConceptStore: Send + Sync + 'static {
    /// All stored concepts, in a stable order.
    async fn concepts(&self) -> Result<Vec<Concept>>;

    /// All relationship rows.
    async fn relationships(&self) -> Result<Vec<Relationship>>;

    /// One concept by name.
    async fn concept(&self, id: &str) -> Result<Option<Concept>>;

    /// Monotonic change counter.
    async fn revision(&self) -> Result<u64>;

    /// Opaque definition text for a concept.
    ///
    /// Default: the `definition` field of the stored concept.
    async fn definition(&self, id: &str) -> Result<Option<String>> {
        Ok(self.concept(id).await?.and_then(|c| c.definition))
    }

    /// Capture a consistent snapshot.
    ///
    /// Default: reads revision, concepts and relationships in turn. Stores
    /// with real transactions should override this to read atomically.
    async fn snapshot(&self) -> Result<CorpusSnapshot> {
        let revision = self.revision().await?;
        let concepts = self.concepts().await?;
        let relationships = self.relationships().await?;
        Ok(CorpusSnapshot { concepts, relationships, revision })
    }
}
