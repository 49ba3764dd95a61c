//! In-memory concept store.
//!
//! This is the reference implementation of `ConceptStore`.
//! It uses simple maps protected by RwLock.
//!
//! ## Limitations
//!
//! - **No persistence**: everything is lost on drop.
//! - **Snapshot is not atomic**: `snapshot()` takes each lock in turn, so a
//!   writer racing a snapshot can produce a mix of two revisions. The
//!   revision is read first, so such a snapshot is simply considered stale
//!   and recomputed on the next request.
//!
//! Use this store for:
//! - Testing the layout pipeline and service
//! - Embedding the atlas in applications that load concepts from files

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use async_trait::async_trait;
use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::model::*;
use crate::{Error, Result};
use super::ConceptStore;

// ============================================================================
// MemoryStore
// ============================================================================

/// In-memory concept storage.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    concepts: RwLock<HashMap<ConceptId, Concept>>,
    /// insertion order, so scans are stable
    order: RwLock<Vec<ConceptId>>,
    relationships: RwLock<Vec<Relationship>>,
    revision: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&self) {
        self.inner.revision.fetch_add(1, Ordering::Release);
    }

    /// Store a newly embedded concept.
    ///
    /// Concepts are immutable once stored: inserting an existing name is a
    /// constraint violation. Retire it with `delete_concept` first.
    pub fn insert_concept(&self, concept: Concept) -> Result<()> {
        {
            let mut concepts = self.inner.concepts.write();
            if concepts.contains_key(concept.name()) {
                return Err(Error::ConstraintViolation(format!(
                    "Concept '{}' already stored; concepts are immutable",
                    concept.id
                )));
            }
            self.inner.order.write().push(concept.id.clone());
            concepts.insert(concept.id.clone(), concept);
        }
        self.bump();
        Ok(())
    }

    /// Retire a concept and every relationship touching it. Returns true if it existed.
    pub fn delete_concept(&self, id: &str) -> bool {
        let removed = self.inner.concepts.write().remove(id).is_some();
        if removed {
            self.inner.order.write().retain(|c| c.as_str() != id);
            self.inner.relationships.write().retain(|r| !r.touches(id));
            self.bump();
        }
        removed
    }

    /// Attach or replace the opaque definition text of a stored concept.
    ///
    /// Definitions are annotations, not part of the concept's identity or
    /// embeddings, so they stay writable.
    pub fn set_definition(&self, id: &str, definition: impl Into<String>) -> Result<()> {
        {
            let mut concepts = self.inner.concepts.write();
            let concept = concepts
                .get_mut(id)
                .ok_or_else(|| Error::NotFound(format!("Concept '{id}'")))?;
            concept.definition = Some(definition.into());
        }
        self.bump();
        Ok(())
    }

    /// Record a relationship. The pair is unordered: a second row for the
    /// same pair (either orientation) replaces the first.
    ///
    /// Both endpoints must already be stored.
    pub fn add_relationship(&self, rel: Relationship) -> Result<()> {
        if !rel.distance.is_finite() {
            return Err(Error::ConstraintViolation(format!(
                "Relationship {} <-> {} has non-finite distance",
                rel.a, rel.b
            )));
        }
        if rel.is_self_loop() {
            return Err(Error::ConstraintViolation(format!(
                "Relationship {} <-> {} is a self-loop",
                rel.a, rel.b
            )));
        }
        {
            let concepts = self.inner.concepts.read();
            for end in [&rel.a, &rel.b] {
                if !concepts.contains_key(end) {
                    return Err(Error::NotFound(format!("Concept '{end}'")));
                }
            }
        }
        {
            let key = rel.pair_key();
            let mut rels = self.inner.relationships.write();
            match rels.iter_mut().find(|r| r.pair_key() == key) {
                Some(existing) => *existing = rel,
                None => rels.push(rel),
            }
        }
        self.bump();
        Ok(())
    }

    pub fn concept_count(&self) -> usize {
        self.inner.concepts.read().len()
    }

    pub fn relationship_count(&self) -> usize {
        self.inner.relationships.read().len()
    }
}

// ============================================================================
// ConceptStore impl
// ============================================================================

#[async_trait]
impl ConceptStore for MemoryStore {
    async fn concepts(&self) -> Result<Vec<Concept>> {
        let concepts = self.inner.concepts.read();
        let order = self.inner.order.read();
        Ok(order.iter().filter_map(|id| concepts.get(id).cloned()).collect())
    }

    async fn relationships(&self) -> Result<Vec<Relationship>> {
        Ok(self.inner.relationships.read().clone())
    }

    async fn concept(&self, id: &str) -> Result<Option<Concept>> {
        Ok(self.inner.concepts.read().get(id).cloned())
    }

    async fn revision(&self) -> Result<u64> {
        Ok(self.inner.revision.load(Ordering::Acquire))
    }
}

// ============================================================================
// Tests
// ============================================================================
