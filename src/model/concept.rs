//! Concept in the atlas.

use std::borrow::Borrow;

use serde::{Deserialize, Serialize};
use super::{PerSpace, Space};

/// Stable concept identifier. Concepts are addressed by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConceptId(pub String);

impl ConceptId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConceptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConceptId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for ConceptId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl Borrow<str> for ConceptId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A dense embedding vector as produced by the embedding source.
pub type Embedding = Vec<f32>;

/// A concept: one identity, one embedding per space.
///
/// Dimensions may differ between spaces. A concept with no embedding in a
/// space simply has `None` there; it is excluded from anything that needs
/// that space rather than being placed at the origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub id: ConceptId,
    pub embeddings: PerSpace<Option<Embedding>>,
    /// Opaque natural-language definition, passed through to detail queries.
    pub definition: Option<String>,
}

impl Concept {
    pub fn new(id: impl Into<ConceptId>) -> Self {
        Self {
            id: id.into(),
            embeddings: PerSpace::new(None, None),
            definition: None,
        }
    }

    pub fn with_embedding(mut self, space: Space, embedding: impl Into<Embedding>) -> Self {
        *self.embeddings.get_mut(space) = Some(embedding.into());
        self
    }

    pub fn with_definition(mut self, definition: impl Into<String>) -> Self {
        self.definition = Some(definition.into());
        self
    }

    pub fn name(&self) -> &str {
        self.id.as_str()
    }

    pub fn embedding(&self, space: Space) -> Option<&[f32]> {
        self.embeddings.get(space).as_deref()
    }
}
