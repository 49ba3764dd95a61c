//! # Concept Atlas Model
//!
//! Clean DTOs for the two-space concept atlas.
//! These types cross every boundary: store ↔ pipeline ↔ service ↔ client.
//!
//! Design rule: NO linear-algebra types here. Coordinates leave the
//! pipeline as plain `[f64; 3]` arrays.
//! This module is pure data: no I/O, no state, no async.

pub mod concept;
pub mod relationship;
pub mod space;

pub use concept::{Concept, ConceptId, Embedding};
pub use relationship::{Direction, Relationship};
pub use space::{PerSpace, Space};

/// A rendered 3D coordinate.
pub type Coord = [f64; 3];
