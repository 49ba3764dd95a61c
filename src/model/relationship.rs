//! Relationship (undirected edge) between two concepts.

use serde::{Deserialize, Serialize};
use super::ConceptId;

/// Which side of a stored relationship row the focal concept sits on.
///
/// Relationships are unordered for layout purposes, but the upstream table
/// records which concept was scanned first; detail queries pass that through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// A relationship row: an unordered concept pair with a semantic distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub a: ConceptId,
    pub b: ConceptId,
    /// Semantic distance in the baseline space. Smaller means closer.
    pub distance: f64,
    /// Distance for the same pair as measured in the comparison space, when known.
    pub comparison_distance: Option<f64>,
    /// Opaque annotation (bridge text, reasoning trace). Never interpreted.
    pub annotation: Option<String>,
}

impl Relationship {
    pub fn new(a: impl Into<ConceptId>, b: impl Into<ConceptId>, distance: f64) -> Self {
        Self {
            a: a.into(),
            b: b.into(),
            distance,
            comparison_distance: None,
            annotation: None,
        }
    }

    pub fn with_comparison_distance(mut self, distance: f64) -> Self {
        self.comparison_distance = Some(distance);
        self
    }

    pub fn with_annotation(mut self, annotation: impl Into<String>) -> Self {
        self.annotation = Some(annotation.into());
        self
    }

    /// The "other" end of the relationship from the given concept.
    pub fn other(&self, from: &str) -> Option<&ConceptId> {
        if self.a.as_str() == from { Some(&self.b) }
        else if self.b.as_str() == from { Some(&self.a) }
        else { None }
    }

    /// Direction of this row as seen from `from`.
    pub fn direction_from(&self, from: &str) -> Option<Direction> {
        if self.a.as_str() == from { Some(Direction::Outgoing) }
        else if self.b.as_str() == from { Some(Direction::Incoming) }
        else { None }
    }

    pub fn touches(&self, id: &str) -> bool {
        self.a.as_str() == id || self.b.as_str() == id
    }

    pub fn is_self_loop(&self) -> bool {
        self.a == self.b
    }

    /// Order-independent key for the pair.
    pub fn pair_key(&self) -> (ConceptId, ConceptId) {
        if self.a <= self.b {
            (self.a.clone(), self.b.clone())
        } else {
            (self.b.clone(), self.a.clone())
        }
    }

    /// Absolute disagreement between the two spaces for this pair.
    pub fn delta(&self) -> Option<f64> {
        self.comparison_distance.map(|c| (self.distance - c).abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_key_is_order_independent() {
        let ab = Relationship::new("love", "trust", 0.2);
        let ba = Relationship::new("trust", "love", 0.4);
        assert_eq!(ab.pair_key(), ba.pair_key());
    }

    #[test]
    fn test_other_and_direction() {
        let rel = Relationship::new("love", "trust", 0.2);
        assert_eq!(rel.other("love").map(|c| c.as_str()), Some("trust"));
        assert_eq!(rel.other("trust").map(|c| c.as_str()), Some("love"));
        assert_eq!(rel.other("fear"), None);
        assert_eq!(rel.direction_from("trust"), Some(Direction::Incoming));
    }

    #[test]
    fn test_delta_absent_without_comparison() {
        let rel = Relationship::new("love", "trust", 0.2);
        assert_eq!(rel.delta(), None);
        let rel = rel.with_comparison_distance(0.5);
        assert!((rel.delta().unwrap() - 0.3).abs() < 1e-12);
    }
}
