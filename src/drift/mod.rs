//! # Drift
//!
//! Per-concept divergence between the aligned layouts of the two spaces.
//!
//! - `drift = ‖a − b‖` in the aligned frame
//! - `amplified = a + factor · (b − a)`
//!
//! Alignment minimizes the distance between the clouds, which hides real
//! differences on screen. The amplified coordinate exaggerates the
//! separation for rendering; the drift scalar is never touched by it.

mod hull;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::align::{AlignmentError, AlignmentResult};
use crate::config::DriftConfig;
use crate::model::{Coord, PerSpace};

pub use hull::ConvexHull;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    /// Per concept, index-aligned with the alignment input.
    pub drift: Vec<f64>,
    pub amplified: Vec<Coord>,
    pub factor: f64,
    pub mean: f64,
    pub max: f64,
}

impl DriftReport {
    /// Indices ordered by drift, largest first. Ties keep input order.
    pub fn ranking(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.drift.len()).collect();
        order.sort_by(|&i, &j| self.drift[j].total_cmp(&self.drift[i]));
        order
    }
}

#[derive(Debug, Clone)]
pub struct DriftAnalyzer {
    factor: f64,
    compute_hulls: bool,
}

impl DriftAnalyzer {
    pub fn new(config: &DriftConfig) -> Self {
        Self {
            factor: config.amplification,
            compute_hulls: config.compute_hulls,
        }
    }

    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Drift between the two point sets of a finished alignment.
    pub fn analyze(&self, alignment: &AlignmentResult) -> DriftReport {
        self.measure(&alignment.baseline, &alignment.aligned)
    }

    /// Drift between two point sets already in one frame.
    pub fn compare(&self, baseline: &[Coord], aligned: &[Coord]) -> Result<DriftReport, AlignmentError> {
        if baseline.len() != aligned.len() {
            return Err(AlignmentError::LengthMismatch {
                baseline: baseline.len(),
                comparison: aligned.len(),
            });
        }
        Ok(self.measure(baseline, aligned))
    }

    fn measure(&self, baseline: &[Coord], aligned: &[Coord]) -> DriftReport {
        let mut drift = Vec::with_capacity(baseline.len());
        let mut amplified = Vec::with_capacity(baseline.len());
        for (a, b) in baseline.iter().zip(aligned) {
            let delta = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
            drift.push((delta[0] * delta[0] + delta[1] * delta[1] + delta[2] * delta[2]).sqrt());
            amplified.push([
                a[0] + self.factor * delta[0],
                a[1] + self.factor * delta[1],
                a[2] + self.factor * delta[2],
            ]);
        }
        let max = drift.iter().copied().fold(0.0, f64::max);
        let mean = if drift.is_empty() { 0.0 } else { drift.iter().sum::<f64>() / drift.len() as f64 };
        debug!(concepts = drift.len(), mean, max, factor = self.factor, "drift measured");
        DriftReport { drift, amplified, factor: self.factor, mean, max }
    }

    /// Hulls of both aligned point sets, when enabled. A set that does not
    /// span three dimensions has no hull.
    pub fn hulls(&self, alignment: &AlignmentResult) -> Option<PerSpace<Option<ConvexHull>>> {
        self.compute_hulls.then(|| {
            PerSpace::new(
                ConvexHull::compute(&alignment.baseline),
                ConvexHull::compute(&alignment.aligned),
            )
        })
    }
}

impl Default for DriftAnalyzer {
    fn default() -> Self {
        Self::new(&DriftConfig::default())
    }
}
