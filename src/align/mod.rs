//! # Cross-Space Alignment
//!
//! Superimposes the comparison layout onto the baseline layout so that the
//! two point clouds can be compared concept by concept.
//!
//! Two variants:
//!
//! | Mode | Transform | Disparity |
//! |------|-----------|-----------|
//! | `ScaleNormalizing` | both sets centered and scaled to unit Frobenius norm, then rotation + uniform scale | residual sum of squares, in `[0, 1]` |
//! | `RotationOnly` | both sets centered, rotation only | RMS residual, in baseline units |
//!
//! Disparities are only comparable between results of the same mode.
//!
//! Output coordinates live in the baseline's centered frame. Display
//! framing ([`DisplayFrame`]) is a separate, explicit step.

mod procrustes;

use serde::{Deserialize, Serialize};

use crate::model::{Coord, Space};

pub use procrustes::Procrustes;

/// Which Procrustes variant produced an alignment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentMode {
    /// Normalize both sets to unit size, then fit rotation and scale.
    #[default]
    ScaleNormalizing,
    /// Fit rotation only; each space keeps its natural spread.
    RotationOnly,
}

impl std::fmt::Display for AlignmentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlignmentMode::ScaleNormalizing => f.write_str("scale_normalizing"),
            AlignmentMode::RotationOnly => f.write_str("rotation_only"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AlignmentError {
    #[error("point sets differ in length: baseline has {baseline}, comparison has {comparison}")]
    LengthMismatch { baseline: usize, comparison: usize },

    #[error("need at least 3 points to align, got {found}")]
    InsufficientPoints { found: usize },

    #[error("{space} point set is degenerate: {reason}")]
    Degenerate { space: Space, reason: String },

    #[error("{space} point set contains non-finite coordinates")]
    NonFinite { space: Space },

    #[error("decomposition of the cross-covariance matrix did not converge")]
    DecompositionFailed,
}

/// One completed alignment. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentResult {
    pub mode: AlignmentMode,
    /// Row-major orthogonal matrix applied to centered comparison points.
    pub rotation: [[f64; 3]; 3],
    /// True when `rotation` has determinant -1.
    pub reflected: bool,
    /// Uniform factor applied after rotation. 1 in rotation-only mode.
    pub scale: f64,
    pub baseline_centroid: Coord,
    pub comparison_centroid: Coord,
    /// Mode-scoped residual, see the module docs.
    pub disparity: f64,
    /// Baseline points in the output frame.
    pub baseline: Vec<Coord>,
    /// Comparison points mapped into the output frame.
    pub aligned: Vec<Coord>,
    /// Factor applied by [`AlignmentResult::framed`], 1 until framed.
    pub display_factor: f64,
}

impl AlignmentResult {
    pub fn len(&self) -> usize {
        self.baseline.len()
    }

    pub fn is_empty(&self) -> bool {
        self.baseline.is_empty()
    }

    /// Translation of the full map `p ↦ scale · R · p + t` from raw
    /// comparison coordinates into the output frame.
    pub fn translation(&self) -> Coord {
        let r = rotate(&self.rotation, self.comparison_centroid);
        let f = self.scale * self.display_factor;
        [-f * r[0], -f * r[1], -f * r[2]]
    }

    /// Map a raw comparison-space point into the output frame.
    pub fn apply(&self, p: Coord) -> Coord {
        let r = rotate(&self.rotation, p);
        let t = self.translation();
        let f = self.scale * self.display_factor;
        [f * r[0] + t[0], f * r[1] + t[1], f * r[2] + t[2]]
    }

    /// Rescale both point sets for display. Disparity is left untouched.
    pub fn framed(mut self, frame: DisplayFrame) -> Self {
        let factor = match frame {
            DisplayFrame::Unit => return self,
            DisplayFrame::Constrained { scale } => {
                // match the comparison spread to the baseline spread first
                let (vb, va) = (variance(&self.baseline), variance(&self.aligned));
                if va > 0.0 && vb > 0.0 {
                    let matched = (vb / va).sqrt();
                    for x in self.aligned.iter_mut().flatten() {
                        *x *= matched;
                    }
                    self.scale *= matched;
                }
                scale
            }
            DisplayFrame::TargetStd { std } => {
                let current = variance(&self.baseline).sqrt();
                if current > 0.0 { std / current } else { 1.0 }
            }
        };
        for x in self.baseline.iter_mut().chain(self.aligned.iter_mut()).flatten() {
            *x *= factor;
        }
        self.display_factor *= factor;
        self
    }
}

/// How aligned coordinates are scaled for rendering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum DisplayFrame {
    /// Leave coordinates as aligned.
    Unit,
    /// Match the comparison variance to the baseline, then multiply both by `scale`.
    Constrained { scale: f64 },
    /// Scale both sets equally so the baseline's per-component standard
    /// deviation equals `std`. Relative spread is preserved.
    TargetStd { std: f64 },
}

/// An alignment algorithm. Chosen once at the service boundary.
pub trait AlignmentStrategy: Send + Sync + std::fmt::Debug {
    fn mode(&self) -> AlignmentMode;

    /// Align `comparison` onto `baseline`. Index `i` of both slices must
    /// refer to the same concept.
    fn align(&self, baseline: &[Coord], comparison: &[Coord]) -> Result<AlignmentResult, AlignmentError>;
}

pub(crate) fn rotate(r: &[[f64; 3]; 3], p: Coord) -> Coord {
    [
        r[0][0] * p[0] + r[0][1] * p[1] + r[0][2] * p[2],
        r[1][0] * p[0] + r[1][1] * p[1] + r[1][2] * p[2],
        r[2][0] * p[0] + r[2][1] * p[1] + r[2][2] * p[2],
    ]
}

/// Population variance over every component of every point.
fn variance(points: &[Coord]) -> f64 {
    let count = (points.len() * 3) as f64;
    if count == 0.0 {
        return 0.0;
    }
    let mean = points.iter().flatten().sum::<f64>() / count;
    points.iter().flatten().map(|x| (x - mean).powi(2)).sum::<f64>() / count
}
