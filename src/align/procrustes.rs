//! Orthogonal Procrustes via SVD of the cross-covariance matrix.

use nalgebra::{Matrix3, SymmetricEigen};
use tracing::debug;

use crate::model::{Coord, Space};
use super::{rotate, AlignmentError, AlignmentMode, AlignmentResult, AlignmentStrategy};

/// Second principal variance below this fraction of the first means the
/// points lie on a line.
const COLLINEAR_RATIO: f64 = 1e-10;
const SVD_EPS: f64 = 1e-14;
const MAX_SVD_ITERATIONS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Procrustes {
    pub mode: AlignmentMode,
    /// Permit improper orthogonal matrices. When false, a reflection is
    /// turned into the closest proper rotation.
    pub allow_reflection: bool,
}

impl Procrustes {
    pub fn new(mode: AlignmentMode) -> Self {
        Self { mode, allow_reflection: true }
    }

    pub fn scale_normalizing() -> Self {
        Self::new(AlignmentMode::ScaleNormalizing)
    }

    pub fn rotation_only() -> Self {
        Self::new(AlignmentMode::RotationOnly)
    }

    pub fn with_reflection(mut self, allow: bool) -> Self {
        self.allow_reflection = allow;
        self
    }
}

impl Default for Procrustes {
    fn default() -> Self {
        Self::scale_normalizing()
    }
}

impl AlignmentStrategy for Procrustes {
    fn mode(&self) -> AlignmentMode {
        self.mode
    }

    fn align(&self, baseline: &[Coord], comparison: &[Coord]) -> Result<AlignmentResult, AlignmentError> {
        if baseline.len() != comparison.len() {
            return Err(AlignmentError::LengthMismatch {
                baseline: baseline.len(),
                comparison: comparison.len(),
            });
        }
        let n = baseline.len();
        if n < 3 {
            return Err(AlignmentError::InsufficientPoints { found: n });
        }

        let (mut a, mu_a) = centered(baseline, Space::Baseline)?;
        let (mut b, mu_b) = centered(comparison, Space::Comparison)?;
        check_rank(&a, Space::Baseline)?;
        check_rank(&b, Space::Comparison)?;

        let (norm_a, norm_b) = match self.mode {
            AlignmentMode::ScaleNormalizing => (frobenius(&a), frobenius(&b)),
            AlignmentMode::RotationOnly => (1.0, 1.0),
        };
        for p in a.iter_mut() {
            *p = p.map(|x| x / norm_a);
        }
        for p in b.iter_mut() {
            *p = p.map(|x| x / norm_b);
        }

        // M = Σ a bᵀ, maximize tr(Rᵀ M)
        let mut m = Matrix3::<f64>::zeros();
        for (pa, pb) in a.iter().zip(&b) {
            for r in 0..3 {
                for c in 0..3 {
                    m[(r, c)] += pa[r] * pb[c];
                }
            }
        }
        let svd = m
            .try_svd(true, true, SVD_EPS, MAX_SVD_ITERATIONS)
            .ok_or(AlignmentError::DecompositionFailed)?;
        let (Some(mut u), Some(v_t)) = (svd.u, svd.v_t) else {
            return Err(AlignmentError::DecompositionFailed);
        };
        let sigma = svd.singular_values;

        let mut trace = sigma.sum();
        let mut rot = u * v_t;
        let mut reflected = rot.determinant() < 0.0;
        if reflected && !self.allow_reflection {
            let weakest = sigma.imin();
            u.column_mut(weakest).neg_mut();
            rot = u * v_t;
            trace -= 2.0 * sigma[weakest];
            reflected = false;
        }
        let rotation = [
            [rot[(0, 0)], rot[(0, 1)], rot[(0, 2)]],
            [rot[(1, 0)], rot[(1, 1)], rot[(1, 2)]],
            [rot[(2, 0)], rot[(2, 1)], rot[(2, 2)]],
        ];

        let s = match self.mode {
            AlignmentMode::ScaleNormalizing => trace,
            AlignmentMode::RotationOnly => 1.0,
        };
        let aligned: Vec<Coord> = b.iter().map(|p| rotate(&rotation, *p).map(|x| x * s)).collect();
        let residual: f64 = a
            .iter()
            .zip(&aligned)
            .map(|(pa, pb)| (0..3).map(|c| (pa[c] - pb[c]).powi(2)).sum::<f64>())
            .sum();
        let disparity = match self.mode {
            AlignmentMode::ScaleNormalizing => residual,
            AlignmentMode::RotationOnly => (residual / n as f64).sqrt(),
        };

        debug!(mode = %self.mode, points = n, disparity, scale = s, reflected, "procrustes alignment");
        Ok(AlignmentResult {
            mode: self.mode,
            rotation,
            reflected,
            scale: s / norm_b,
            baseline_centroid: mu_a,
            comparison_centroid: mu_b,
            disparity,
            baseline: a,
            aligned,
            display_factor: 1.0,
        })
    }
}

fn centered(points: &[Coord], space: Space) -> Result<(Vec<Coord>, Coord), AlignmentError> {
    if points.iter().flatten().any(|x| !x.is_finite()) {
        return Err(AlignmentError::NonFinite { space });
    }
    let n = points.len() as f64;
    let mut mu = [0.0; 3];
    for p in points {
        for c in 0..3 {
            mu[c] += p[c] / n;
        }
    }
    let out = points.iter().map(|p| [p[0] - mu[0], p[1] - mu[1], p[2] - mu[2]]).collect();
    Ok((out, mu))
}

fn frobenius(points: &[Coord]) -> f64 {
    points.iter().flatten().map(|x| x * x).sum::<f64>().sqrt()
}

/// Reject coincident or collinear point sets. Coplanar sets are fine.
fn check_rank(centered: &[Coord], space: Space) -> Result<(), AlignmentError> {
    let mut cov = Matrix3::<f64>::zeros();
    for p in centered {
        for r in 0..3 {
            for c in 0..3 {
                cov[(r, c)] += p[r] * p[c];
            }
        }
    }
    let eigen = SymmetricEigen::try_new(cov, SVD_EPS, MAX_SVD_ITERATIONS)
        .ok_or(AlignmentError::DecompositionFailed)?;
    let mut values: Vec<f64> = eigen.eigenvalues.iter().map(|v| v.max(0.0)).collect();
    values.sort_by(|x, y| y.total_cmp(x));

    let largest = values[0];
    let scale = centered.iter().flatten().fold(0.0f64, |m, x| m.max(x.abs()));
    if largest <= f64::EPSILON * scale.max(1.0) {
        return Err(AlignmentError::Degenerate { space, reason: "all points coincide".into() });
    }
    if values[1] < COLLINEAR_RATIO * largest {
        return Err(AlignmentError::Degenerate { space, reason: "points are collinear".into() });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rot_z(theta: f64) -> [[f64; 3]; 3] {
        let (s, c) = theta.sin_cos();
        [[c, -s, 0.0], [s, c, 0.0], [0.0, 0.0, 1.0]]
    }

    fn rot_x(theta: f64) -> [[f64; 3]; 3] {
        let (s, c) = theta.sin_cos();
        [[1.0, 0.0, 0.0], [0.0, c, -s], [0.0, s, c]]
    }

    fn transform(points: &[Coord], r: &[[f64; 3]; 3], scale: f64, shift: Coord) -> Vec<Coord> {
        points
            .iter()
            .map(|p| {
                let q = rotate(r, *p);
                [scale * q[0] + shift[0], scale * q[1] + shift[1], scale * q[2] + shift[2]]
            })
            .collect()
    }

    fn cloud() -> Vec<Coord> {
        vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.2, -0.3],
            [0.4, 2.0, 0.1],
            [-1.2, 0.7, 1.5],
            [0.3, -0.8, 0.9],
            [2.2, 1.1, -0.4],
        ]
    }

    #[test]
    fn test_rotated_translated_square_aligns_exactly() {
        let square = vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0]];
        let moved = transform(&square, &rot_z(std::f64::consts::FRAC_PI_2), 1.0, [5.0, 5.0, 5.0]);

        for allow in [true, false] {
            let result = Procrustes::rotation_only().with_reflection(allow).align(&square, &moved).unwrap();
            assert!(result.disparity < 1e-9, "disparity {}", result.disparity);
            for (a, b) in result.baseline.iter().zip(&result.aligned) {
                let drift = (0..3).map(|c| (a[c] - b[c]).powi(2)).sum::<f64>().sqrt();
                assert!(drift < 1e-9);
            }
            assert!((result.scale - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_identical_sets_have_zero_disparity() {
        for strategy in [Procrustes::scale_normalizing(), Procrustes::rotation_only()] {
            let result = strategy.align(&cloud(), &cloud()).unwrap();
            assert!(result.disparity < 1e-12);
            assert!(!result.reflected);
            for (a, b) in result.baseline.iter().zip(&result.aligned) {
                for c in 0..3 {
                    assert!((a[c] - b[c]).abs() < 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_apply_maps_raw_points_onto_output() {
        let moved = transform(&cloud(), &rot_x(0.7), 3.0, [1.0, -2.0, 4.0]);
        let result = Procrustes::scale_normalizing().align(&cloud(), &moved).unwrap();
        for (raw, out) in moved.iter().zip(&result.aligned) {
            let mapped = result.apply(*raw);
            for c in 0..3 {
                assert!((mapped[c] - out[c]).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_mirror_image_needs_reflection() {
        let mirror: Vec<Coord> = cloud().iter().map(|p| [p[0], p[1], -p[2]]).collect();
        let free = Procrustes::rotation_only().align(&cloud(), &mirror).unwrap();
        assert!(free.reflected);
        assert!(free.disparity < 1e-9);

        let proper = Procrustes::rotation_only().with_reflection(false).align(&cloud(), &mirror).unwrap();
        assert!(!proper.reflected);
        assert!(proper.disparity > 1e-3);
    }

    #[test]
    fn test_degenerate_inputs_rejected() {
        let strategy = Procrustes::rotation_only();
        assert!(matches!(
            strategy.align(&cloud(), &cloud()[..5]),
            Err(AlignmentError::LengthMismatch { baseline: 6, comparison: 5 })
        ));
        assert!(matches!(
            strategy.align(&cloud()[..2], &cloud()[..2]),
            Err(AlignmentError::InsufficientPoints { found: 2 })
        ));

        let line: Vec<Coord> = (0..5).map(|i| [i as f64, 2.0 * i as f64, -(i as f64)]).collect();
        assert!(matches!(
            strategy.align(&line, &cloud()[..5]),
            Err(AlignmentError::Degenerate { space: Space::Baseline, .. })
        ));
        let same = vec![[1.0, 1.0, 1.0]; 5];
        assert!(matches!(
            strategy.align(&cloud()[..5], &same),
            Err(AlignmentError::Degenerate { space: Space::Comparison, .. })
        ));

        let mut bad = cloud();
        bad[2][1] = f64::NAN;
        assert!(matches!(strategy.align(&cloud(), &bad), Err(AlignmentError::NonFinite { .. })));
    }

    fn points_strategy() -> impl Strategy<Value = Vec<Coord>> {
        prop::collection::vec(prop::array::uniform3(-10.0f64..10.0), 4..24)
            .prop_filter("well-spread", |pts| {
                let (centered, _) = centered(pts, Space::Baseline).unwrap();
                let mut cov = Matrix3::<f64>::zeros();
                for p in &centered {
                    for r in 0..3 {
                        for c in 0..3 {
                            cov[(r, c)] += p[r] * p[c];
                        }
                    }
                }
                let ev = cov.symmetric_eigenvalues();
                ev.min() > 1e-3 * ev.max()
            })
    }

    proptest! {
        #[test]
        fn prop_scale_normalizing_invariant_to_similarity(
            a in points_strategy(),
            noise in prop::collection::vec(prop::array::uniform3(-0.5f64..0.5), 24),
            theta in 0.0f64..6.28,
            phi in 0.0f64..6.28,
            scale in 0.1f64..20.0,
            shift in prop::array::uniform3(-50.0f64..50.0),
        ) {
            let b: Vec<Coord> = a.iter().zip(&noise).map(|(p, e)| [p[0] + e[0], p[1] + e[1], p[2] + e[2]]).collect();
            let r = rot_x(phi);
            let r = rot_z(theta).map(|row| rotate(&r, row));
            let moved = transform(&b, &r, scale, shift);

            let strategy = Procrustes::scale_normalizing();
            let plain = strategy.align(&a, &b).unwrap();
            let twisted = strategy.align(&a, &moved).unwrap();
            prop_assert!((plain.disparity - twisted.disparity).abs() < 1e-8);
            prop_assert!((0.0..=1.0 + 1e-12).contains(&twisted.disparity));
        }

        #[test]
        fn prop_rotation_only_invariant_to_rigid_motion(
            a in points_strategy(),
            noise in prop::collection::vec(prop::array::uniform3(-0.5f64..0.5), 24),
            theta in 0.0f64..6.28,
            shift in prop::array::uniform3(-50.0f64..50.0),
        ) {
            let b: Vec<Coord> = a.iter().zip(&noise).map(|(p, e)| [p[0] + e[0], p[1] + e[1], p[2] + e[2]]).collect();
            let moved = transform(&b, &rot_z(theta), 1.0, shift);

            let strategy = Procrustes::rotation_only().with_reflection(false);
            let plain = strategy.align(&a, &b).unwrap();
            let twisted = strategy.align(&a, &moved).unwrap();
            prop_assert!((plain.disparity - twisted.disparity).abs() < 1e-8);
        }
    }
}
