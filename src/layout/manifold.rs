//! Neighborhood-preserving reduction of raw embeddings to 3D.
//!
//! Works from the embeddings directly, not from the concept graph:
//!
//! 1. cosine k-NN in the original space
//! 2. fuzzy membership per neighbor (`exp(-(d - ρ) / σ)`, with σ chosen so
//!    each row sums to `log2(k)`)
//! 3. symmetrize by fuzzy union, `P = A + Aᵀ - A∘Aᵀ`
//! 4. spectral initialization from the normalized affinity matrix
//! 5. SGD on the cross-entropy between `P` and the low-dimensional
//!    similarity `1 / (1 + a·d^(2b))`, with negative sampling
//!
//! `a` and `b` are fitted once per `(min_dist, spread)`.

use nalgebra::{DMatrix, SymmetricEigen};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, trace};

use crate::config::ManifoldConfig;
use crate::graph::knn;
use crate::model::{Coord, Space};
use super::{ensure_finite, LayoutError, LayoutInput, LayoutMode, LayoutStrategy};

const SMOOTH_K_TOLERANCE: f64 = 1e-5;
const MIN_K_DIST_SCALE: f64 = 1e-3;
const BANDWIDTH_ITERATIONS: usize = 64;
const GRADIENT_CLIP: f64 = 4.0;
const INIT_EXTENT: f64 = 10.0;

#[derive(Debug, Clone)]
pub struct ManifoldLayout {
    config: ManifoldConfig,
    a: f64,
    b: f64,
}

impl ManifoldLayout {
    pub fn new(config: ManifoldConfig) -> Self {
        let (a, b) = fit_ab(config.spread, config.min_dist);
        debug!(a, b, min_dist = config.min_dist, spread = config.spread, "fitted manifold curve");
        Self { config, a, b }
    }

    pub fn with_epochs(mut self, n_epochs: usize) -> Self {
        self.config.n_epochs = n_epochs;
        self
    }

    /// The fitted low-dimensional similarity curve parameters.
    pub fn curve(&self) -> (f64, f64) {
        (self.a, self.b)
    }
}

impl Default for ManifoldLayout {
    fn default() -> Self {
        Self::new(ManifoldConfig::default())
    }
}

impl LayoutStrategy for ManifoldLayout {
    fn mode(&self) -> LayoutMode {
        LayoutMode::Manifold
    }

    fn layout(&self, input: &LayoutInput<'_>) -> Result<Vec<Coord>, LayoutError> {
        let vectors = input.vectors;
        let n = vectors.len();
        if n == 0 {
            return Ok(Vec::new());
        }
        if n == 1 {
            return Ok(vec![[0.0; 3]]);
        }
        if let Some(dim) = vectors.first().map(Vec::len) {
            if vectors.iter().any(|v| v.len() != dim) {
                return Err(LayoutError::InvalidInput {
                    space: input.space,
                    reason: "embeddings have mixed dimensions".into(),
                });
            }
        }

        let mut rng = ChaCha8Rng::seed_from_u64(*self.config.seeds.get(input.space));
        let affinities =
            fuzzy_affinities(vectors, self.config.n_neighbors).ok_or_else(|| LayoutError::InvalidInput {
                space: input.space,
                reason: "an embedding has zero or non-finite norm".into(),
            })?;
        let mut embedding = match spectral_init(&affinities) {
            Some(init) => init,
            None => {
                debug!(space = %input.space, "spectral init unavailable, using random init");
                random_init(n, &mut rng)
            }
        };
        add_jitter(&mut embedding, &mut rng);
        normalize_columns(&mut embedding);

        self.optimize(&mut embedding, &affinities, input.space, &mut rng)?;
        debug!(space = %input.space, nodes = n, epochs = self.config.n_epochs, "manifold layout complete");
        Ok(embedding)
    }
}

// ============================================================================
// High-dimensional affinities
// ============================================================================

/// Symmetric fuzzy membership matrix of the k-NN graph.
fn fuzzy_affinities(vectors: &[Vec<f64>], n_neighbors: usize) -> Option<Vec<Vec<f64>>> {
    let n = vectors.len();
    let distances = knn::cosine_distances(vectors)?;
    // neighbor count includes the point itself
    let k = n_neighbors.min(n).max(2);
    let target = (k as f64).log2();
    let mean_all = distances.iter().flatten().sum::<f64>() / (n * n) as f64;

    let mut directed = vec![vec![0.0; n]; n];
    for (i, row) in distances.iter().enumerate() {
        let neighbors = knn::nearest(row, i, k - 1);
        let rho = neighbors.iter().map(|(_, d)| *d).find(|d| *d > 0.0).unwrap_or(0.0);
        let mean_row = row.iter().sum::<f64>() / n as f64;
        let sigma = bandwidth(&neighbors, rho, target, if rho > 0.0 { mean_row } else { mean_all });
        for (j, d) in neighbors {
            let excess = d - rho;
            directed[i][j] = if excess <= 0.0 { 1.0 } else { (-excess / sigma).exp() };
        }
    }

    let mut p = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..n {
            let (a, b) = (directed[i][j], directed[j][i]);
            p[i][j] = a + b - a * b;
        }
    }
    Some(p)
}

/// Binary search for σ such that `Σ exp(-(d - ρ)/σ) = target`.
fn bandwidth(neighbors: &[(usize, f64)], rho: f64, target: f64, mean_distance: f64) -> f64 {
    let (mut lo, mut hi, mut mid) = (0.0f64, f64::INFINITY, 1.0f64);
    for _ in 0..BANDWIDTH_ITERATIONS {
        let psum: f64 = neighbors
            .iter()
            .map(|(_, d)| {
                let excess = d - rho;
                if excess > 0.0 { (-excess / mid).exp() } else { 1.0 }
            })
            .sum();
        if (psum - target).abs() < SMOOTH_K_TOLERANCE {
            break;
        }
        if psum > target {
            hi = mid;
            mid = (lo + hi) / 2.0;
        } else {
            lo = mid;
            mid = if hi.is_infinite() { mid * 2.0 } else { (lo + hi) / 2.0 };
        }
    }
    mid.max(MIN_K_DIST_SCALE * mean_distance).max(f64::MIN_POSITIVE)
}

// ============================================================================
// Initialization
// ============================================================================

/// Top non-trivial eigenvectors of `D^-1/2 P D^-1/2`.
///
/// `None` when the affinity graph is disconnected or too small to carry
/// three non-trivial eigenvectors.
fn spectral_init(p: &[Vec<f64>]) -> Option<Vec<Coord>> {
    let n = p.len();
    if n < 5 || component_count(p) > 1 {
        return None;
    }
    let degrees: Vec<f64> = p.iter().map(|row| row.iter().sum::<f64>()).collect();
    if degrees.iter().any(|d| *d <= 0.0) {
        return None;
    }
    let m = DMatrix::from_fn(n, n, |i, j| p[i][j] / (degrees[i] * degrees[j]).sqrt());
    let eigen = SymmetricEigen::try_new(m, 1e-12, 10_000)?;

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&x, &y| eigen.eigenvalues[y].total_cmp(&eigen.eigenvalues[x]));

    let mut coords = vec![[0.0; 3]; n];
    for (c, &col) in order.iter().skip(1).take(3).enumerate() {
        for (row, coord) in coords.iter_mut().enumerate() {
            coord[c] = eigen.eigenvectors[(row, col)];
        }
    }
    let max = coords.iter().flatten().fold(0.0f64, |m, x| m.max(x.abs()));
    if !(max.is_finite() && max > 0.0) {
        return None;
    }
    let expansion = INIT_EXTENT / max;
    for x in coords.iter_mut().flatten() {
        *x *= expansion;
    }
    Some(coords)
}

fn component_count(p: &[Vec<f64>]) -> usize {
    let n = p.len();
    let mut seen = vec![false; n];
    let mut components = 0;
    for start in 0..n {
        if seen[start] {
            continue;
        }
        components += 1;
        seen[start] = true;
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            for (next, &w) in p[node].iter().enumerate() {
                if w > 0.0 && !seen[next] {
                    seen[next] = true;
                    stack.push(next);
                }
            }
        }
    }
    components
}

fn random_init(n: usize, rng: &mut ChaCha8Rng) -> Vec<Coord> {
    (0..n)
        .map(|_| {
            [
                rng.gen_range(-INIT_EXTENT..INIT_EXTENT),
                rng.gen_range(-INIT_EXTENT..INIT_EXTENT),
                rng.gen_range(-INIT_EXTENT..INIT_EXTENT),
            ]
        })
        .collect()
}

fn add_jitter(embedding: &mut [Coord], rng: &mut ChaCha8Rng) {
    for x in embedding.iter_mut().flatten() {
        *x += rng.gen_range(-1e-4..1e-4);
    }
}

/// Rescale each axis to `[0, 10]`.
fn normalize_columns(embedding: &mut [Coord]) {
    for c in 0..3 {
        let (lo, hi) = embedding.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
            (lo.min(p[c]), hi.max(p[c]))
        });
        let span = hi - lo;
        if span > 0.0 {
            for p in embedding.iter_mut() {
                p[c] = INIT_EXTENT * (p[c] - lo) / span;
            }
        }
    }
}

// ============================================================================
// Optimization
// ============================================================================

struct Edge {
    head: usize,
    tail: usize,
    epochs_per_sample: f64,
}

impl ManifoldLayout {
    fn optimize(
        &self,
        embedding: &mut [Coord],
        p: &[Vec<f64>],
        space: Space,
        rng: &mut ChaCha8Rng,
    ) -> Result<(), LayoutError> {
        let n = embedding.len();
        let n_epochs = self.config.n_epochs;
        let max_w = p.iter().flatten().fold(0.0f64, |m, w| m.max(*w));
        if max_w <= 0.0 {
            return Ok(());
        }
        // edges too weak to be sampled even once are dropped
        let floor = max_w / n_epochs as f64;
        let edges: Vec<Edge> = p
            .iter()
            .enumerate()
            .flat_map(|(i, row)| {
                row.iter()
                    .enumerate()
                    .filter(move |(j, w)| *j != i && **w >= floor && **w > 0.0)
                    .map(move |(j, w)| Edge { head: i, tail: j, epochs_per_sample: max_w / w })
            })
            .collect();

        let neg_rate = self.config.negative_sample_rate.max(1) as f64;
        let mut next_sample: Vec<f64> = edges.iter().map(|e| e.epochs_per_sample).collect();
        let mut next_negative: Vec<f64> = edges.iter().map(|e| e.epochs_per_sample / neg_rate).collect();
        let (a, b) = (self.a, self.b);

        for epoch in 0..n_epochs {
            let alpha = self.config.learning_rate * (1.0 - epoch as f64 / n_epochs as f64);
            let now = epoch as f64;

            for (e, edge) in edges.iter().enumerate() {
                if next_sample[e] > now {
                    continue;
                }
                let (j, k) = (edge.head, edge.tail);
                let mut current = embedding[j];
                let mut other = embedding[k];

                let dist_sq = squared_distance(current, other);
                let coeff = if dist_sq > 0.0 {
                    -2.0 * a * b * dist_sq.powf(b - 1.0) / (a * dist_sq.powf(b) + 1.0)
                } else {
                    0.0
                };
                for c in 0..3 {
                    let grad = (coeff * (current[c] - other[c])).clamp(-GRADIENT_CLIP, GRADIENT_CLIP);
                    current[c] += grad * alpha;
                    other[c] -= grad * alpha;
                }
                embedding[k] = other;
                next_sample[e] += edge.epochs_per_sample;

                let per_negative = edge.epochs_per_sample / neg_rate;
                let n_neg = ((now - next_negative[e]) / per_negative).max(0.0) as usize;
                for _ in 0..n_neg {
                    let s = rng.gen_range(0..n);
                    if s == j {
                        continue;
                    }
                    let other = embedding[s];
                    let dist_sq = squared_distance(current, other);
                    if dist_sq <= 0.0 {
                        continue;
                    }
                    let coeff = 2.0 * b / ((0.001 + dist_sq) * (a * dist_sq.powf(b) + 1.0));
                    for c in 0..3 {
                        let grad = (coeff * (current[c] - other[c])).clamp(-GRADIENT_CLIP, GRADIENT_CLIP);
                        current[c] += grad * alpha;
                    }
                }
                next_negative[e] += n_neg as f64 * per_negative;
                embedding[j] = current;
            }

            ensure_finite(embedding, LayoutMode::Manifold, space, epoch)?;
            if epoch % 100 == 0 {
                trace!(%space, epoch, alpha, "manifold epoch");
            }
        }
        Ok(())
    }
}

fn squared_distance(x: Coord, y: Coord) -> f64 {
    (0..3).map(|c| (x[c] - y[c]).powi(2)).sum()
}

// ============================================================================
// Curve fit
// ============================================================================

/// Least-squares fit of `1 / (1 + a·x^(2b))` to the target membership
/// curve: 1 below `min_dist`, `exp(-(x - min_dist) / spread)` above it.
///
/// Levenberg-Marquardt over 300 samples on `[0, 3·spread]`.
pub fn fit_ab(spread: f64, min_dist: f64) -> (f64, f64) {
    const SAMPLES: usize = 300;
    let xs: Vec<f64> = (0..SAMPLES)
        .map(|i| 3.0 * spread * i as f64 / (SAMPLES - 1) as f64)
        .collect();
    let ys: Vec<f64> = xs
        .iter()
        .map(|&x| if x < min_dist { 1.0 } else { (-(x - min_dist) / spread).exp() })
        .collect();

    let sse = |a: f64, b: f64| -> f64 {
        xs.iter()
            .zip(&ys)
            .map(|(&x, &y)| (curve(x, a, b) - y).powi(2))
            .sum()
    };

    let (mut a, mut b) = (1.0f64, 1.0f64);
    let mut lambda = 1e-3;
    let mut err = sse(a, b);
    for _ in 0..500 {
        // normal equations J^T J δ = -J^T r
        let (mut jaa, mut jab, mut jbb, mut ga, mut gb) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for (&x, &y) in xs.iter().zip(&ys) {
            let r = curve(x, a, b) - y;
            let (da, db) = curve_gradient(x, a, b);
            jaa += da * da;
            jab += da * db;
            jbb += db * db;
            ga += da * r;
            gb += db * r;
        }
        let (maa, mbb) = (jaa * (1.0 + lambda), jbb * (1.0 + lambda));
        let det = maa * mbb - jab * jab;
        if det.abs() < 1e-300 {
            break;
        }
        let step_a = -(mbb * ga - jab * gb) / det;
        let step_b = -(maa * gb - jab * ga) / det;
        let (na, nb) = (a + step_a, b + step_b);
        let new_err = if na > 0.0 && nb > 0.0 { sse(na, nb) } else { f64::INFINITY };
        if new_err < err {
            let converged = (err - new_err) < 1e-15 * err.max(1.0) || (step_a.abs() + step_b.abs()) < 1e-12;
            a = na;
            b = nb;
            err = new_err;
            lambda = (lambda / 10.0).max(1e-12);
            if converged {
                break;
            }
        } else {
            lambda *= 10.0;
            if lambda > 1e12 {
                break;
            }
        }
    }
    (a, b)
}

fn curve(x: f64, a: f64, b: f64) -> f64 {
    1.0 / (1.0 + a * x.powf(2.0 * b))
}

/// Partial derivatives of `curve` with respect to `a` and `b`.
fn curve_gradient(x: f64, a: f64, b: f64) -> (f64, f64) {
    if x <= 0.0 {
        return (0.0, 0.0);
    }
    let p = x.powf(2.0 * b);
    let denom = (1.0 + a * p).powi(2);
    (-p / denom, -a * p * 2.0 * x.ln() / denom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ConceptGraph;

    /// Three well-separated directions with small perturbations.
    fn clustered(n_per: usize) -> Vec<Vec<f64>> {
        let centers = [
            [1.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, 0.0, 1.0, 0.0],
        ];
        let mut out = Vec::new();
        for (ci, center) in centers.iter().enumerate() {
            for i in 0..n_per {
                let mut v = center.to_vec();
                let t = (i as f64 + 1.0) * 0.07 + ci as f64 * 0.013;
                v[(2 * ci + 1) % 6] += t.sin() * 0.2;
                v[(2 * ci + 3) % 6] += t.cos() * 0.1;
                out.push(v);
            }
        }
        out
    }

    fn run(layout: &ManifoldLayout, vectors: &[Vec<f64>], space: Space) -> Vec<Coord> {
        let graph = ConceptGraph::with_nodes(vectors.len());
        layout.layout(&LayoutInput::new(space, &graph, vectors)).unwrap()
    }

    #[test]
    fn test_curve_fit_matches_reference_parameters() {
        let (a, b) = fit_ab(1.0, 0.1);
        assert!((a - 1.577).abs() < 0.02, "a = {a}");
        assert!((b - 0.895).abs() < 0.01, "b = {b}");
    }

    #[test]
    fn test_bandwidth_hits_target() {
        let neighbors = [(1, 0.1), (2, 0.2), (3, 0.4), (4, 0.5)];
        let target = 5f64.log2();
        let sigma = bandwidth(&neighbors, 0.1, target, 0.3);
        let psum: f64 = neighbors
            .iter()
            .map(|(_, d)| if d - 0.1 > 0.0 { (-(d - 0.1) / sigma).exp() } else { 1.0 })
            .sum();
        assert!((psum - target).abs() < 1e-3);
    }

    #[test]
    fn test_affinities_are_symmetric_fuzzy_sets() {
        let p = fuzzy_affinities(&clustered(5), 6).unwrap();
        for i in 0..p.len() {
            assert_eq!(p[i][i], 0.0);
            for j in 0..p.len() {
                assert!((p[i][j] - p[j][i]).abs() < 1e-12);
                assert!((0.0..=1.0).contains(&p[i][j]));
            }
        }
    }

    #[test]
    fn test_reproducible_and_finite() {
        let vectors = clustered(8);
        let layout = ManifoldLayout::default().with_epochs(120);
        let a = run(&layout, &vectors, Space::Baseline);
        let b = run(&layout, &vectors, Space::Baseline);
        assert_eq!(a, b);
        assert_eq!(a.len(), vectors.len());
        assert!(a.iter().flatten().all(|x| x.is_finite()));
    }

    #[test]
    fn test_clusters_stay_together() {
        let vectors = clustered(8);
        let pos = run(&ManifoldLayout::default().with_epochs(200), &vectors, Space::Comparison);
        let d = |i: usize, j: usize| squared_distance(pos[i], pos[j]).sqrt();
        let within = (d(0, 1) + d(8, 9) + d(16, 17)) / 3.0;
        let across = (d(0, 8) + d(8, 16) + d(0, 16)) / 3.0;
        assert!(within < across, "within {within} across {across}");
    }

    #[test]
    fn test_small_inputs() {
        let layout = ManifoldLayout::default().with_epochs(50);
        assert!(run(&layout, &[], Space::Baseline).is_empty());
        assert_eq!(run(&layout, &[vec![1.0, 0.0]], Space::Baseline), vec![[0.0; 3]]);
        let three = run(&layout, &[vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]], Space::Baseline);
        assert_eq!(three.len(), 3);
        assert!(three.iter().flatten().all(|x| x.is_finite()));
    }

    #[test]
    fn test_mixed_dimensions_rejected() {
        let graph = ConceptGraph::with_nodes(2);
        let vectors = vec![vec![1.0, 0.0], vec![1.0, 0.0, 0.0]];
        let err = ManifoldLayout::default()
            .layout(&LayoutInput::new(Space::Baseline, &graph, &vectors))
            .unwrap_err();
        assert!(matches!(err, LayoutError::InvalidInput { .. }));
    }

    #[test]
    fn test_zero_norm_rows_rejected() {
        let graph = ConceptGraph::with_nodes(3);
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 0.0], vec![0.0, 1.0]];
        let err = ManifoldLayout::default()
            .layout(&LayoutInput::new(Space::Comparison, &graph, &vectors))
            .unwrap_err();
        assert!(matches!(err, LayoutError::InvalidInput { space: Space::Comparison, .. }));
    }
}
