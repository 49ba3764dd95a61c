//! Cosine distance and exact nearest-neighbor search.
//!
//! Concept sets are small (hundreds), so everything here is a dense
//! brute-force pass. Ties are broken by index so results are deterministic.

/// Scale a vector to unit length. Returns `None` for zero or non-finite norms.
pub fn normalized(v: &[f64]) -> Option<Vec<f64>> {
    let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
    if !norm.is_finite() || norm == 0.0 {
        return None;
    }
    Some(v.iter().map(|x| x / norm).collect())
}

/// Full pairwise cosine-distance matrix, `1 - cos(θ)`, clamped to `[0, 2]`.
///
/// `None` if any row has a zero or non-finite norm: such a row has no
/// direction, so it has no cosine distance to anything.
pub fn cosine_distances(vectors: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
    let units = vectors.iter().map(|v| normalized(v)).collect::<Option<Vec<_>>>()?;
    let n = units.len();
    let mut out = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let dot: f64 = units[i].iter().zip(&units[j]).map(|(a, b)| a * b).sum();
            let d = (1.0 - dot).clamp(0.0, 2.0);
            out[i][j] = d;
            out[j][i] = d;
        }
    }
    Some(out)
}

/// The `k` nearest other rows to `node` given one row of a distance matrix.
///
/// Never includes `node` itself. Returns fewer than `k` only when there
/// are fewer than `k` other rows.
pub fn nearest(row: &[f64], node: usize, k: usize) -> Vec<(usize, f64)> {
    let mut candidates: Vec<(usize, f64)> = row
        .iter()
        .copied()
        .enumerate()
        .filter(|(j, _)| *j != node)
        .collect();
    candidates.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
    candidates.truncate(k);
    candidates
}
