//! Incremental 3D convex hull.
//!
//! Points are inserted in a canonical order (by coordinates), so the face
//! list depends only on the point set, not on how the caller ordered it.
//! Faces come out as outward-oriented index triples, each rotated to start
//! at its smallest index, and sorted.

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};

use crate::model::Coord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvexHull {
    /// Counter-clockwise when seen from outside.
    pub faces: Vec<[usize; 3]>,
    /// Indices of points on the hull, ascending.
    pub vertices: Vec<usize>,
}

struct Face {
    v: [usize; 3],
    normal: Coord,
    offset: f64,
}

impl ConvexHull {
    /// Hull of `points`, or `None` when they do not span three dimensions
    /// (fewer than four points, or all coplanar).
    pub fn compute(points: &[Coord]) -> Option<ConvexHull> {
        if points.len() < 4 || points.iter().flatten().any(|x| !x.is_finite()) {
            return None;
        }
        let mut order: Vec<usize> = (0..points.len()).collect();
        order.sort_by(|&i, &j| {
            let (p, q) = (points[i], points[j]);
            p[0].total_cmp(&q[0])
                .then(p[1].total_cmp(&q[1]))
                .then(p[2].total_cmp(&q[2]))
                .then(i.cmp(&j))
        });

        let extent = points.iter().flatten().fold(0.0f64, |m, x| m.max(x.abs())).max(1.0);
        let eps = 1e-10 * extent;

        let seed = initial_simplex(points, &order, eps)?;
        let interior = {
            let mut c = [0.0; 3];
            for &i in &seed {
                for k in 0..3 {
                    c[k] += points[i][k] / 4.0;
                }
            }
            c
        };
        let mut faces: Vec<Face> = [
            [seed[0], seed[1], seed[2]],
            [seed[0], seed[1], seed[3]],
            [seed[0], seed[2], seed[3]],
            [seed[1], seed[2], seed[3]],
        ]
        .into_iter()
        .map(|v| oriented_face(points, v, interior))
        .collect();

        for &p in &order {
            if seed.contains(&p) {
                continue;
            }
            let point = points[p];
            let (visible, kept): (Vec<Face>, Vec<Face>) = faces
                .into_iter()
                .partition(|f| dot(f.normal, point) - f.offset > eps);
            faces = kept;
            if visible.is_empty() {
                continue;
            }

            let edges: HashSet<(usize, usize)> = visible
                .iter()
                .flat_map(|f| [(f.v[0], f.v[1]), (f.v[1], f.v[2]), (f.v[2], f.v[0])])
                .collect();
            for &(a, b) in &edges {
                if !edges.contains(&(b, a)) {
                    faces.push(face(points, [a, b, p]));
                }
            }
        }

        let mut out: Vec<[usize; 3]> = faces.iter().map(|f| canonical(f.v)).collect();
        out.sort_unstable();
        let mut vertices: Vec<usize> = out.iter().flatten().copied().collect();
        vertices.sort_unstable();
        vertices.dedup();
        Some(ConvexHull { faces: out, vertices })
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Faces with indices translated through `ids`.
    pub fn faces_by<T: Clone>(&self, ids: &[T]) -> Vec<[T; 3]> {
        self.faces
            .iter()
            .map(|f| [ids[f[0]].clone(), ids[f[1]].clone(), ids[f[2]].clone()])
            .collect()
    }
}

/// Four affinely independent points, chosen deterministically from `order`.
fn initial_simplex(points: &[Coord], order: &[usize], eps: f64) -> Option<[usize; 4]> {
    let farthest = |score: &dyn Fn(Coord) -> f64| -> Option<(usize, f64)> {
        order
            .iter()
            .map(|&i| (i, score(points[i])))
            .fold(None, |best: Option<(usize, f64)>, (i, s)| match best {
                Some((_, bs)) if bs >= s => best,
                _ => Some((i, s)),
            })
    };

    let a = order[0];
    let pa = points[a];
    let (b, dab) = farthest(&|p| norm(sub(p, pa)))?;
    if dab <= eps {
        return None;
    }
    let ab = sub(points[b], pa);
    let (c, dc) = farthest(&|p| norm(cross(ab, sub(p, pa))) / dab)?;
    if dc <= eps {
        return None;
    }
    let n = cross(ab, sub(points[c], pa));
    let nn = norm(n);
    let (d, dd) = farthest(&|p| dot(n, sub(p, pa)).abs() / nn)?;
    if dd <= eps {
        return None;
    }
    Some([a, b, c, d])
}

fn face(points: &[Coord], v: [usize; 3]) -> Face {
    let n = cross(sub(points[v[1]], points[v[0]]), sub(points[v[2]], points[v[0]]));
    let len = norm(n);
    let normal = if len > 0.0 { n.map(|x| x / len) } else { n };
    Face { v, normal, offset: dot(normal, points[v[0]]) }
}

fn oriented_face(points: &[Coord], v: [usize; 3], interior: Coord) -> Face {
    let f = face(points, v);
    if dot(f.normal, interior) - f.offset > 0.0 {
        face(points, [v[0], v[2], v[1]])
    } else {
        f
    }
}

/// Rotate so the smallest index comes first, keeping orientation.
fn canonical(v: [usize; 3]) -> [usize; 3] {
    match (0..3).min_by_key(|&i| v[i]).unwrap_or(0) {
        0 => v,
        1 => [v[1], v[2], v[0]],
        _ => [v[2], v[0], v[1]],
    }
}

fn sub(a: Coord, b: Coord) -> Coord {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn dot(a: Coord, b: Coord) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: Coord, b: Coord) -> Coord {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn norm(a: Coord) -> f64 {
    dot(a, a).sqrt()
}
