//! Fruchterman-Reingold spring embedder in three dimensions.
//!
//! Every pair of nodes repels with `k² / d`; every edge attracts with
//! `w · d² / k`. Each step moves a node along its net force by at most the
//! current temperature, which decays linearly to a floor of one step.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, trace};

use crate::config::ForceConfig;
use crate::graph::TopologyMode;
use crate::model::Coord;
use super::{ensure_finite, LayoutError, LayoutInput, LayoutMode, LayoutStrategy};

/// Pairs closer than this are treated as this far apart.
const MIN_DISTANCE: f64 = 0.01;

#[derive(Debug, Clone)]
pub struct ForceDirectedLayout {
    config: ForceConfig,
    iterations: usize,
}

impl ForceDirectedLayout {
    pub fn new(config: ForceConfig) -> Self {
        let iterations = config.iterations;
        Self { config, iterations }
    }

    /// Step count for `topology`: independent k-NN graphs are denser and
    /// get `independent_iterations`.
    pub fn for_topology(config: ForceConfig, topology: TopologyMode) -> Self {
        let iterations = match topology {
            TopologyMode::Shared => config.iterations,
            TopologyMode::Independent => config.independent_iterations,
        };
        Self { config, iterations }
    }

    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    fn initial_positions(&self, n: usize, seed: u64) -> Vec<Coord> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                [
                    rng.gen_range(0.0..1.0),
                    rng.gen_range(0.0..1.0),
                    rng.gen_range(0.0..1.0),
                ]
            })
            .collect()
    }
}

impl Default for ForceDirectedLayout {
    fn default() -> Self {
        Self::new(ForceConfig::default())
    }
}

impl LayoutStrategy for ForceDirectedLayout {
    fn mode(&self) -> LayoutMode {
        LayoutMode::ForceDirected
    }

    fn layout(&self, input: &LayoutInput<'_>) -> Result<Vec<Coord>, LayoutError> {
        let graph = input.graph;
        let n = graph.node_count();
        if n == 0 {
            return Ok(Vec::new());
        }
        let seed = *self.config.seeds.get(input.space);
        let mut pos = self.initial_positions(n, seed);
        if n == 1 {
            return Ok(vec![[0.0; 3]]);
        }

        let k = self.config.spring_k;
        let mut t = extent(&pos) * self.config.initial_temperature;
        let dt = t / (self.iterations as f64 + 1.0);
        let mut disp = vec![[0.0f64; 3]; n];

        for iteration in 0..self.iterations {
            // Repulsion between every pair.
            for d in disp.iter_mut() {
                *d = [0.0; 3];
            }
            for i in 0..n {
                for j in (i + 1)..n {
                    let delta = sub(pos[i], pos[j]);
                    let dist = norm(delta).max(MIN_DISTANCE);
                    let f = k * k / (dist * dist);
                    for c in 0..3 {
                        disp[i][c] += delta[c] * f;
                        disp[j][c] -= delta[c] * f;
                    }
                }
            }
            // Attraction along edges.
            for (a, b, edge) in graph.edges() {
                let delta = sub(pos[a], pos[b]);
                let dist = norm(delta).max(MIN_DISTANCE);
                let f = edge.weight * dist / k;
                for c in 0..3 {
                    disp[a][c] -= delta[c] * f;
                    disp[b][c] += delta[c] * f;
                }
            }

            let mut moved = 0.0;
            for (p, d) in pos.iter_mut().zip(&disp) {
                let len = norm(*d);
                let len = if len < MIN_DISTANCE { 0.1 } else { len };
                let step = t / len;
                for c in 0..3 {
                    let delta = d[c] * step;
                    p[c] += delta;
                    moved += delta * delta;
                }
            }
            ensure_finite(&pos, LayoutMode::ForceDirected, input.space, iteration)?;
            t = (t - dt).max(dt);

            let mean_step = moved.sqrt() / n as f64;
            trace!(iteration, temperature = t, mean_step, "force step");
            if let Some(threshold) = self.config.convergence_threshold {
                if mean_step < threshold {
                    debug!(space = %input.space, iteration, "force layout converged early");
                    break;
                }
            }
        }

        rescale(&mut pos, self.config.scale);
        ensure_finite(&pos, LayoutMode::ForceDirected, input.space, self.iterations)?;
        debug!(
            space = %input.space,
            nodes = n,
            edges = graph.edge_count(),
            isolated = graph.isolated_count(),
            "force layout complete"
        );
        Ok(pos)
    }
}

fn sub(a: Coord, b: Coord) -> Coord {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn norm(v: Coord) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

/// Largest per-axis spread of the point set.
fn extent(pos: &[Coord]) -> f64 {
    (0..3)
        .map(|c| {
            let (lo, hi) = pos.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
                (lo.min(p[c]), hi.max(p[c]))
            });
            hi - lo
        })
        .fold(0.0, f64::max)
}

/// Center on the mean and scale so the largest |component| equals `scale`.
fn rescale(pos: &mut [Coord], scale: f64) {
    let n = pos.len() as f64;
    let mut mean = [0.0; 3];
    for p in pos.iter() {
        for c in 0..3 {
            mean[c] += p[c] / n;
        }
    }
    let mut lim: f64 = 0.0;
    for p in pos.iter_mut() {
        for c in 0..3 {
            p[c] -= mean[c];
            lim = lim.max(p[c].abs());
        }
    }
    if lim > 0.0 {
        for p in pos.iter_mut() {
            for x in p.iter_mut() {
                *x *= scale / lim;
            }
        }
    }
}
