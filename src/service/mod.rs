//! # Layout Service
//!
//! The only component with an external surface. Owns every derived
//! artifact and hands out read-only `Arc`s.
//!
//! - Layout runs are CPU-bound and go to the blocking pool
//!   (`spawn_blocking`); the caller's task is free meanwhile.
//! - Results are cached per key and per data [`Revision`]. Concurrent
//!   requests for the same key share one computation, which runs to the
//!   end even if the request that started it times out.
//! - Entries never expire by time. They go stale when the store revision
//!   changes or [`LayoutService::invalidate`] is called.
//! - A failed run is reported to every waiter and leaves the previous
//!   entry available through [`LayoutService::last_good`].

pub mod artifact;
pub mod cache;
mod pipeline;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::config::AtlasConfig;
use crate::distortion::DistortionAnalyzer;
use crate::model::*;
use crate::storage::{ConceptStore, CorpusSnapshot};
use crate::{Error, Result};

pub use crate::graph::TopologyMode;
pub use crate::layout::LayoutMode;
pub use artifact::*;
pub use cache::{LayoutCache, Revision};

use pipeline::DualRun;

// ============================================================================
// Keys
// ============================================================================

/// Cache key of a dual-space layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DualKey {
    pub topology: TopologyMode,
    pub layout: LayoutMode,
}

impl DualKey {
    pub fn new(topology: TopologyMode, layout: LayoutMode) -> Self {
        Self { topology, layout }
    }
}

impl std::fmt::Display for DualKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.topology, self.layout)
    }
}

/// Cache key of a single-space layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SingleKey {
    pub space: Space,
    pub layout: LayoutMode,
}

impl SingleKey {
    pub fn new(space: Space, layout: LayoutMode) -> Self {
        Self { space, layout }
    }
}

/// Which rendered layout a detail query measures distortion against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetailView {
    pub key: DualKey,
    pub space: Space,
}

// ============================================================================
// LayoutService
// ============================================================================

pub struct LayoutService<S: ConceptStore> {
    store: Arc<S>,
    config: Arc<AtlasConfig>,
    epoch: AtomicU64,
    dual: LayoutCache<DualKey, DualRun>,
    single: LayoutCache<SingleKey, SingleSpaceLayout>,
}

impl<S: ConceptStore> LayoutService<S> {
    /// Build a service. The configuration is validated here.
    pub fn new(store: S, config: AtlasConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store: Arc::new(store),
            config: Arc::new(config),
            epoch: AtomicU64::new(0),
            dual: LayoutCache::new(),
            single: LayoutCache::new(),
        })
    }

    pub fn with_defaults(store: S) -> Result<Self> {
        Self::new(store, AtlasConfig::default())
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &AtlasConfig {
        &self.config
    }

    /// Current data version: store revision plus local invalidations.
    pub async fn revision(&self) -> Result<Revision> {
        Ok(Revision {
            store: self.store.revision().await?,
            epoch: self.epoch.load(Ordering::Acquire),
        })
    }

    /// Mark every cached layout stale. Upstream change hooks call this.
    pub fn invalidate(&self) {
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        info!(epoch, "layout cache invalidated");
    }

    /// Last successful dual layout for `key`, even if stale.
    pub fn last_good(&self, key: DualKey) -> Option<Arc<DualLayout>> {
        self.dual.last_good(&key).map(|run| Arc::clone(&run.layout))
    }

    pub fn last_good_single(&self, key: SingleKey) -> Option<Arc<SingleSpaceLayout>> {
        self.single.last_good(&key)
    }

    // ------------------------------------------------------------------------
    // Layouts
    // ------------------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn dual_layout(&self, key: DualKey) -> Result<Arc<DualLayout>> {
        Ok(Arc::clone(&self.dual_run(key).await?.layout))
    }

    #[instrument(skip(self))]
    pub async fn single_space_layout(&self, key: SingleKey) -> Result<Arc<SingleSpaceLayout>> {
        let revision = self.revision().await?;
        let (store, config) = (Arc::clone(&self.store), Arc::clone(&self.config));
        self.single
            .get_or_compute(&key, revision, move || async move {
                let snapshot = store.snapshot().await?;
                run_blocking(move || pipeline::compute_single(&config, &snapshot, key)).await
            })
            .await
    }

    async fn dual_run(&self, key: DualKey) -> Result<Arc<DualRun>> {
        let revision = self.revision().await?;
        let (store, config) = (Arc::clone(&self.store), Arc::clone(&self.config));
        self.dual
            .get_or_compute(&key, revision, move || async move {
                let snapshot = store.snapshot().await?;
                debug!(%key, concepts = snapshot.concepts.len(), "starting dual layout run");
                run_blocking(move || pipeline::compute_dual(&config, &snapshot, key)).await
            })
            .await
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Definition, metrics and relationships of one concept.
    ///
    /// With a `view`, each relationship also gets its rendered distance and
    /// distortion tier in that layout, and the concept its drift.
    #[instrument(skip(self))]
    pub async fn concept_detail(&self, name: &str, view: Option<DetailView>) -> Result<ConceptDetail> {
        let snapshot = self.store.snapshot().await?;
        let concept = snapshot
            .concept(name)
            .ok_or_else(|| Error::NotFound(format!("Concept '{name}'")))?;
        let definition = self.store.definition(name).await?;

        let mut relationships: Vec<DetailEdge> = Vec::new();
        for rel in snapshot.relationships_of(name) {
            let (Some(target), Some(direction)) = (rel.other(name), rel.direction_from(name)) else {
                continue;
            };
            if relationships.iter().any(|e| &e.target == target) {
                continue;
            }
            relationships.push(DetailEdge {
                target: target.clone(),
                distance: rel.distance,
                comparison_distance: rel.comparison_distance,
                direction,
                annotation: rel.annotation.clone(),
                rendered_distance: None,
                distortion: None,
            });
        }

        let mut drift = None;
        let mut position = None;
        if let Some(view) = view {
            let run = self.dual_run(view.key).await?;
            if let Some(focal) = run.index_of(name) {
                let node = run.layout.node(name);
                drift = node.map(|n| n.coordinates.drift());
                position = node.map(|n| n.coordinates.position(view.space));

                let analyzer = DistortionAnalyzer::new(self.config.distortion.clone());
                let index = analyzer.index(focal, &run.relations, run.positions.get(view.space));
                for edge in relationships.iter_mut() {
                    let Some(j) = run.index_of(edge.target.as_str()) else { continue };
                    if let Some(n) = index.neighbors.iter().find(|n| n.neighbor == j) {
                        edge.rendered_distance = Some(n.rendered);
                        edge.distortion = Some(n.tier);
                    }
                }
            }
        }

        let relationship_count = relationships.len();
        Ok(ConceptDetail {
            name: concept.id.clone(),
            definition,
            avg_distance: snapshot.average_distance(name),
            drift,
            position,
            relationships,
            relationship_count,
        })
    }

    /// The concepts nearest to `name` in the rendered `space` of a dual
    /// layout, linked by a relationship or not.
    #[instrument(skip(self))]
    pub async fn spatial_neighbors(&self, name: &str, key: DualKey, space: Space) -> Result<Vec<NeighborEntry>> {
        let run = self.dual_run(key).await?;
        let Some(focal) = run.index_of(name) else {
            return Err(match run.layout.exclusions.reason_for(name) {
                Some(issue) => Error::Data(format!("Concept '{name}' is excluded from the {key} layout: {issue}")),
                None => Error::NotFound(format!("Concept '{name}' in the {key} layout")),
            });
        };
        let analyzer = DistortionAnalyzer::new(self.config.distortion.clone());
        Ok(analyzer
            .spatial_neighbors(focal, &run.relations, run.positions.get(space))
            .into_iter()
            .map(|n| NeighborEntry {
                name: run.ids[n.index].clone(),
                distance: n.distance,
                linked: n.linked,
            })
            .collect())
    }

    /// Case-insensitive substring search over concept names.
    ///
    /// Positions come from an already computed baseline layout; nothing is
    /// computed here.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let needle = query.to_lowercase();
        let revision = self.revision().await?;
        let layout = [LayoutMode::ForceDirected, LayoutMode::Manifold]
            .into_iter()
            .find_map(|mode| self.single.get(&SingleKey::new(Space::Baseline, mode), revision));

        Ok(self
            .store
            .concepts()
            .await?
            .into_iter()
            .filter(|c| c.name().to_lowercase().contains(&needle))
            .take(limit)
            .map(|c| SearchHit {
                position: layout.as_ref().and_then(|l| l.node(c.name())).map(|n| n.position),
                name: c.id,
            })
            .collect())
    }

    pub async fn stats(&self) -> Result<AtlasStats> {
        let snapshot: CorpusSnapshot = self.store.snapshot().await?;
        let count = snapshot.relationships.len();
        let avg_distance =
            (count > 0).then(|| snapshot.relationships.iter().map(|r| r.distance).sum::<f64>() / count as f64);
        Ok(AtlasStats {
            concepts: snapshot.concepts.len(),
            relationships: count,
            avg_distance,
        })
    }

    /// Relationships whose two spaces disagree by at least `threshold`,
    /// largest disagreement first. Rows without a comparison distance are skipped.
    pub async fn high_divergence_edges(&self, threshold: f64, limit: usize) -> Result<Vec<DivergentEdge>> {
        let mut edges: Vec<DivergentEdge> = self
            .store
            .relationships()
            .await?
            .into_iter()
            .filter_map(|r| {
                let delta = r.delta()?;
                let comparison_distance = r.comparison_distance?;
                (delta >= threshold).then(|| DivergentEdge {
                    a: r.a,
                    b: r.b,
                    distance: r.distance,
                    comparison_distance,
                    delta,
                    annotation: r.annotation,
                })
            })
            .collect();
        edges.sort_by(|x, y| y.delta.total_cmp(&x.delta));
        edges.truncate(limit);
        Ok(edges)
    }
}

/// Run a CPU-bound closure on the blocking pool.
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Worker(format!("layout worker failed: {e}")))?
}
