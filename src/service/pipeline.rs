//! The synchronous pipeline behind each cache entry.
//!
//! Pure functions of `(config, snapshot, key)`. Strategies are picked here,
//! once per run, and passed down as trait objects.

use std::sync::Arc;

use chrono::Utc;
use hashbrown::HashMap;
use tracing::info;

use crate::align::{AlignmentMode, AlignmentStrategy, DisplayFrame, Procrustes};
use crate::config::AtlasConfig;
use crate::drift::DriftAnalyzer;
use crate::graph::{ConceptGraph, ExclusionReport, GraphBuilder, TopologyMode};
use crate::layout::{ForceDirectedLayout, LayoutInput, LayoutMode, LayoutStrategy, ManifoldLayout};
use crate::model::*;
use crate::storage::CorpusSnapshot;
use crate::{Error, Result};
use super::artifact::*;
use super::{DualKey, SingleKey};

/// A computed dual layout plus what follow-up queries need.
#[derive(Debug)]
pub struct DualRun {
    pub layout: Arc<DualLayout>,
    /// Pipeline order; `positions` and `relations` are indexed by it.
    pub ids: Vec<ConceptId>,
    pub index: HashMap<ConceptId, usize>,
    /// Baseline and aligned comparison coordinates, as rendered.
    pub positions: PerSpace<Vec<Coord>>,
    /// Relationship rows as a graph over the same nodes.
    pub relations: ConceptGraph,
}

impl DualRun {
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }
}

pub fn layout_strategy(config: &AtlasConfig, layout: LayoutMode, topology: TopologyMode) -> Box<dyn LayoutStrategy> {
    match layout {
        LayoutMode::ForceDirected => Box::new(ForceDirectedLayout::for_topology(config.force.clone(), topology)),
        LayoutMode::Manifold => Box::new(ManifoldLayout::new(config.manifold.clone())),
    }
}

pub fn alignment_strategy(config: &AtlasConfig, key: DualKey) -> (Box<dyn AlignmentStrategy>, DisplayFrame) {
    let cfg = &config.alignment;
    let mode = match (key.layout, key.topology) {
        (LayoutMode::Manifold, _) => cfg.manifold_mode,
        (LayoutMode::ForceDirected, TopologyMode::Shared) => cfg.shared_mode,
        (LayoutMode::ForceDirected, TopologyMode::Independent) => cfg.independent_mode,
    };
    let frame = match (mode, key.layout) {
        (AlignmentMode::ScaleNormalizing, _) => DisplayFrame::Constrained { scale: cfg.constrained_scale },
        (AlignmentMode::RotationOnly, LayoutMode::Manifold) => DisplayFrame::TargetStd { std: cfg.manifold_std },
        (AlignmentMode::RotationOnly, LayoutMode::ForceDirected) => {
            DisplayFrame::TargetStd { std: cfg.rotation_only_std }
        }
    };
    let strategy = Procrustes::new(mode).with_reflection(cfg.allow_reflection);
    (Box::new(strategy), frame)
}

fn method(config: &AtlasConfig, key: DualKey) -> String {
    match (key.layout, key.topology) {
        (LayoutMode::Manifold, _) => format!(
            "Manifold reduction (n_neighbors={}, min_dist={})",
            config.manifold.n_neighbors, config.manifold.min_dist
        ),
        (LayoutMode::ForceDirected, TopologyMode::Shared) => {
            "Shared relationship graph, force-directed (constrained comparison)".to_string()
        }
        (LayoutMode::ForceDirected, TopologyMode::Independent) => format!(
            "Independent k-NN graphs (k={}), force-directed (authentic topology)",
            config.graph.knn_k
        ),
    }
}

/// Reject runs that cannot produce anything before any work starts.
fn require_space(snapshot: &CorpusSnapshot, space: Space) -> Result<()> {
    if snapshot.concepts.iter().any(|c| c.embedding(space).is_some()) {
        Ok(())
    } else {
        Err(Error::Configuration(format!("no concept has a {space} embedding")))
    }
}

pub fn compute_dual(config: &AtlasConfig, snapshot: &CorpusSnapshot, key: DualKey) -> Result<DualRun> {
    require_space(snapshot, Space::Baseline)?;
    require_space(snapshot, Space::Comparison)?;

    let builder = GraphBuilder::new(config.graph.clone());
    let mut report = ExclusionReport::default();
    let nodes = builder.prepare(&snapshot.concepts, &Space::ALL, &mut report);
    let relations = builder.shared(&nodes, &snapshot.relationships, &mut report);
    let graphs = match key.topology {
        TopologyMode::Shared => PerSpace::new(relations.clone(), relations.clone()),
        TopologyMode::Independent => PerSpace::new(
            builder.independent(nodes.vectors(Space::Baseline))?,
            builder.independent(nodes.vectors(Space::Comparison))?,
        ),
    };

    let layout = layout_strategy(config, key.layout, key.topology);
    let raw = graphs.as_ref().try_map(|space, graph| {
        layout.layout(&LayoutInput::new(space, graph, nodes.vectors(space)))
    })?;

    let (aligner, frame) = alignment_strategy(config, key);
    let alignment = aligner.align(&raw.baseline, &raw.comparison)?.framed(frame);
    let analyzer = DriftAnalyzer::new(&config.drift);
    let drift = analyzer.analyze(&alignment);

    // nodes go out sorted by drift; `slot_of` maps pipeline index to output index
    let ranking = drift.ranking();
    let mut slot_of = vec![0usize; ranking.len()];
    for (slot, &i) in ranking.iter().enumerate() {
        slot_of[i] = slot;
    }
    let out_nodes: Vec<DualNode> = ranking
        .iter()
        .map(|&i| {
            let name = &nodes.ids[i];
            let (a, b, amp, d) = (alignment.baseline[i], alignment.aligned[i], drift.amplified[i], drift.drift[i]);
            let coordinates = match key.layout {
                LayoutMode::ForceDirected => ModeCoordinates::Graph(GraphModeCoordinates {
                    pos_a: a,
                    pos_b: b,
                    pos_b_organic: amp,
                    drift: d,
                }),
                LayoutMode::Manifold => ModeCoordinates::Manifold(ManifoldModeCoordinates {
                    pos_a_umap: a,
                    pos_b_umap: b,
                    pos_b_organic: amp,
                    drift_umap: d,
                }),
            };
            DualNode {
                name: name.clone(),
                coordinates,
                avg_distance: snapshot.average_distance(name.as_str()),
                connections: snapshot.connection_count(name.as_str()),
            }
        })
        .collect();

    let remap = |faces: Vec<[usize; 3]>| -> Vec<[usize; 3]> {
        faces
            .into_iter()
            .map(|f| [slot_of[f[0]], slot_of[f[1]], slot_of[f[2]]])
            .collect()
    };
    let hulls = analyzer.hulls(&alignment).map(|h| HullFaces {
        baseline: h.baseline.map(|hull| remap(hull.faces)),
        comparison: h.comparison.map(|hull| remap(hull.faces)),
    });

    info!(
        topology = %key.topology,
        layout = %key.layout,
        concepts = out_nodes.len(),
        excluded = report.excluded_concepts().len(),
        disparity = alignment.disparity,
        mean_drift = drift.mean,
        "dual layout computed"
    );

    let metadata = DualMetadata {
        disparity: alignment.disparity,
        num_concepts: out_nodes.len(),
        topology: key.topology,
        layout: key.layout,
        alignment_mode: alignment.mode,
        reflected: alignment.reflected,
        amplification: drift.factor,
        mean_drift: drift.mean,
        max_drift: drift.max,
        baseline_model: config.space_labels.baseline.clone(),
        comparison_model: config.space_labels.comparison.clone(),
        method: method(config, key),
        revision: snapshot.revision,
        computed_at: Utc::now(),
    };
    let ids = nodes.ids.clone();
    let index = ids.iter().cloned().enumerate().map(|(i, id)| (id, i)).collect();
    Ok(DualRun {
        layout: Arc::new(DualLayout { nodes: out_nodes, metadata, hulls, exclusions: report }),
        ids,
        index,
        positions: PerSpace::new(alignment.baseline, alignment.aligned),
        relations,
    })
}

pub fn compute_single(config: &AtlasConfig, snapshot: &CorpusSnapshot, key: SingleKey) -> Result<SingleSpaceLayout> {
    require_space(snapshot, key.space)?;

    let builder = GraphBuilder::new(config.graph.clone());
    let mut report = ExclusionReport::default();
    let nodes = builder.prepare(&snapshot.concepts, &[key.space], &mut report);
    let relations = builder.shared(&nodes, &snapshot.relationships, &mut report);

    let layout = layout_strategy(config, key.layout, TopologyMode::Shared);
    let positions = layout.layout(&LayoutInput::new(key.space, &relations, nodes.vectors(key.space)))?;

    let out_nodes: Vec<SingleNode> = nodes
        .ids
        .iter()
        .enumerate()
        .map(|(i, name)| SingleNode {
            name: name.clone(),
            position: positions[i],
            avg_distance: snapshot.average_distance(name.as_str()),
            connections: snapshot.connection_count(name.as_str()),
            edges: relations
                .neighbors(i)
                .iter()
                .map(|e| NodeEdge {
                    target: nodes.ids[e.target].clone(),
                    weight: e.weight,
                    distance: e.distance,
                })
                .collect(),
        })
        .collect();

    let edges: Vec<EdgeRow> = snapshot
        .relationships
        .iter()
        .filter(|r| !r.is_self_loop())
        .filter(|r| nodes.index_of(r.a.as_str()).is_some() && nodes.index_of(r.b.as_str()).is_some())
        .map(|r| EdgeRow {
            source: r.a.clone(),
            target: r.b.clone(),
            distance: r.distance,
            annotation: r.annotation.clone(),
        })
        .collect();

    let method = match key.layout {
        LayoutMode::ForceDirected => "Relationship graph, force-directed".to_string(),
        LayoutMode::Manifold => format!(
            "Manifold reduction (n_neighbors={}, min_dist={})",
            config.manifold.n_neighbors, config.manifold.min_dist
        ),
    };
    info!(space = %key.space, layout = %key.layout, concepts = out_nodes.len(), "single-space layout computed");

    Ok(SingleSpaceLayout {
        metadata: SingleMetadata {
            space: key.space,
            model: match key.space {
                Space::Baseline => config.space_labels.baseline.clone(),
                Space::Comparison => config.space_labels.comparison.clone(),
            },
            layout: key.layout,
            total_nodes: out_nodes.len(),
            total_edges: edges.len(),
            method,
            revision: snapshot.revision,
            computed_at: Utc::now(),
        },
        nodes: out_nodes,
        edges,
        exclusions: report,
    })
}
