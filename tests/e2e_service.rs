//! End-to-end tests for `LayoutService`: caching, invalidation, failure
//! handling and the read-only queries built on top of cached layouts.

use std::sync::Arc;

use latent_atlas::service::{DetailView, DualKey, LayoutMode, SingleKey, TopologyMode};
use latent_atlas::{
    AlignmentError, Concept, Direction, DistortionTier, Error, ErrorKind, LayoutService, MemoryStore, Relationship,
    Space,
};

/// Twelve concepts on two rings; comparison vectors are a permuted,
/// slightly bent copy of the baseline ones.
fn store() -> MemoryStore {
    let store = MemoryStore::new();
    for i in 0..12 {
        let t = i as f32 * 0.5;
        let ring = if i < 6 { 1.0 } else { -1.0 };
        let base = vec![t.cos(), t.sin(), ring, 0.2 * t, 0.5];
        let cmp = vec![0.5, ring * 1.1, t.sin(), t.cos(), 0.1 * t * t, 0.3];
        store
            .insert_concept(
                Concept::new(format!("c{i}"))
                    .with_embedding(Space::Baseline, base)
                    .with_embedding(Space::Comparison, cmp)
                    .with_definition(format!("concept number {i}")),
            )
            .unwrap();
    }
    for i in 0..11 {
        let far = if i == 5 { 0.9 } else { 0.1 };
        store
            .add_relationship(
                Relationship::new(format!("c{i}"), format!("c{}", i + 1), far)
                    .with_comparison_distance(far + 0.05 * i as f64),
            )
            .unwrap();
    }
    store
        .add_relationship(Relationship::new("c0", "c6", 0.5).with_annotation("bridge"))
        .unwrap();
    store
}

fn shared_force() -> DualKey {
    DualKey::new(TopologyMode::Shared, LayoutMode::ForceDirected)
}

// ============================================================================
// 1. Repeated requests are served from cache
// ============================================================================

#[tokio::test]
async fn test_cached_layout_is_shared() {
    let service = LayoutService::with_defaults(store()).unwrap();
    let first = service.dual_layout(shared_force()).await.unwrap();
    let second = service.dual_layout(shared_force()).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let other = service
        .dual_layout(DualKey::new(TopologyMode::Independent, LayoutMode::ForceDirected))
        .await
        .unwrap();
    assert!(!Arc::ptr_eq(&first, &other));
}

// ============================================================================
// 2. Concurrent first requests share one computation
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_single_flight() {
    let service = Arc::new(LayoutService::with_defaults(store()).unwrap());
    let key = DualKey::new(TopologyMode::Shared, LayoutMode::Manifold);

    let mut handles = Vec::new();
    for _ in 0..6 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move { service.dual_layout(key).await }));
    }
    let mut layouts = Vec::new();
    for h in handles {
        layouts.push(h.await.unwrap().unwrap());
    }
    for layout in &layouts[1..] {
        assert!(Arc::ptr_eq(&layouts[0], layout), "every caller gets the same computed artifact");
    }
}

// ============================================================================
// 3. Invalidation and store mutations force a recompute
// ============================================================================

#[tokio::test]
async fn test_invalidate_recomputes() {
    let service = LayoutService::with_defaults(store()).unwrap();
    let before_rev = service.revision().await.unwrap();
    let before = service.dual_layout(shared_force()).await.unwrap();

    service.invalidate();
    assert!(service.revision().await.unwrap() > before_rev);

    let after = service.dual_layout(shared_force()).await.unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    // same data, same seed
    assert_eq!(before.nodes, after.nodes);
}

#[tokio::test]
async fn test_store_mutation_recomputes() {
    let service = LayoutService::with_defaults(store()).unwrap();
    let before = service.dual_layout(shared_force()).await.unwrap();
    assert_eq!(before.nodes.len(), 12);

    service
        .store()
        .insert_concept(
            Concept::new("newcomer")
                .with_embedding(Space::Baseline, vec![0.3, 0.3, 0.3, 0.3, 0.3])
                .with_embedding(Space::Comparison, vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6]),
        )
        .unwrap();

    let after = service.dual_layout(shared_force()).await.unwrap();
    assert_eq!(after.nodes.len(), 13);
    assert!(after.node("newcomer").is_some());
    assert!(after.metadata.revision > before.metadata.revision);
}

// ============================================================================
// 4. Failures: configuration, alignment, and the last good entry
// ============================================================================

#[tokio::test]
async fn test_missing_space_is_configuration_error() {
    let store = MemoryStore::new();
    for name in ["a", "b", "c", "d"] {
        store
            .insert_concept(
                Concept::new(name).with_embedding(Space::Baseline, vec![1.0, name.as_bytes()[0] as f32 / 100.0, 0.5]),
            )
            .unwrap();
    }
    let service = LayoutService::with_defaults(store).unwrap();
    let err = service.dual_layout(shared_force()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    // the baseline alone is still usable
    let single = service
        .single_space_layout(SingleKey::new(Space::Baseline, LayoutMode::ForceDirected))
        .await
        .unwrap();
    assert_eq!(single.nodes.len(), 4);
}

#[tokio::test]
async fn test_alignment_failure_keeps_last_good() {
    let store = MemoryStore::new();
    let vectors = [
        ("north", vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.2, 0.0]),
        ("south", vec![-1.0, 0.1, 0.0], vec![0.0, -1.0, 0.1, 0.3]),
        ("east", vec![0.0, 1.0, 0.2], vec![1.0, 0.0, 0.0, 0.5]),
        ("west", vec![0.1, -1.0, 0.4], vec![-1.0, 0.2, 0.6, 0.0]),
    ];
    for (name, base, cmp) in vectors {
        store
            .insert_concept(
                Concept::new(name)
                    .with_embedding(Space::Baseline, base)
                    .with_embedding(Space::Comparison, cmp),
            )
            .unwrap();
    }
    store.add_relationship(Relationship::new("north", "south", 0.8)).unwrap();
    store.add_relationship(Relationship::new("east", "west", 0.7)).unwrap();
    store.add_relationship(Relationship::new("north", "east", 0.3)).unwrap();

    let service = LayoutService::with_defaults(store).unwrap();
    let good = service.dual_layout(shared_force()).await.unwrap();
    assert_eq!(good.nodes.len(), 4);

    assert!(service.store().delete_concept("east"));
    assert!(service.store().delete_concept("west"));

    let err = service.dual_layout(shared_force()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Alignment);
    assert!(matches!(err, Error::Alignment(AlignmentError::InsufficientPoints { found: 2 })));

    let kept = service.last_good(shared_force()).unwrap();
    assert!(Arc::ptr_eq(&kept, &good));
}

// ============================================================================
// 5. Concept detail
// ============================================================================

#[tokio::test]
async fn test_concept_detail_without_view() {
    let service = LayoutService::with_defaults(store()).unwrap();
    let detail = service.concept_detail("c0", None).await.unwrap();

    assert_eq!(detail.definition.as_deref(), Some("concept number 0"));
    assert_eq!(detail.relationship_count, 2);
    assert_eq!(detail.drift, None);
    assert!(detail.relationships.iter().all(|e| e.direction == Direction::Outgoing));
    assert!(detail.relationships.iter().all(|e| e.distortion.is_none()));
    let bridge = detail.relationships.iter().find(|e| e.target.as_str() == "c6").unwrap();
    assert_eq!(bridge.annotation.as_deref(), Some("bridge"));
    assert!((detail.avg_distance.unwrap() - 0.3).abs() < 1e-12);

    let middle = service.concept_detail("c3", None).await.unwrap();
    let dirs: Vec<(String, Direction)> = middle
        .relationships
        .iter()
        .map(|e| (e.target.to_string(), e.direction))
        .collect();
    assert!(dirs.contains(&("c2".to_string(), Direction::Incoming)));
    assert!(dirs.contains(&("c4".to_string(), Direction::Outgoing)));

    let err = service.concept_detail("nobody", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_concept_detail_with_distortion() {
    let service = LayoutService::with_defaults(store()).unwrap();
    let view = DetailView { key: shared_force(), space: Space::Baseline };
    let detail = service.concept_detail("c5", Some(view)).await.unwrap();

    assert!(detail.drift.is_some());
    assert!(detail.position.is_some());
    assert_eq!(detail.relationships.len(), 2);
    for edge in &detail.relationships {
        assert!(edge.rendered_distance.unwrap() > 0.0);
        assert!(edge.distortion.is_some());
    }

    // two neighbors: rank order decides, nearest is local, farthest a wormhole
    let mut edges = detail.relationships.clone();
    edges.sort_by(|x, y| x.rendered_distance.unwrap().total_cmp(&y.rendered_distance.unwrap()));
    assert_eq!(edges[0].distortion, Some(DistortionTier::Local));
    assert_eq!(edges[1].distortion, Some(DistortionTier::Wormhole));
}

// ============================================================================
// 6. Spatial neighbors
// ============================================================================

#[tokio::test]
async fn test_spatial_neighbors() {
    let store = store();
    store
        .insert_concept(Concept::new("blank").with_embedding(Space::Baseline, vec![0.0; 5]))
        .unwrap();
    let service = LayoutService::with_defaults(store).unwrap();

    let near = service.spatial_neighbors("c3", shared_force(), Space::Baseline).await.unwrap();
    assert_eq!(near.len(), 5);
    assert!(near.windows(2).all(|w| w[0].distance <= w[1].distance));
    assert!(near.iter().all(|n| n.name.as_str() != "c3"));
    for n in &near {
        let linked = matches!(n.name.as_str(), "c2" | "c4");
        assert_eq!(n.linked, linked, "{}", n.name);
    }

    let err = service.spatial_neighbors("blank", shared_force(), Space::Baseline).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Data);
    let err = service.spatial_neighbors("nobody", shared_force(), Space::Baseline).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

// ============================================================================
// 7. Search, stats and divergent edges
// ============================================================================

#[tokio::test]
async fn test_search_uses_cached_positions() {
    let service = LayoutService::with_defaults(store()).unwrap();

    let cold = service.search("C1", 10).await.unwrap();
    let names: Vec<&str> = cold.iter().map(|h| h.name.as_str()).collect();
    assert_eq!(names, vec!["c1", "c10", "c11"]);
    assert!(cold.iter().all(|h| h.position.is_none()));

    service
        .single_space_layout(SingleKey::new(Space::Baseline, LayoutMode::ForceDirected))
        .await
        .unwrap();
    let warm = service.search("c1", 2).await.unwrap();
    assert_eq!(warm.len(), 2);
    assert!(warm.iter().all(|h| h.position.is_some()));
}

#[tokio::test]
async fn test_stats() {
    let service = LayoutService::with_defaults(store()).unwrap();
    let stats = service.stats().await.unwrap();
    assert_eq!(stats.concepts, 12);
    assert_eq!(stats.relationships, 12);
    let expected = (10.0 * 0.1 + 0.9 + 0.5) / 12.0;
    assert!((stats.avg_distance.unwrap() - expected).abs() < 1e-12);

    let empty = LayoutService::with_defaults(MemoryStore::new()).unwrap();
    assert_eq!(empty.stats().await.unwrap().avg_distance, None);
}

#[tokio::test]
async fn test_high_divergence_edges() {
    let service = LayoutService::with_defaults(store()).unwrap();
    let edges = service.high_divergence_edges(0.375, 10).await.unwrap();

    // delta = 0.05 * i, rows 8..=10 clear the threshold; the bridge has no comparison distance
    let pairs: Vec<(&str, &str)> = edges.iter().map(|e| (e.a.as_str(), e.b.as_str())).collect();
    assert_eq!(pairs, vec![("c10", "c11"), ("c9", "c10"), ("c8", "c9")]);
    assert!(edges.windows(2).all(|w| w[0].delta >= w[1].delta));

    let top = service.high_divergence_edges(0.0, 1).await.unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].a.as_str(), "c10");
}
