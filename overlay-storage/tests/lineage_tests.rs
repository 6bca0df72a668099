//! Lineage ingestion and graph traversal over the in-memory stack.

use overlay_core::{
    CacheKeys, Direction, GraphFormat, GraphView, LineageGraph, NodeId, OverlayConfig,
    OverlayError,
};
use overlay_storage::{CacheBackend, InMemoryRecordStore, LineageQuery};
use overlay_test_utils::{fixtures, services_without_cache, TestStack};
use std::sync::Arc;

async fn ingest_all(stack: &TestStack, events: &[overlay_core::LineageEvent]) {
    for event in events {
        stack.services.ingestor.ingest_event(event).await.unwrap();
    }
}

fn sorted_names(graph: &LineageGraph) -> Vec<String> {
    let mut names: Vec<String> = graph.nodes.iter().map(|n| n.name.clone()).collect();
    names.sort();
    names
}

/// Key of the default query (depth 3, both directions, simple format).
fn default_graph_key(name: &str) -> String {
    CacheKeys::lineage_graph(
        &NodeId::new("ns", name),
        3,
        Direction::Both,
        GraphFormat::Simple,
    )
}

fn simple(view: GraphView) -> LineageGraph {
    match view {
        GraphView::Simple(graph) => graph,
        GraphView::Cyto(_) => panic!("expected simple format"),
    }
}

// ============================================================================
// INGESTION
// ============================================================================

#[tokio::test]
async fn test_reingesting_is_idempotent() {
    let stack = TestStack::new();
    let event = fixtures::lineage_event("ns", "etl", "run-1", &["raw"], &["clean"], 0);

    let first = stack.services.ingestor.ingest_event(&event).await.unwrap();
    let second = stack.services.ingestor.ingest_event(&event).await.unwrap();
    assert_eq!(first.hash, second.hash);
    assert!(!first.duplicate);
    assert!(second.duplicate);
    assert_eq!(stack.store.audit_count().await, 1);

    let projection = &stack.services.projection;
    assert_eq!(projection.recent_events("ns", 10).await.len(), 1);
    assert_eq!(projection.children("ns", "raw").await, vec!["clean"]);
    assert_eq!(projection.parents("ns", "clean").await, vec!["raw"]);
}

#[tokio::test]
async fn test_audit_row_matches_event() {
    let stack = TestStack::new();
    let event = fixtures::lineage_event("ns", "etl", "run-7", &["a"], &["b"], 30);
    let receipt = stack.services.ingestor.ingest_event(&event).await.unwrap();

    let rows = stack.store.lineage_events().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].hash, receipt.hash);
    assert_eq!(rows[0].run_id, "run-7");
    assert_eq!(rows[0].event_type, "COMPLETE");
    assert!(rows[0].event_id.starts_with("ol_"));
    assert_eq!(rows[0].payload_json, event.canonical_json().unwrap());
}

#[tokio::test]
async fn test_invalid_event_is_rejected_before_any_write() {
    let stack = TestStack::new();
    let mut event = fixtures::lineage_event("ns", "etl", "run-1", &["a"], &["b"], 0);
    event.run.run_id = "  ".to_string();

    let err = stack.services.ingestor.ingest_event(&event).await.unwrap_err();
    assert!(matches!(err, OverlayError::Validation(_)));
    assert_eq!(stack.store.audit_count().await, 0);
    assert!(stack.backend.is_empty());
}

#[tokio::test]
async fn test_cache_outage_keeps_audit_log() {
    let store = Arc::new(InMemoryRecordStore::new());
    let services = services_without_cache(store.clone(), OverlayConfig::default());
    let event = fixtures::lineage_event("ns", "etl", "run-1", &["a"], &["b"], 0);

    let err = services.ingestor.ingest_event(&event).await.unwrap_err();
    assert!(matches!(err, OverlayError::Cache(_)));
    assert!(!services.ingestor.ingest(&event).await);
    assert_eq!(store.audit_count().await, 1);
}

#[tokio::test]
async fn test_dataset_named_all_keeps_namespace_ingestible() {
    let stack = TestStack::new();
    let ingestor = &stack.services.ingestor;
    ingestor
        .ingest_event(&fixtures::lineage_event("ns", "etl", "run-1", &["all"], &["sink"], 0))
        .await
        .unwrap();
    ingestor
        .ingest_event(&fixtures::lineage_event("ns", "etl", "run-2", &["x"], &["y"], 1))
        .await
        .unwrap();

    let projection = &stack.services.projection;
    assert!(projection.dataset("ns", "all").await.is_some());
    assert_eq!(
        projection.search_datasets("ns", "", 10).await,
        vec!["all", "sink", "x", "y"]
    );
    assert_eq!(projection.children("ns", "all").await, vec!["sink"]);
}

// ============================================================================
// TRAVERSAL
// ============================================================================

#[tokio::test]
async fn test_depth_two_upstream_of_d3() {
    let stack = TestStack::new();
    ingest_all(&stack, &fixtures::d_chain()).await;

    let query = LineageQuery::parse("dataset:ns:D3")
        .unwrap()
        .with_depth(2)
        .with_direction(Direction::Up);
    let graph = simple(stack.services.graphs.query(&query).await);

    assert_eq!(sorted_names(&graph), vec!["D1", "D2", "D3"]);
    assert_eq!(graph.stats.edges, 2);
    assert!(!graph.stats.truncated);
    assert_eq!(graph.stats.missing_metadata, 0);
}

#[tokio::test]
async fn test_unvisited_parent_beyond_cap_sets_truncated() {
    let stack = TestStack::new();
    ingest_all(&stack, &fixtures::chain_events("ns", &["D0", "D1", "D2", "D3", "D4"])).await;

    let graph = stack
        .services
        .graphs
        .traverse(&NodeId::new("ns", "D3"), 2, Direction::Up)
        .await;
    assert_eq!(sorted_names(&graph), vec!["D1", "D2", "D3"]);
    assert!(graph.stats.truncated);
}

#[tokio::test]
async fn test_depth_zero_returns_only_start() {
    let stack = TestStack::new();
    ingest_all(&stack, &fixtures::d_chain()).await;

    let graph = stack
        .services
        .graphs
        .traverse(&NodeId::new("ns", "D2"), 0, Direction::Both)
        .await;
    assert_eq!(sorted_names(&graph), vec!["D2"]);
    assert!(graph.edges.is_empty());
    assert!(graph.stats.truncated);
}

#[tokio::test]
async fn test_cycle_visits_each_node_once() {
    let stack = TestStack::new();
    ingest_all(&stack, &fixtures::chain_events("ns", &["a", "b", "c", "a"])).await;

    let graph = stack
        .services
        .graphs
        .traverse(&NodeId::new("ns", "a"), 10, Direction::Both)
        .await;
    assert_eq!(sorted_names(&graph), vec!["a", "b", "c"]);
    assert_eq!(graph.stats.edges, 3);
    assert!(!graph.stats.truncated);
}

#[tokio::test]
async fn test_unknown_node_yields_bare_start() {
    let stack = TestStack::new();
    let graph = stack
        .services
        .graphs
        .traverse(&NodeId::new("ns", "nowhere"), 3, Direction::Both)
        .await;
    assert_eq!(graph.stats.nodes, 1);
    assert_eq!(graph.stats.missing_metadata, 1);
    assert!(!graph.stats.truncated);
}

#[tokio::test]
async fn test_namespaces_are_isolated() {
    let stack = TestStack::new();
    ingest_all(&stack, &fixtures::chain_events("ns", &["x", "y"])).await;
    ingest_all(&stack, &fixtures::chain_events("other", &["x", "z"])).await;

    let graph = stack
        .services
        .graphs
        .traverse(&NodeId::new("ns", "x"), 3, Direction::Down)
        .await;
    assert_eq!(sorted_names(&graph), vec!["x", "y"]);

    let query = LineageQuery::parse("dataset:ns:x")
        .unwrap()
        .with_namespace("other")
        .with_direction(Direction::Down);
    let graph = simple(stack.services.graphs.query(&query).await);
    assert_eq!(sorted_names(&graph), vec!["x", "z"]);
}

#[tokio::test]
async fn test_cyto_format_renders_elements() {
    let stack = TestStack::new();
    ingest_all(&stack, &fixtures::d_chain()).await;

    let query = LineageQuery::parse("dataset:ns:D1")
        .unwrap()
        .with_direction(Direction::Down)
        .with_format(GraphFormat::Cyto);
    let view = stack.services.graphs.query(&query).await;
    assert_eq!(view.format(), GraphFormat::Cyto);
    assert_eq!(view.stats().nodes, 4);
    assert_eq!(view.stats().edges, 3);
}

// ============================================================================
// GRAPH CACHE INVALIDATION
// ============================================================================

#[tokio::test]
async fn test_edge_replacement_drops_cached_graphs() {
    let stack = TestStack::new();
    ingest_all(&stack, &fixtures::d_chain()).await;

    let query = LineageQuery::parse("dataset:ns:D2").unwrap();
    stack.services.graphs.query(&query).await;
    let key = default_graph_key("D2");
    assert!(stack.backend.exists(&key).await.unwrap());

    stack
        .services
        .records
        .replace_edges("D2", &["D1".to_string()])
        .await
        .unwrap();
    assert!(!stack.backend.exists(&key).await.unwrap());
}

#[tokio::test]
async fn test_cached_graph_expires_with_lineage_ttl() {
    let stack = TestStack::new();
    ingest_all(&stack, &fixtures::chain_events("ns", &["p", "q"])).await;

    let query = LineageQuery::parse("dataset:ns:p").unwrap();
    stack.services.graphs.query(&query).await;
    let key = default_graph_key("p");
    assert!(stack.backend.exists(&key).await.unwrap());

    stack.advance_secs(stack.services.config.ttls.lineage.as_secs() + 1);
    assert!(!stack.backend.exists(&key).await.unwrap());
}
