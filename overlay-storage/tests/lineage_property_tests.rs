//! Property-Based Tests for Lineage Indexing and Cache Keys
//!
//! **Property 1: Idempotent Ingestion**
//! Ingesting any valid event twice leaves exactly one audit row and the same
//! projection as ingesting it once.
//!
//! **Property 2: Bounded Traversal**
//! For any graph (cycles and self-loops included), a traversal returns each
//! node at most once and exactly the nodes within `depth` hops of the start.
//! It reports exactly the edges read while expanding nodes below the cap,
//! and `truncated` is set exactly when a node lies one hop past the cap.
//!
//! **Property 3: Canonical Listing Keys**
//! Semantically equivalent listing queries share one cache key.

use overlay_core::{CacheKeys, Direction, LineageEvent, ListingQuery, NodeId, OverlayConfig};
use overlay_test_utils::{fixtures, generators::*, TestStack};
use proptest::prelude::*;
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::runtime::Runtime;

// ============================================================================
// TEST CONFIGURATION
// ============================================================================

fn test_runtime() -> Result<Runtime, TestCaseError> {
    Runtime::new().map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

/// Events linking `names[parent] -> names[child]` for every pair.
fn graph_events(names: &[String], edges: &[(usize, usize)]) -> Vec<LineageEvent> {
    edges
        .iter()
        .enumerate()
        .map(|(i, (parent, child))| {
            fixtures::lineage_event(
                "ns",
                &format!("job_{}", i),
                &format!("run-{}", i),
                &[names[*parent].as_str()],
                &[names[*child].as_str()],
                i as i64,
            )
        })
        .collect()
}

/// Hop distance from `start` to every reachable node, following parents
/// and/or children as `direction` allows.
fn hop_distances(
    edges: &[(usize, usize)],
    start: usize,
    direction: Direction,
) -> HashMap<usize, u32> {
    let mut distances = HashMap::from([(start, 0u32)]);
    let mut queue = VecDeque::from([start]);
    while let Some(current) = queue.pop_front() {
        let hops = distances[&current];
        for &(parent, child) in edges {
            let mut reached = Vec::new();
            if direction.includes_up() && child == current {
                reached.push(parent);
            }
            if direction.includes_down() && parent == current {
                reached.push(child);
            }
            for node in reached {
                if !distances.contains_key(&node) {
                    distances.insert(node, hops + 1);
                    queue.push_back(node);
                }
            }
        }
    }
    distances
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_ingestion_is_idempotent(event in arb_lineage_event()) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let stack = TestStack::new();
            let ingestor = &stack.services.ingestor;

            let first = ingestor
                .ingest_event(&event)
                .await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            let keys_after_first = stack.backend.len();
            let second = ingestor
                .ingest_event(&event)
                .await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;

            prop_assert_eq!(&first.hash, &second.hash);
            prop_assert!(second.duplicate);
            prop_assert_eq!(stack.store.audit_count().await, 1);
            prop_assert_eq!(stack.backend.len(), keys_after_first);
            Ok(())
        })?;
    }

    #[test]
    fn prop_traversal_is_bounded(
        (names, edges) in arb_lineage_graph(),
        start in any::<prop::sample::Index>(),
        depth in 0u32..6,
        direction in arb_direction(),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let stack = TestStack::with_config(OverlayConfig::default());
            for event in graph_events(&names, &edges) {
                stack
                    .services
                    .ingestor
                    .ingest_event(&event)
                    .await
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
            }

            let start_index = start.index(names.len());
            let start = NodeId::new("ns", names[start_index].clone());
            let graph = stack.services.graphs.traverse(&start, depth, direction).await;
            let distances = hop_distances(&edges, start_index, direction);

            let visited: HashSet<&str> = graph.nodes.iter().map(|n| n.name.as_str()).collect();
            prop_assert_eq!(visited.len(), graph.nodes.len());
            prop_assert!(visited.contains(start.name.as_str()));
            prop_assert!(!graph.stats.degraded);

            let within: HashSet<&str> = distances
                .iter()
                .filter(|(_, hops)| **hops <= depth)
                .map(|(node, _)| names[*node].as_str())
                .collect();
            prop_assert_eq!(&visited, &within);

            let expected_edges: HashSet<(&str, &str)> = edges
                .iter()
                .filter(|(parent, child)| {
                    let expanded = |node: &usize| distances.get(node).is_some_and(|h| *h < depth);
                    (direction.includes_up() && expanded(child))
                        || (direction.includes_down() && expanded(parent))
                })
                .map(|(parent, child)| (names[*parent].as_str(), names[*child].as_str()))
                .collect();
            let reported: HashSet<(&str, &str)> = graph
                .edges
                .iter()
                .map(|e| (e.from.name.as_str(), e.to.name.as_str()))
                .collect();
            prop_assert_eq!(reported.len(), graph.edges.len());
            prop_assert_eq!(&reported, &expected_edges);

            let beyond_cap = distances.values().any(|hops| *hops == depth + 1);
            prop_assert_eq!(graph.stats.truncated, beyond_cap);
            Ok(())
        })?;
    }

    #[test]
    fn prop_listing_key_is_canonical(query in arb_listing_query()) {
        let normalized = query.normalized();
        prop_assert_eq!(CacheKeys::listings(&query), CacheKeys::listings(&normalized));

        let padded = ListingQuery {
            q: query.q.as_ref().map(|q| format!("  {}  ", q)),
            ..query.clone()
        };
        prop_assert_eq!(CacheKeys::listings(&padded), CacheKeys::listings(&query));
    }
}
