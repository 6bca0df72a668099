//! Bounded lineage traversal over the cache projection.

use crate::cache::CacheService;
use overlay_core::{
    CacheKeys, DatasetInfo, Direction, GraphFormat, GraphStats, GraphView, LineageEdge,
    LineageGraph, LineageNode, NodeId, NodeType, OverlayConfig, ValidationError,
};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::time::Duration;

/// Parameters of a graph query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineageQuery {
    pub node: NodeId,
    pub depth: u32,
    pub direction: Direction,
    pub format: GraphFormat,
    /// Overrides the namespace embedded in `node`.
    pub namespace: Option<String>,
}

impl LineageQuery {
    pub const DEFAULT_DEPTH: u32 = 3;

    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            depth: Self::DEFAULT_DEPTH,
            direction: Direction::default(),
            format: GraphFormat::default(),
            namespace: None,
        }
    }

    /// Query rooted at a `dataset:<namespace>:<name>` identifier.
    pub fn parse(node: &str) -> Result<Self, ValidationError> {
        Ok(Self::new(node.parse()?))
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_format(mut self, format: GraphFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Start node after applying the namespace override.
    pub fn start(&self) -> NodeId {
        match self.namespace.as_deref().filter(|ns| !ns.is_empty()) {
            Some(ns) => self.node.with_namespace(ns),
            None => self.node.clone(),
        }
    }
}

/// Answers graph queries, caching each result under
/// `(node, depth, direction, format)` for the lineage TTL.
#[derive(Debug, Clone)]
pub struct LineageQueryEngine {
    cache: CacheService,
    ttl: Duration,
    max_depth: u32,
}

impl LineageQueryEngine {
    pub fn new(cache: CacheService, config: &OverlayConfig) -> Self {
        Self {
            cache,
            ttl: config.ttls.lineage,
            max_depth: config.lineage_max_depth,
        }
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// Answer `query`, from cache when possible.
    ///
    /// Results of a traversal that hit a projection read error are returned
    /// with `stats.degraded` set and are not cached.
    pub async fn query(&self, query: &LineageQuery) -> GraphView {
        let start = query.start();
        let depth = query.depth.min(self.max_depth);
        let key = CacheKeys::lineage_graph(&start, depth, query.direction, query.format);

        if let Some(view) = self.cache.get::<GraphView>(&key).await {
            if view.format() == query.format {
                tracing::trace!(key = %key, "Lineage graph cache hit");
                return view;
            }
        }

        let graph = self.traverse(&start, depth, query.direction).await;
        let view = GraphView::render(graph, query.format);
        if !view.stats().degraded {
            self.cache.set(&key, &view, self.ttl).await;
        }
        view
    }

    /// Breadth-first traversal from `start`, uncached.
    ///
    /// Each node is expanded at most once. Nodes at the depth cap are not
    /// expanded, but their adjacency is read so `stats.truncated` reports
    /// exactly whether an unvisited neighbor was cut off.
    pub async fn traverse(&self, start: &NodeId, depth: u32, direction: Direction) -> LineageGraph {
        let depth = depth.min(self.max_depth);
        let ns = start.namespace.as_str();
        let mut stats = GraphStats::default();

        let mut visited: HashSet<String> = HashSet::from([start.name.clone()]);
        let mut order = vec![start.name.clone()];
        let mut frontier = vec![start.name.clone()];
        let mut edges: Vec<LineageEdge> = Vec::new();
        let mut seen_edges: HashSet<(String, String)> = HashSet::new();

        for level in 0..=depth {
            let at_cap = level == depth;
            let mut next = Vec::new();

            for current in &frontier {
                let mut neighbors: Vec<(String, bool)> = Vec::new();
                if direction.includes_up() {
                    let key = CacheKeys::ol_upstream(ns, current);
                    for parent in self.members(&key, &mut stats).await {
                        neighbors.push((parent, true));
                    }
                }
                if direction.includes_down() {
                    let key = CacheKeys::ol_downstream(ns, current);
                    for child in self.members(&key, &mut stats).await {
                        neighbors.push((child, false));
                    }
                }

                if at_cap {
                    if neighbors.iter().any(|(name, _)| !visited.contains(name)) {
                        stats.truncated = true;
                    }
                    continue;
                }

                for (neighbor, is_parent) in neighbors {
                    let (from, to) = if is_parent {
                        (neighbor.clone(), current.clone())
                    } else {
                        (current.clone(), neighbor.clone())
                    };
                    if seen_edges.insert((from.clone(), to.clone())) {
                        edges.push(LineageEdge::parent(
                            NodeId::new(ns, from),
                            NodeId::new(ns, to),
                        ));
                    }
                    if visited.insert(neighbor.clone()) {
                        order.push(neighbor.clone());
                        next.push(neighbor);
                    }
                }
            }

            if at_cap || next.is_empty() {
                break;
            }
            frontier = next;
        }

        let mut nodes = Vec::with_capacity(order.len());
        for name in order {
            nodes.push(self.node(ns, &name, &mut stats).await);
        }

        stats.nodes = nodes.len();
        stats.edges = edges.len();
        if stats.missing_metadata > 0 {
            tracing::debug!(
                node = %start,
                missing = stats.missing_metadata,
                "Traversal reached nodes with expired metadata"
            );
        }

        LineageGraph {
            node: start.clone(),
            depth,
            direction,
            nodes,
            edges,
            stats,
        }
    }

    /// Sorted members of an adjacency set. A read error marks the result
    /// degraded and yields no neighbors.
    async fn members(&self, key: &str, stats: &mut GraphStats) -> Vec<String> {
        match self.cache.backend().smembers(key).await {
            Ok(mut members) => {
                members.sort();
                members
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Adjacency read failed during traversal");
                stats.degraded = true;
                Vec::new()
            }
        }
    }

    /// Metadata of a visited node, or a bare node counted as missing.
    async fn node(&self, ns: &str, name: &str, stats: &mut GraphStats) -> LineageNode {
        let key = CacheKeys::ol_dataset(ns, name);
        let info = match self.cache.backend().hgetall(&key).await {
            Ok(fields) => DatasetInfo::from_hash(&key, &fields).unwrap_or_else(|e| {
                tracing::warn!(key = %key, error = %e, "Undecodable dataset metadata");
                None
            }),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Dataset metadata read failed");
                stats.degraded = true;
                None
            }
        };

        match info {
            Some(info) => info.into_node(),
            None => {
                stats.missing_metadata += 1;
                LineageNode {
                    namespace: ns.to_string(),
                    name: name.to_string(),
                    node_type: NodeType::Dataset,
                    facets: Value::Object(Map::new()),
                }
            }
        }
    }
}
