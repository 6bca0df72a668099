//! Cache key builders
//!
//! Every key the layer reads or writes is produced here so that writers and
//! invalidators can never disagree on a key's shape.

use crate::{Direction, GraphFormat, ListingQuery, NodeId};

/// Prefix of every cached listing page.
pub const LISTINGS_PREFIX: &str = "cache:listings";
/// Prefix of every cached lineage graph.
pub const LINEAGE_GRAPH_PREFIX: &str = "ol:cache:lineage:";
/// Prefix of every cached bundle.
pub const BUNDLE_PREFIX: &str = "cache:bundle:";
/// Prefix of cached method results for the signing client.
pub const METHOD_PREFIX: &str = "cache:brc:method:";
/// Prefix of cached verification outcomes.
pub const VERIFICATION_PREFIX: &str = "cache:brc:verify:";
/// Prefix of cached signatures.
pub const SIGNATURE_PREFIX: &str = "cache:brc:sig:";
/// Prefix of cached API-client responses.
pub const API_CLIENT_PREFIX: &str = "cache:api:client:";
/// Prefix of invalidation markers.
pub const INVALIDATION_PREFIX: &str = "cache:invalid:";

/// Escape glob metacharacters so `value` matches only itself inside a
/// `SCAN MATCH` pattern.
pub fn glob_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn enc(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Namespaced key builders.
#[derive(Debug, Clone, Copy)]
pub struct CacheKeys;

impl CacheKeys {
    // ========================================================================
    // ENTITIES
    // ========================================================================

    pub fn asset(version_id: &str) -> String {
        format!("cache:asset:{}", version_id)
    }

    /// Canonical key of one listing page.
    ///
    /// The free-text query and page come first, then the remaining filters
    /// sorted by name. Values are percent-encoded so a `|` or `:` inside a
    /// query cannot collide with the separators.
    pub fn listings(query: &ListingQuery) -> String {
        let query = query.normalized();
        let mut parts = vec![LISTINGS_PREFIX.to_string()];
        if let Some(q) = &query.q {
            parts.push(format!("q:{}", enc(q)));
        }
        parts.push(format!("page:{}", query.page));

        let mut filters: Vec<(&str, String)> = vec![("limit", query.limit.to_string())];
        if let Some(dataset_id) = &query.dataset_id {
            filters.push(("datasetId", enc(dataset_id)));
        }
        if let Some(producer_id) = &query.producer_id {
            filters.push(("producerId", enc(producer_id)));
        }
        filters.sort_by(|a, b| a.0.cmp(b.0));
        parts.extend(filters.into_iter().map(|(k, v)| format!("{}:{}", k, v)));

        parts.join("|")
    }

    /// Pattern covering every listing page.
    pub fn listings_pattern() -> String {
        format!("{}*", LISTINGS_PREFIX)
    }

    pub fn producer(producer_id: &str) -> String {
        format!("cache:producer:{}", producer_id)
    }

    pub fn price(version_id: &str) -> String {
        format!("cache:price:{}", version_id)
    }

    // ========================================================================
    // LINEAGE PROJECTION
    // ========================================================================

    pub fn ol_event(namespace: &str, hash: &str) -> String {
        format!("ol:ns:{}:event:{}", namespace, hash)
    }

    pub fn ol_job(namespace: &str, name: &str) -> String {
        format!("ol:ns:{}:job:{}", namespace, name)
    }

    pub fn ol_run(namespace: &str, run_id: &str) -> String {
        format!("ol:ns:{}:run:{}", namespace, run_id)
    }

    pub fn ol_dataset(namespace: &str, name: &str) -> String {
        format!("ol:ns:{}:ds:{}", namespace, name)
    }

    /// Parents of `child`.
    pub fn ol_upstream(namespace: &str, child: &str) -> String {
        format!("ol:ns:{}:up:{}", namespace, child)
    }

    /// Children of `parent`.
    pub fn ol_downstream(namespace: &str, parent: &str) -> String {
        format!("ol:ns:{}:down:{}", namespace, parent)
    }

    pub fn ol_events_by_time(namespace: &str) -> String {
        format!("ol:ns:{}:events:by_time", namespace)
    }

    pub fn ol_jobs_by_updated(namespace: &str) -> String {
        format!("ol:ns:{}:jobs:by_updated", namespace)
    }

    pub fn ol_runs_by_updated(namespace: &str) -> String {
        format!("ol:ns:{}:runs:by_updated", namespace)
    }

    /// Companion of a time index scoring each member by when it was last
    /// written.
    pub fn ol_index_seen(index: &str) -> String {
        format!("{}:seen", index)
    }

    pub fn ol_datasets_all(namespace: &str) -> String {
        format!("ol:ns:{}:datasets:all", namespace)
    }

    // ========================================================================
    // DERIVED VIEWS
    // ========================================================================

    pub fn lineage_graph(
        node: &NodeId,
        depth: u32,
        direction: Direction,
        format: GraphFormat,
    ) -> String {
        format!(
            "{}{}|{}|{}|{}",
            LINEAGE_GRAPH_PREFIX, node, depth, direction, format
        )
    }

    /// Pattern covering every cached graph whose key mentions `fragment`.
    pub fn lineage_pattern_for(fragment: &str) -> String {
        format!("{}*{}*", LINEAGE_GRAPH_PREFIX, glob_escape(fragment))
    }

    pub fn lineage_pattern_all() -> String {
        format!("{}*", LINEAGE_GRAPH_PREFIX)
    }

    pub fn bundle(target: &str, depth: u32) -> String {
        format!("{}{}:{}", BUNDLE_PREFIX, target, depth)
    }

    /// Pattern covering every depth of the bundle rooted at `target`.
    pub fn bundle_pattern_for(target: &str) -> String {
        format!("{}{}:*", BUNDLE_PREFIX, glob_escape(target))
    }

    pub fn bundle_pattern_all() -> String {
        format!("{}*", BUNDLE_PREFIX)
    }

    // ========================================================================
    // SENSITIVE METHODS
    // ========================================================================

    pub fn method_result(method: &str, hash: &str) -> String {
        format!("{}{}:{}", METHOD_PREFIX, method, hash)
    }

    pub fn verification(method: &str, hash: &str) -> String {
        format!("{}{}:{}", VERIFICATION_PREFIX, method, hash)
    }

    pub fn signature(hash: &str) -> String {
        format!("{}{}", SIGNATURE_PREFIX, hash)
    }

    /// Marker whose presence bypasses the API-client cache region.
    pub fn api_client_marker() -> String {
        format!("{}api_client", INVALIDATION_PREFIX)
    }

    /// Pattern covering everything under `prefix`.
    pub fn prefix_pattern(prefix: &str) -> String {
        format!("{}*", glob_escape(prefix))
    }
}
