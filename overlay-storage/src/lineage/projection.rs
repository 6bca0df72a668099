//! Read access to the lineage projection.
//!
//! Every read is fail-open: a cache error yields an empty result. The
//! projection is best-effort; the audit log is the authority.

use crate::cache::CacheService;
use overlay_core::{CacheKeys, CacheResult, DatasetInfo, JobInfo, LineageEvent, RunInfo};
use std::collections::HashMap;

/// Projection readers scoped by namespace.
#[derive(Debug, Clone)]
pub struct LineageProjection {
    cache: CacheService,
}

fn decoded<T>(key: &str, result: CacheResult<Option<T>>) -> Option<T> {
    result.unwrap_or_else(|e| {
        tracing::warn!(key = %key, error = %e, "Undecodable lineage metadata");
        None
    })
}

/// Inclusive stop rank for the first `limit` members.
fn stop_rank(limit: usize) -> isize {
    isize::try_from(limit).map_or(isize::MAX, |n| n - 1)
}

impl LineageProjection {
    pub fn new(cache: CacheService) -> Self {
        Self { cache }
    }

    async fn hash(&self, key: &str) -> HashMap<String, String> {
        self.cache.hgetall(key).await
    }

    pub async fn dataset(&self, namespace: &str, name: &str) -> Option<DatasetInfo> {
        let key = CacheKeys::ol_dataset(namespace, name);
        let fields = self.hash(&key).await;
        decoded(&key, DatasetInfo::from_hash(&key, &fields))
    }

    pub async fn job(&self, namespace: &str, name: &str) -> Option<JobInfo> {
        let key = CacheKeys::ol_job(namespace, name);
        let fields = self.hash(&key).await;
        decoded(&key, JobInfo::from_hash(&key, &fields))
    }

    pub async fn run(&self, namespace: &str, run_id: &str) -> Option<RunInfo> {
        let key = CacheKeys::ol_run(namespace, run_id);
        let fields = self.hash(&key).await;
        decoded(&key, RunInfo::from_hash(&key, &fields))
    }

    pub async fn event(&self, namespace: &str, hash: &str) -> Option<LineageEvent> {
        self.cache.get(&CacheKeys::ol_event(namespace, hash)).await
    }

    /// Up to `limit` events, newest first. Events whose payload has expired
    /// are skipped.
    pub async fn recent_events(&self, namespace: &str, limit: usize) -> Vec<LineageEvent> {
        if limit == 0 {
            return Vec::new();
        }
        let hashes = self
            .cache
            .zrevrange(&CacheKeys::ol_events_by_time(namespace), 0, stop_rank(limit))
            .await;
        let mut events = Vec::with_capacity(hashes.len());
        for hash in hashes {
            if let Some(event) = self.event(namespace, &hash).await {
                events.push(event);
            }
        }
        events
    }

    /// Most recently updated jobs.
    pub async fn recent_jobs(&self, namespace: &str, limit: usize) -> Vec<JobInfo> {
        if limit == 0 {
            return Vec::new();
        }
        let names = self
            .cache
            .zrevrange(&CacheKeys::ol_jobs_by_updated(namespace), 0, stop_rank(limit))
            .await;
        let mut jobs = Vec::with_capacity(names.len());
        for name in names {
            if let Some(job) = self.job(namespace, &name).await {
                jobs.push(job);
            }
        }
        jobs
    }

    /// Most recently updated runs.
    pub async fn recent_runs(&self, namespace: &str, limit: usize) -> Vec<RunInfo> {
        if limit == 0 {
            return Vec::new();
        }
        let ids = self
            .cache
            .zrevrange(&CacheKeys::ol_runs_by_updated(namespace), 0, stop_rank(limit))
            .await;
        let mut runs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(run) = self.run(namespace, &id).await {
                runs.push(run);
            }
        }
        runs
    }

    /// Dataset names containing `needle`, case-insensitively, sorted.
    pub async fn search_datasets(&self, namespace: &str, needle: &str, limit: usize) -> Vec<String> {
        let needle = needle.trim().to_lowercase();
        let mut names: Vec<String> = self
            .cache
            .smembers(&CacheKeys::ol_datasets_all(namespace))
            .await
            .into_iter()
            .filter(|name| name.to_lowercase().contains(&needle))
            .collect();
        names.sort();
        names.truncate(limit);
        names
    }

    /// Sorted parents of `name`.
    pub async fn parents(&self, namespace: &str, name: &str) -> Vec<String> {
        let mut parents = self
            .cache
            .smembers(&CacheKeys::ol_upstream(namespace, name))
            .await;
        parents.sort();
        parents
    }

    /// Sorted children of `name`.
    pub async fn children(&self, namespace: &str, name: &str) -> Vec<String> {
        let mut children = self
            .cache
            .smembers(&CacheKeys::ol_downstream(namespace, name))
            .await;
        children.sort();
        children
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheBackend;
    use crate::lineage::LineageIngestor;
    use crate::store::InMemoryRecordStore;
    use overlay_core::{DatasetRef, EventType, JobRef, ManualClock, OverlayConfig, RunRef};
    use std::sync::Arc;
    use std::time::Duration;

    fn event(run_id: &str, time: &str, event_type: EventType, output: &str) -> LineageEvent {
        LineageEvent {
            namespace: "prod".to_string(),
            event_type,
            event_time: time.to_string(),
            producer: None,
            job: JobRef {
                name: format!("job-{}", output),
                facets: None,
            },
            run: RunRef {
                run_id: run_id.to_string(),
                facets: None,
            },
            inputs: vec![DatasetRef::new("Raw_Orders")],
            outputs: vec![DatasetRef::new(output)],
        }
    }

    async fn seeded() -> (LineageProjection, ManualClock) {
        let clock = ManualClock::default();
        let backend = Arc::new(InMemoryCacheBackend::with_clock(Arc::new(clock.clone())));
        let cache = CacheService::with_clock(backend, Arc::new(clock.clone()));
        let ingestor = LineageIngestor::new(
            Arc::new(InMemoryRecordStore::new()),
            cache.clone(),
            &OverlayConfig::default(),
        );
        let events = [
            event("r1", "2024-05-01T10:00:00Z", EventType::Start, "orders_clean"),
            event("r1", "2024-05-01T11:00:00Z", EventType::Complete, "orders_clean"),
            event("r2", "2024-05-01T12:00:00Z", EventType::Complete, "revenue"),
        ];
        for e in &events {
            assert!(ingestor.ingest(e).await);
        }
        (LineageProjection::new(cache), clock)
    }

    #[tokio::test]
    async fn test_recent_events_newest_first() {
        let (projection, _) = seeded().await;
        let events = projection.recent_events("prod", 2).await;
        let times: Vec<&str> = events.iter().map(|e| e.event_time.as_str()).collect();
        assert_eq!(times, vec!["2024-05-01T12:00:00Z", "2024-05-01T11:00:00Z"]);
        assert!(projection.recent_events("prod", 0).await.is_empty());
    }

    #[tokio::test]
    async fn test_run_state_transitions() {
        let (projection, _) = seeded().await;
        let run = projection.run("prod", "r1").await.unwrap();
        assert_eq!(run.state, Some(EventType::Complete));
        assert_eq!(run.start_time.as_deref(), Some("2024-05-01T10:00:00Z"));
        assert_eq!(run.end_time.as_deref(), Some("2024-05-01T11:00:00Z"));
    }

    #[tokio::test]
    async fn test_search_and_adjacency() {
        let (projection, _) = seeded().await;
        assert_eq!(
            projection.search_datasets("prod", "ORDERS", 10).await,
            vec!["Raw_Orders", "orders_clean"]
        );
        assert_eq!(
            projection.children("prod", "Raw_Orders").await,
            vec!["orders_clean", "revenue"]
        );
        assert_eq!(projection.parents("prod", "revenue").await, vec!["Raw_Orders"]);
    }

    #[tokio::test]
    async fn test_metadata_expires_but_adjacency_remains() {
        let (projection, clock) = seeded().await;
        clock.advance(Duration::from_secs(121));

        assert!(projection.dataset("prod", "revenue").await.is_none());
        assert!(projection.recent_events("prod", 10).await.is_empty());
        assert_eq!(projection.parents("prod", "revenue").await, vec!["Raw_Orders"]);
        assert_eq!(projection.recent_jobs("prod", 10).await.len(), 0);
    }
}
