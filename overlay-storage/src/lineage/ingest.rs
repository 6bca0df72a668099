//! Lineage event ingestion.

use crate::cache::CacheService;
use crate::store::RecordStore;
use overlay_core::{
    CacheKeys, CacheResult, EventType, LineageAuditRecord, LineageEvent, OverlayConfig,
    OverlayResult,
};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Outcome of a successful ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReceipt {
    /// Content hash of the event.
    pub hash: String,
    /// The audit log already held this event; only the projection was
    /// refreshed.
    pub duplicate: bool,
}

/// Records events in the audit log and projects them into the cache.
///
/// Re-ingesting an event is safe: the audit insert is keyed by content
/// hash, hash fields are overwritten, and set/sorted-set members are
/// unique, so the only effect is a TTL refresh. No retries are attempted;
/// the caller decides.
#[derive(Debug)]
pub struct LineageIngestor<S> {
    store: Arc<S>,
    cache: CacheService,
    ttl: Duration,
    max_event_bytes: usize,
}

impl<S> Clone for LineageIngestor<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            cache: self.cache.clone(),
            ttl: self.ttl,
            max_event_bytes: self.max_event_bytes,
        }
    }
}

impl<S: RecordStore> LineageIngestor<S> {
    pub fn new(store: Arc<S>, cache: CacheService, config: &OverlayConfig) -> Self {
        Self {
            store,
            cache,
            ttl: config.ttls.lineage,
            max_event_bytes: config.max_event_bytes,
        }
    }

    /// Ingest `event`, returning whether every step succeeded.
    ///
    /// Failures are logged at `error!`.
    pub async fn ingest(&self, event: &LineageEvent) -> bool {
        match self.ingest_event(event).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(
                    namespace = %event.namespace,
                    job = %event.job.name,
                    run_id = %event.run.run_id,
                    error = %e,
                    "Lineage ingestion failed"
                );
                false
            }
        }
    }

    /// Validate, audit and project `event`.
    ///
    /// A store or cache failure at any step is returned; earlier steps are
    /// not undone. Re-ingesting after a failure completes the projection.
    pub async fn ingest_event(&self, event: &LineageEvent) -> OverlayResult<IngestReceipt> {
        event.validate(self.max_event_bytes)?;
        let payload_json = event.canonical_json()?;
        let hash = overlay_core::sha256_hex(payload_json.as_bytes());

        let record = LineageAuditRecord {
            event_id: format!("ol_{}", Uuid::now_v7().simple()),
            event_time: event.event_time.clone(),
            namespace: event.namespace.clone(),
            job_name: event.job.name.clone(),
            run_id: event.run.run_id.clone(),
            event_type: event.event_type.as_str().to_string(),
            payload_json,
            hash: hash.clone(),
            created_at: self.cache.clock().now().timestamp(),
        };
        let inserted = self.store.insert_lineage_event(&record).await?;
        if !inserted {
            tracing::debug!(
                namespace = %event.namespace,
                hash = %hash,
                "Lineage event already recorded, refreshing projection"
            );
        }

        self.project(event, &hash).await?;

        tracing::debug!(
            namespace = %event.namespace,
            hash = %hash,
            edges = event.edge_pairs().len(),
            "Ingested lineage event"
        );
        Ok(IngestReceipt {
            hash,
            duplicate: !inserted,
        })
    }

    async fn project(&self, event: &LineageEvent, hash: &str) -> OverlayResult<()> {
        let ns = event.namespace.as_str();
        let backend = self.cache.backend();
        let ttl = self.ttl;
        let event_ms = event.event_time_millis()?;
        let score = event_ms as f64;

        self.cache
            .try_set(&CacheKeys::ol_event(ns, hash), event, ttl)
            .await?;
        self.touch_index(&CacheKeys::ol_events_by_time(ns), hash, score)
            .await?;

        // Job
        let job_key = CacheKeys::ol_job(ns, &event.job.name);
        let mut job_fields = vec![
            ("name".to_string(), event.job.name.clone()),
            ("namespace".to_string(), ns.to_string()),
            ("updatedAt".to_string(), event_ms.to_string()),
        ];
        if let Some(facets) = &event.job.facets {
            job_fields.push(("facets".to_string(), facets.to_string()));
        }
        backend.hset_many(&job_key, &job_fields).await?;
        backend.expire(&job_key, ttl).await?;
        self.touch_index(&CacheKeys::ol_jobs_by_updated(ns), &event.job.name, score)
            .await?;

        // Run
        let run_key = CacheKeys::ol_run(ns, &event.run.run_id);
        let mut run_fields = vec![
            ("runId".to_string(), event.run.run_id.clone()),
            ("jobName".to_string(), event.job.name.clone()),
            ("state".to_string(), event.event_type.as_str().to_string()),
        ];
        if event.event_type == EventType::Start {
            run_fields.push(("startTime".to_string(), event.event_time.clone()));
        }
        if event.event_type.is_terminal() {
            run_fields.push(("endTime".to_string(), event.event_time.clone()));
        }
        if let Some(facets) = &event.run.facets {
            run_fields.push(("facets".to_string(), facets.to_string()));
        }
        backend.hset_many(&run_key, &run_fields).await?;
        backend.expire(&run_key, ttl).await?;
        self.touch_index(&CacheKeys::ol_runs_by_updated(ns), &event.run.run_id, score)
            .await?;

        // Datasets
        let datasets = event.datasets();
        for dataset in &datasets {
            let key = CacheKeys::ol_dataset(ns, &dataset.name);
            let mut fields = vec![
                ("name".to_string(), dataset.name.clone()),
                ("namespace".to_string(), ns.to_string()),
            ];
            if let Some(facets) = &dataset.facets {
                fields.push(("facets".to_string(), facets.to_string()));
            }
            backend.hset_many(&key, &fields).await?;
            backend.expire(&key, ttl).await?;
        }
        let names: Vec<String> = datasets.into_iter().map(|d| d.name).collect();
        backend.sadd(&CacheKeys::ol_datasets_all(ns), &names).await?;

        // Edges
        for (input, output) in event.edge_pairs() {
            backend
                .sadd(&CacheKeys::ol_downstream(ns, input), &[output.to_string()])
                .await?;
            backend
                .sadd(&CacheKeys::ol_upstream(ns, output), &[input.to_string()])
                .await?;
        }

        Ok(())
    }

    /// Add `member` to the time index at `score` and drop members whose
    /// cached record has expired.
    ///
    /// Members are tracked in a companion set scored by write time, since
    /// index scores are event times and say nothing about expiry. Both sets
    /// take the lineage TTL, so an idle index disappears with its records.
    async fn touch_index(&self, index: &str, member: &str, score: f64) -> CacheResult<()> {
        let backend = self.cache.backend();
        let seen = CacheKeys::ol_index_seen(index);
        let now_ms = self.cache.clock().now().timestamp_millis();
        let ttl_ms = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);

        backend.zadd(index, member, score).await?;
        backend.zadd(&seen, member, now_ms as f64).await?;

        let cutoff = now_ms.saturating_sub(ttl_ms) as f64;
        let stale = backend
            .zrange_by_score(&seen, f64::NEG_INFINITY, cutoff)
            .await?;
        if !stale.is_empty() {
            backend.zrem(index, &stale).await?;
            backend.zrem(&seen, &stale).await?;
            tracing::debug!(index = %index, trimmed = stale.len(), "Trimmed expired index members");
        }

        backend.expire(index, self.ttl).await?;
        backend.expire(&seen, self.ttl).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheBackend, InMemoryCacheBackend};
    use crate::store::InMemoryRecordStore;
    use overlay_core::{DatasetRef, JobRef, ManualClock, OverlayError, RunRef};
    use serde_json::json;

    fn event(event_type: EventType, inputs: &[&str], outputs: &[&str]) -> LineageEvent {
        LineageEvent {
            namespace: "prod".to_string(),
            event_type,
            event_time: "2024-05-01T12:00:00Z".to_string(),
            producer: None,
            job: JobRef {
                name: "etl".to_string(),
                facets: None,
            },
            run: RunRef {
                run_id: "run-1".to_string(),
                facets: None,
            },
            inputs: inputs.iter().map(|n| DatasetRef::new(*n)).collect(),
            outputs: outputs.iter().map(|n| DatasetRef::new(*n)).collect(),
        }
    }

    fn ingestor() -> (
        LineageIngestor<InMemoryRecordStore>,
        Arc<InMemoryRecordStore>,
        Arc<InMemoryCacheBackend>,
    ) {
        let clock = ManualClock::default();
        let backend = Arc::new(InMemoryCacheBackend::with_clock(Arc::new(clock.clone())));
        let cache = CacheService::with_clock(backend.clone(), Arc::new(clock));
        let store = Arc::new(InMemoryRecordStore::new());
        (
            LineageIngestor::new(store.clone(), cache, &OverlayConfig::default()),
            store,
            backend,
        )
    }

    #[tokio::test]
    async fn test_projection_layout() {
        let (ingestor, _, backend) = ingestor();
        let mut event = event(EventType::Complete, &["raw"], &["clean"]);
        event.outputs[0].facets = Some(json!({"schema": {"fields": []}}));
        let receipt = ingestor.ingest_event(&event).await.unwrap();
        assert!(!receipt.duplicate);

        assert_eq!(backend.smembers("ol:ns:prod:down:raw").await.unwrap(), vec!["clean"]);
        assert_eq!(backend.smembers("ol:ns:prod:up:clean").await.unwrap(), vec!["raw"]);
        assert_eq!(backend.scard("ol:ns:prod:datasets:all").await.unwrap(), 2);
        assert!(backend
            .hget("ol:ns:prod:ds:clean", "facets")
            .await
            .unwrap()
            .is_some());

        let run = backend.hgetall("ol:ns:prod:run:run-1").await.unwrap();
        assert_eq!(run.get("state").map(String::as_str), Some("COMPLETE"));
        assert!(run.contains_key("endTime"));
        assert!(!run.contains_key("startTime"));

        let events = backend
            .zrange("ol:ns:prod:events:by_time", 0, -1)
            .await
            .unwrap();
        assert_eq!(events, vec![receipt.hash]);
    }

    #[tokio::test]
    async fn test_reingest_is_idempotent() {
        let (ingestor, store, backend) = ingestor();
        let event = event(EventType::Complete, &["a", "b"], &["c"]);

        assert!(ingestor.ingest(&event).await);
        let second = ingestor.ingest_event(&event).await.unwrap();
        assert!(second.duplicate);

        assert_eq!(store.audit_count().await, 1);
        assert_eq!(backend.scard("ol:ns:prod:up:c").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_event_without_outputs_has_no_edges() {
        let (ingestor, _, backend) = ingestor();
        assert!(ingestor.ingest(&event(EventType::Start, &["raw"], &[])).await);

        assert_eq!(backend.scard("ol:ns:prod:down:raw").await.unwrap(), 0);
        assert!(backend.exists("ol:ns:prod:ds:raw").await.unwrap());
        let run = backend.hgetall("ol:ns:prod:run:run-1").await.unwrap();
        assert!(run.contains_key("startTime"));
    }

    #[tokio::test]
    async fn test_time_indices_drop_expired_members() {
        let clock = ManualClock::default();
        let backend = Arc::new(InMemoryCacheBackend::with_clock(Arc::new(clock.clone())));
        let cache = CacheService::with_clock(backend.clone(), Arc::new(clock.clone()));
        let config = OverlayConfig::default();
        let ingestor = LineageIngestor::new(Arc::new(InMemoryRecordStore::new()), cache, &config);

        let old = ingestor
            .ingest_event(&event(EventType::Start, &["a"], &["b"]))
            .await
            .unwrap();
        clock.advance(config.ttls.lineage / 2);
        let mut second = event(EventType::Complete, &["a"], &["b"]);
        second.run.run_id = "run-2".to_string();
        let kept = ingestor.ingest_event(&second).await.unwrap();
        assert_eq!(
            backend.zrange("ol:ns:prod:events:by_time", 0, -1).await.unwrap().len(),
            2
        );

        // The first event's payload expires; the next write trims it.
        clock.advance(config.ttls.lineage / 2 + Duration::from_secs(1));
        assert!(!backend.exists(&CacheKeys::ol_event("prod", &old.hash)).await.unwrap());
        let mut third = event(EventType::Complete, &["a"], &["b"]);
        third.run.run_id = "run-3".to_string();
        let newest = ingestor.ingest_event(&third).await.unwrap();

        let mut events = backend
            .zrange("ol:ns:prod:events:by_time", 0, -1)
            .await
            .unwrap();
        events.sort();
        let mut expected = vec![kept.hash, newest.hash];
        expected.sort();
        assert_eq!(events, expected);
        assert_eq!(
            backend.zrange("ol:ns:prod:runs:by_updated", 0, -1).await.unwrap(),
            vec!["run-2", "run-3"]
        );
        assert_eq!(
            backend
                .zrange("ol:ns:prod:runs:by_updated:seen", 0, -1)
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn test_invalid_event_is_rejected_before_audit() {
        let (ingestor, store, _) = ingestor();
        let mut bad = event(EventType::Start, &["raw"], &["clean"]);
        bad.event_time = "yesterday".to_string();

        let err = ingestor.ingest_event(&bad).await.unwrap_err();
        assert!(matches!(err, OverlayError::Validation(_)));
        assert_eq!(store.audit_count().await, 0);
    }

    #[tokio::test]
    async fn test_cache_outage_fails_ingestion() {
        let (ingestor, store, backend) = ingestor();
        backend.close().await.unwrap();

        assert!(!ingestor.ingest(&event(EventType::Start, &["a"], &["b"])).await);
        // The audit row is authoritative and stays.
        assert_eq!(store.audit_count().await, 1);
    }
}
