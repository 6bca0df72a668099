//! PostgreSQL implementation of [`RecordStore`].

use super::pg::{column, query_error, PgStore};
use super::RecordStore;
use async_trait::async_trait;
use chrono::Utc;
use overlay_core::{
    AssetRecord, LineageAuditRecord, ListingQuery, PriceRecord, ProducerRecord, ProducerUpsert,
    StoreError, StoreResult,
};
use tokio_postgres::Row;
use uuid::Uuid;

const ASSET_COLUMNS: &str = "version_id, dataset_id, manifest_hash, content_hash, title, \
     license, classification, producer_id, manifest_json, created_at";

const AUDIT_COLUMNS: &str =
    "event_id, event_time, namespace, job_name, run_id, event_type, payload_json, hash, created_at";

fn asset_from_row(row: &Row) -> StoreResult<AssetRecord> {
    Ok(AssetRecord {
        version_id: column(row, "version_id")?,
        dataset_id: column(row, "dataset_id")?,
        manifest_hash: column(row, "manifest_hash")?,
        content_hash: column(row, "content_hash")?,
        title: column(row, "title")?,
        license: column(row, "license")?,
        classification: column(row, "classification")?,
        producer_id: column(row, "producer_id")?,
        manifest_json: column(row, "manifest_json")?,
        created_at: column(row, "created_at")?,
    })
}

fn producer_from_row(row: &Row) -> StoreResult<ProducerRecord> {
    Ok(ProducerRecord {
        producer_id: column(row, "producer_id")?,
        identity_key: column(row, "identity_key")?,
        display_name: column(row, "display_name")?,
        website: column(row, "website")?,
        created_at: column(row, "created_at")?,
    })
}

fn price_from_row(row: &Row) -> StoreResult<PriceRecord> {
    Ok(PriceRecord {
        version_id: column(row, "version_id")?,
        satoshis: column(row, "satoshis")?,
        updated_at: column(row, "updated_at")?,
    })
}

fn audit_from_row(row: &Row) -> StoreResult<LineageAuditRecord> {
    Ok(LineageAuditRecord {
        event_id: column(row, "event_id")?,
        event_time: column(row, "event_time")?,
        namespace: column(row, "namespace")?,
        job_name: column(row, "job_name")?,
        run_id: column(row, "run_id")?,
        event_type: column(row, "event_type")?,
        payload_json: column(row, "payload_json")?,
        hash: column(row, "hash")?,
        created_at: column(row, "created_at")?,
    })
}

/// Record store over the tables in [`super::SCHEMA_SQL`].
#[derive(Debug, Clone)]
pub struct PgRecordStore {
    pg: PgStore,
}

impl PgRecordStore {
    pub fn new(pg: PgStore) -> Self {
        Self { pg }
    }

    /// Get a reference to the underlying pooled client.
    pub fn pg(&self) -> &PgStore {
        &self.pg
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn get_asset(&self, version_id: &str) -> StoreResult<Option<AssetRecord>> {
        let sql = format!("SELECT {} FROM assets WHERE version_id = $1", ASSET_COLUMNS);
        self.pg
            .query_one(&sql, &[&version_id])
            .await?
            .map(|row| asset_from_row(&row))
            .transpose()
    }

    async fn upsert_asset(&self, asset: &AssetRecord) -> StoreResult<()> {
        self.pg
            .execute(
                "INSERT INTO assets (version_id, dataset_id, manifest_hash, content_hash, title, \
                 license, classification, producer_id, manifest_json, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
                 ON CONFLICT (version_id) DO UPDATE SET \
                 dataset_id = EXCLUDED.dataset_id, \
                 manifest_hash = EXCLUDED.manifest_hash, \
                 content_hash = EXCLUDED.content_hash, \
                 title = EXCLUDED.title, \
                 license = EXCLUDED.license, \
                 classification = EXCLUDED.classification, \
                 producer_id = EXCLUDED.producer_id, \
                 manifest_json = EXCLUDED.manifest_json",
                &[
                    &asset.version_id,
                    &asset.dataset_id,
                    &asset.manifest_hash,
                    &asset.content_hash,
                    &asset.title,
                    &asset.license,
                    &asset.classification,
                    &asset.producer_id,
                    &asset.manifest_json,
                    &asset.created_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn search_assets(&self, query: &ListingQuery) -> StoreResult<Vec<AssetRecord>> {
        let query = query.normalized();
        let pattern = query.q.as_ref().map(|q| format!("%{}%", escape_like(q)));
        let limit = i64::from(query.limit);
        let offset = i64::try_from(query.offset()).unwrap_or(i64::MAX);

        let sql = format!(
            "SELECT {} FROM assets \
             WHERE ($1::text IS NULL OR title ILIKE $1 OR dataset_id ILIKE $1) \
             AND ($2::text IS NULL OR dataset_id = $2) \
             AND ($3::text IS NULL OR producer_id = $3) \
             ORDER BY created_at DESC, version_id \
             LIMIT $4 OFFSET $5",
            ASSET_COLUMNS
        );
        let rows = self
            .pg
            .query(
                &sql,
                &[
                    &pattern,
                    &query.dataset_id,
                    &query.producer_id,
                    &limit,
                    &offset,
                ],
            )
            .await?;
        rows.iter().map(asset_from_row).collect()
    }

    async fn get_producer(&self, producer_id: &str) -> StoreResult<Option<ProducerRecord>> {
        self.pg
            .query_one(
                "SELECT producer_id, identity_key, display_name, website, created_at \
                 FROM producers WHERE producer_id = $1",
                &[&producer_id],
            )
            .await?
            .map(|row| producer_from_row(&row))
            .transpose()
    }

    async fn upsert_producer(&self, producer: &ProducerUpsert) -> StoreResult<String> {
        let candidate_id = Uuid::now_v7().to_string();
        let row = self
            .pg
            .query_one(
                "INSERT INTO producers (producer_id, identity_key, display_name, website, created_at) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (identity_key) DO UPDATE SET \
                 display_name = COALESCE(EXCLUDED.display_name, producers.display_name), \
                 website = COALESCE(EXCLUDED.website, producers.website) \
                 RETURNING producer_id",
                &[
                    &candidate_id,
                    &producer.identity_key,
                    &producer.display_name,
                    &producer.website,
                    &Utc::now(),
                ],
            )
            .await?
            .ok_or_else(|| StoreError::Query {
                reason: "producer upsert returned no row".to_string(),
            })?;
        column(&row, "producer_id")
    }

    async fn get_price(&self, version_id: &str) -> StoreResult<Option<PriceRecord>> {
        self.pg
            .query_one(
                "SELECT version_id, satoshis, updated_at FROM prices WHERE version_id = $1",
                &[&version_id],
            )
            .await?
            .map(|row| price_from_row(&row))
            .transpose()
    }

    async fn set_price(&self, version_id: &str, satoshis: i64) -> StoreResult<PriceRecord> {
        let row = self
            .pg
            .query_one(
                "INSERT INTO prices (version_id, satoshis, updated_at) VALUES ($1, $2, $3) \
                 ON CONFLICT (version_id) DO UPDATE SET \
                 satoshis = EXCLUDED.satoshis, updated_at = EXCLUDED.updated_at \
                 RETURNING version_id, satoshis, updated_at",
                &[&version_id, &satoshis, &Utc::now()],
            )
            .await?
            .ok_or_else(|| StoreError::Query {
                reason: "price upsert returned no row".to_string(),
            })?;
        price_from_row(&row)
    }

    async fn replace_edges(&self, child: &str, parents: &[String]) -> StoreResult<()> {
        let child = child.to_string();
        let parents = parents.to_vec();
        self.pg
            .transaction(|tx| {
                Box::pin(async move {
                    tx.execute("DELETE FROM edges WHERE child_version_id = $1", &[&child])
                        .await
                        .map_err(query_error)?;
                    for parent in &parents {
                        tx.execute(
                            "INSERT INTO edges (child_version_id, parent_version_id) \
                             VALUES ($1, $2) ON CONFLICT DO NOTHING",
                            &[&child, parent],
                        )
                        .await
                        .map_err(query_error)?;
                    }
                    Ok(())
                })
            })
            .await
    }

    async fn get_parents(&self, child: &str) -> StoreResult<Vec<String>> {
        let rows = self
            .pg
            .query(
                "SELECT parent_version_id FROM edges WHERE child_version_id = $1 \
                 ORDER BY parent_version_id",
                &[&child],
            )
            .await?;
        rows.iter()
            .map(|row| column(row, "parent_version_id"))
            .collect()
    }

    async fn insert_lineage_event(&self, record: &LineageAuditRecord) -> StoreResult<bool> {
        let sql = format!(
            "INSERT INTO ol_events ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (hash) DO NOTHING",
            AUDIT_COLUMNS
        );
        let inserted = self
            .pg
            .execute(
                &sql,
                &[
                    &record.event_id,
                    &record.event_time,
                    &record.namespace,
                    &record.job_name,
                    &record.run_id,
                    &record.event_type,
                    &record.payload_json,
                    &record.hash,
                    &record.created_at,
                ],
            )
            .await?;
        Ok(inserted == 1)
    }

    async fn lineage_event(&self, hash: &str) -> StoreResult<Option<LineageAuditRecord>> {
        let sql = format!("SELECT {} FROM ol_events WHERE hash = $1", AUDIT_COLUMNS);
        self.pg
            .query_one(&sql, &[&hash])
            .await?
            .map(|row| audit_from_row(&row))
            .transpose()
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.pg.health_check().await
    }
}

/// Escape `%`, `_` and `\` for use inside a LIKE pattern.
fn escape_like(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
