//! Lineage indexing.
//!
//! Events are recorded in the audit table of the [`crate::store::RecordStore`]
//! and projected into namespace-scoped cache structures:
//!
//! | Key | Kind | Content |
//! |---|---|---|
//! | `ol:ns:<ns>:event:<hash>` | string | the raw event |
//! | `ol:ns:<ns>:events:by_time` | sorted set | event hashes scored by event time |
//! | `ol:ns:<ns>:jobs:by_updated` | sorted set | job names scored by last event time |
//! | `ol:ns:<ns>:runs:by_updated` | sorted set | run ids scored by last event time |
//! | `ol:ns:<ns>:job:<name>` | hash | job metadata |
//! | `ol:ns:<ns>:run:<id>` | hash | run metadata and state |
//! | `ol:ns:<ns>:ds:<name>` | hash | dataset metadata |
//! | `ol:ns:<ns>:datasets:all` | set | dataset names |
//! | `ol:ns:<ns>:up:<name>` / `down:<name>` | set | parents / children |
//!
//! Metadata hashes carry the lineage TTL and are refreshed by every event
//! that mentions them. The time indices (`events:by_time`, `jobs:by_updated`,
//! `runs:by_updated`) each have a `:seen` companion scored by write time;
//! members whose record has expired are trimmed on the next write, and both
//! sets take the lineage TTL. The dataset index and adjacency sets do not
//! expire.

pub mod ingest;
pub mod projection;
pub mod query;

pub use ingest::{IngestReceipt, LineageIngestor};
pub use projection::LineageProjection;
pub use query::{LineageQuery, LineageQueryEngine};
