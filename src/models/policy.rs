//! Per-collection aggregation policy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Configuration controlling how a collection's uploads are aggregated.
///
/// A policy is created lazily the first time a collection name is seen,
/// using the node's configured defaults. After creation it is read-only
/// on the ingestion path.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Policy {
    /// Internal row id.
    pub id: i64,

    /// Collection name this policy applies to (unique).
    pub name: String,

    /// Aggregate content size at which an open bucket is archived.
    pub bucket_size_threshold: i64,

    /// Window size used when an oversized upload is split into chunks.
    pub split_chunk_size: i64,

    /// When this policy was created.
    pub created_at: DateTime<Utc>,

    /// When this policy was last updated.
    pub updated_at: DateTime<Utc>,
}
