//! Represents a single ingested payload (or one chunk of a split payload).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Status value for content that has been stored and pinned locally.
pub const CONTENT_STATUS_PINNED: &str = "pinned";

/// One ingested item, addressed by its content identifier.
///
/// A content row is immutable after creation, with one exception: a later
/// re-ingest carrying the same `(owner_key, object_id)` pair updates the
/// row in place (upsert-by-object-id).
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Content {
    /// Internal row id.
    pub id: i64,

    /// Display name, used as the child name in the bucket's directory node.
    pub name: String,

    /// Hash-derived, self-verifying identifier of the stored bytes.
    pub content_id: String,

    /// Payload length in bytes.
    pub byte_size: i64,

    /// Pipeline status (currently always `pinned` after ingest).
    pub status: String,

    /// Collection the item was ingested into.
    pub collection_name: String,

    /// Handle of the owning bucket; set when the item is assigned.
    pub bucket_handle: Option<Uuid>,

    /// API key the upload was attributed to. Blanked in API responses.
    pub owner_key: String,

    /// Caller-supplied idempotency key for re-ingest tracking.
    pub object_id: Option<String>,

    /// Whether this item should be offered for deal making downstream.
    pub make_deal: bool,

    /// When this row was created.
    pub created_at: DateTime<Utc>,

    /// When this row was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Content {
    /// Copy of this record safe to return to API callers.
    pub fn sanitized(mut self) -> Self {
        self.owner_key = String::new();
        self
    }
}
