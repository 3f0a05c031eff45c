//! Represents an aggregation bucket — the unit of archive generation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle status of a bucket.
///
/// Legal transitions are `open → processing → ready`, plus
/// `open → deleted` and `processing → deleted` for administrative removal.
/// The `open → processing` step is only ever taken through the metadata
/// store's conditional claim, so concurrent writers cannot both win it.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BucketStatus {
    Open,
    Processing,
    Ready,
    Deleted,
}

impl BucketStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Deleted => "deleted",
        }
    }

    /// Whether moving from `self` to `next` is a legal lifecycle step.
    pub fn can_transition_to(self, next: BucketStatus) -> bool {
        matches!(
            (self, next),
            (Self::Open, Self::Processing)
                | (Self::Processing, Self::Ready)
                | (Self::Open, Self::Deleted)
                | (Self::Processing, Self::Deleted)
        )
    }
}

/// How a bucket came to exist.
///
/// `Aggregate` buckets collect many small uploads for one collection and
/// wait for the policy threshold; `Split` buckets hold the chunks of a
/// single oversized upload and are archived immediately.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BucketOrigin {
    Aggregate,
    Split,
}

/// A set of content items that will be archived together.
///
/// Membership is always derived by querying `contents.bucket_handle`;
/// a bucket never stores its member list.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Bucket {
    /// Internal row id.
    pub id: i64,

    /// Stable opaque identifier handed out to clients and jobs.
    pub handle: Uuid,

    /// Collection this bucket aggregates for.
    pub collection_name: String,

    /// Current lifecycle status.
    pub status: BucketStatus,

    /// Whether this bucket aggregates uploads or holds split chunks.
    pub origin: BucketOrigin,

    /// Policy governing this bucket's thresholds.
    pub policy_id: i64,

    /// Identifier of the serialized archive, set once the bucket is ready.
    pub archive_id: Option<String>,

    /// Identifier of the directory node covering the bucket's contents.
    pub directory_id: Option<String>,

    /// Hex-encoded commitment digest over the archive stream.
    pub commitment_id: Option<String>,

    /// Leaf-aligned padded size required by the commitment scheme.
    pub padded_piece_size: Option<i64>,

    /// Running content size while open; archive length once ready.
    pub byte_size: i64,

    /// API key the bucket's uploads were attributed to.
    pub owner_key: String,

    /// When this bucket was created.
    pub created_at: DateTime<Utc>,

    /// When this bucket was last updated.
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::BucketStatus::*;

    #[test]
    fn lifecycle_is_linear_with_terminal_delete() {
        assert!(Open.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Ready));
        assert!(Open.can_transition_to(Deleted));
        assert!(Processing.can_transition_to(Deleted));

        assert!(!Open.can_transition_to(Ready));
        assert!(!Processing.can_transition_to(Open));
        assert!(!Ready.can_transition_to(Open));
        assert!(!Ready.can_transition_to(Deleted));
        assert!(!Deleted.can_transition_to(Open));
    }
}
