//! src/services/metadata_store.rs
//!
//! MetadataStore — typed facade over the SQLite pool for Policy, Bucket
//! and Content records. All cross-task coordination on bucket state goes
//! through [`MetadataStore::claim_for_processing`], the single atomic
//! conditional update in the system; nothing here takes in-process locks.

use crate::models::{
    bucket::{Bucket, BucketOrigin, BucketStatus},
    content::{CONTENT_STATUS_PINNED, Content},
    policy::Policy,
};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

const POLICY_COLUMNS: &str =
    "id, name, bucket_size_threshold, split_chunk_size, created_at, updated_at";

const BUCKET_COLUMNS: &str = "id, handle, collection_name, status, origin, policy_id, \
     archive_id, directory_id, commitment_id, padded_piece_size, byte_size, \
     owner_key, created_at, updated_at";

const CONTENT_COLUMNS: &str = "id, name, content_id, byte_size, status, collection_name, \
     bucket_handle, owner_key, object_id, make_deal, created_at, updated_at";

/// Totals reported by the stats endpoint.
#[derive(Clone, Copy, Debug, Default)]
pub struct StoreTotals {
    pub content_count: i64,
    pub total_size: i64,
    pub owner_count: i64,
}

#[derive(Clone)]
pub struct MetadataStore {
    db: Arc<SqlitePool>,
}

impl MetadataStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Apply the embedded schema to the pool, statement by statement.
    /// Every statement is idempotent, so this runs on each daemon start.
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        let sql = include_str!("../../migrations/0001_init.sql");
        for stmt in sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    // --- policies ---

    pub async fn find_policy(&self, name: &str) -> Result<Option<Policy>, sqlx::Error> {
        sqlx::query_as::<_, Policy>(&format!(
            "SELECT {POLICY_COLUMNS} FROM policies WHERE name = ?"
        ))
        .bind(name)
        .fetch_optional(&*self.db)
        .await
    }

    pub async fn find_policy_by_id(&self, id: i64) -> Result<Option<Policy>, sqlx::Error> {
        sqlx::query_as::<_, Policy>(&format!(
            "SELECT {POLICY_COLUMNS} FROM policies WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await
    }

    /// Fetch the policy for a collection, creating it with the supplied
    /// defaults on first use. Safe under concurrent first ingests: the
    /// loser of the insert race reads the winner's row.
    pub async fn find_or_create_policy(
        &self,
        name: &str,
        bucket_size_threshold: i64,
        split_chunk_size: i64,
    ) -> Result<Policy, sqlx::Error> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO policies (name, bucket_size_threshold, split_chunk_size, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(name)
        .bind(bucket_size_threshold)
        .bind(split_chunk_size)
        .bind(now)
        .bind(now)
        .execute(&*self.db)
        .await?;

        sqlx::query_as::<_, Policy>(&format!(
            "SELECT {POLICY_COLUMNS} FROM policies WHERE name = ?"
        ))
        .bind(name)
        .fetch_one(&*self.db)
        .await
    }

    // --- buckets ---

    pub async fn create_bucket(
        &self,
        collection_name: &str,
        owner_key: &str,
        policy_id: i64,
        origin: BucketOrigin,
    ) -> Result<Bucket, sqlx::Error> {
        let now = Utc::now();
        sqlx::query_as::<_, Bucket>(&format!(
            "INSERT INTO buckets (handle, collection_name, status, origin, policy_id, byte_size, owner_key, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, 0, ?, ?, ?)
             RETURNING {BUCKET_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(collection_name)
        .bind(BucketStatus::Open)
        .bind(origin)
        .bind(policy_id)
        .bind(owner_key)
        .bind(now)
        .bind(now)
        .fetch_one(&*self.db)
        .await
    }

    /// The collection's current open aggregation bucket, if any. Split
    /// buckets never appear here.
    pub async fn find_open_bucket(
        &self,
        collection_name: &str,
    ) -> Result<Option<Bucket>, sqlx::Error> {
        sqlx::query_as::<_, Bucket>(&format!(
            "SELECT {BUCKET_COLUMNS} FROM buckets
             WHERE collection_name = ? AND status = ? AND origin = ?"
        ))
        .bind(collection_name)
        .bind(BucketStatus::Open)
        .bind(BucketOrigin::Aggregate)
        .fetch_optional(&*self.db)
        .await
    }

    pub async fn find_bucket(&self, handle: &Uuid) -> Result<Option<Bucket>, sqlx::Error> {
        sqlx::query_as::<_, Bucket>(&format!(
            "SELECT {BUCKET_COLUMNS} FROM buckets WHERE handle = ?"
        ))
        .bind(handle)
        .fetch_optional(&*self.db)
        .await
    }

    pub async fn list_buckets_by_status(
        &self,
        status: BucketStatus,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Bucket>, sqlx::Error> {
        sqlx::query_as::<_, Bucket>(&format!(
            "SELECT {BUCKET_COLUMNS} FROM buckets WHERE status = ?
             ORDER BY id ASC LIMIT ? OFFSET ?"
        ))
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&*self.db)
        .await
    }

    /// Track ingested bytes on an open bucket's running size.
    pub async fn add_bucket_size(&self, handle: &Uuid, delta: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE buckets SET byte_size = byte_size + ?, updated_at = ? WHERE handle = ?")
            .bind(delta)
            .bind(Utc::now())
            .bind(handle)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    /// Atomically claim an open bucket for archiving.
    ///
    /// This is the `open → processing` transition and the sole coordination
    /// point between concurrent threshold checks: of any number of callers
    /// racing on the same bucket, exactly one observes an affected row.
    pub async fn claim_for_processing(&self, handle: &Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE buckets SET status = ?, updated_at = ? WHERE handle = ? AND status = ?",
        )
        .bind(BucketStatus::Processing)
        .bind(Utc::now())
        .bind(handle)
        .bind(BucketStatus::Open)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected())
    }

    /// Record a finished archive and move the bucket to `ready`.
    ///
    /// Guarded on the current status so an administrative delete that
    /// landed mid-archive is never reversed; the caller treats zero
    /// affected rows as a no-op.
    pub async fn finalize_archive(
        &self,
        handle: &Uuid,
        archive_id: &str,
        directory_id: &str,
        commitment_id: &str,
        padded_piece_size: i64,
        archive_size: i64,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE buckets SET status = ?, archive_id = ?, directory_id = ?, commitment_id = ?,
                    padded_piece_size = ?, byte_size = ?, updated_at = ?
             WHERE handle = ? AND status = ?",
        )
        .bind(BucketStatus::Ready)
        .bind(archive_id)
        .bind(directory_id)
        .bind(commitment_id)
        .bind(padded_piece_size)
        .bind(archive_size)
        .bind(Utc::now())
        .bind(handle)
        .bind(BucketStatus::Processing)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected())
    }

    /// Administrative delete. Only open and processing buckets may be
    /// deleted; ready and already-deleted buckets are left untouched.
    pub async fn mark_deleted(&self, handle: &Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE buckets SET status = ?, updated_at = ?
             WHERE handle = ? AND status IN (?, ?)",
        )
        .bind(BucketStatus::Deleted)
        .bind(Utc::now())
        .bind(handle)
        .bind(BucketStatus::Open)
        .bind(BucketStatus::Processing)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected())
    }

    // --- contents ---

    #[allow(clippy::too_many_arguments)]
    pub async fn create_content(
        &self,
        name: &str,
        content_id: &str,
        byte_size: i64,
        collection_name: &str,
        bucket_handle: Option<&Uuid>,
        owner_key: &str,
        object_id: Option<&str>,
    ) -> Result<Content, sqlx::Error> {
        let now = Utc::now();
        sqlx::query_as::<_, Content>(&format!(
            "INSERT INTO contents (name, content_id, byte_size, status, collection_name, bucket_handle, owner_key, object_id, make_deal, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
             RETURNING {CONTENT_COLUMNS}"
        ))
        .bind(name)
        .bind(content_id)
        .bind(byte_size)
        .bind(CONTENT_STATUS_PINNED)
        .bind(collection_name)
        .bind(bucket_handle)
        .bind(owner_key)
        .bind(object_id)
        .bind(now)
        .bind(now)
        .fetch_one(&*self.db)
        .await
    }

    pub async fn find_content_by_object_id(
        &self,
        owner_key: &str,
        object_id: &str,
    ) -> Result<Option<Content>, sqlx::Error> {
        sqlx::query_as::<_, Content>(&format!(
            "SELECT {CONTENT_COLUMNS} FROM contents WHERE owner_key = ? AND object_id = ?"
        ))
        .bind(owner_key)
        .bind(object_id)
        .fetch_optional(&*self.db)
        .await
    }

    /// The upsert-by-object-id mutation: replace a row's payload fields and
    /// re-point it at another bucket. The only write path that touches an
    /// existing content row.
    pub async fn reassign_content(
        &self,
        id: i64,
        name: &str,
        content_id: &str,
        byte_size: i64,
        bucket_handle: Option<&Uuid>,
    ) -> Result<Content, sqlx::Error> {
        sqlx::query_as::<_, Content>(&format!(
            "UPDATE contents SET name = ?, content_id = ?, byte_size = ?, bucket_handle = ?, updated_at = ?
             WHERE id = ?
             RETURNING {CONTENT_COLUMNS}"
        ))
        .bind(name)
        .bind(content_id)
        .bind(byte_size)
        .bind(bucket_handle)
        .bind(Utc::now())
        .bind(id)
        .fetch_one(&*self.db)
        .await
    }

    pub async fn find_content(&self, id: i64) -> Result<Option<Content>, sqlx::Error> {
        sqlx::query_as::<_, Content>(&format!(
            "SELECT {CONTENT_COLUMNS} FROM contents WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await
    }

    pub async fn find_contents_by_content_id(
        &self,
        content_id: &str,
    ) -> Result<Vec<Content>, sqlx::Error> {
        sqlx::query_as::<_, Content>(&format!(
            "SELECT {CONTENT_COLUMNS} FROM contents WHERE content_id = ?"
        ))
        .bind(content_id)
        .fetch_all(&*self.db)
        .await
    }

    /// Current member set of a bucket, in creation order.
    pub async fn contents_for_bucket(&self, handle: &Uuid) -> Result<Vec<Content>, sqlx::Error> {
        sqlx::query_as::<_, Content>(&format!(
            "SELECT {CONTENT_COLUMNS} FROM contents WHERE bucket_handle = ? ORDER BY id ASC"
        ))
        .bind(handle)
        .fetch_all(&*self.db)
        .await
    }

    /// Aggregate byte size of a bucket's current members. Recomputed from
    /// content rows every time; the bucket's own counter is advisory.
    pub async fn content_size_for_bucket(&self, handle: &Uuid) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(byte_size), 0) FROM contents WHERE bucket_handle = ?",
        )
        .bind(handle)
        .fetch_one(&*self.db)
        .await
    }

    /// Cumulative ingested size attributed to one API key, for the
    /// per-owner capacity limit.
    pub async fn total_size_for_owner(&self, owner_key: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(byte_size), 0) FROM contents WHERE owner_key = ?",
        )
        .bind(owner_key)
        .fetch_one(&*self.db)
        .await
    }

    pub async fn totals(&self) -> Result<StoreTotals, sqlx::Error> {
        let (content_count, total_size, owner_count) = sqlx::query_as::<_, (i64, i64, i64)>(
            "SELECT COUNT(*), COALESCE(SUM(byte_size), 0), COUNT(DISTINCT owner_key) FROM contents",
        )
        .fetch_one(&*self.db)
        .await?;
        Ok(StoreTotals {
            content_count,
            total_size,
            owner_count,
        })
    }
}

/// Return true if a SQLx error indicates a unique constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
