//! Bucket listing and administrative bucket endpoints.

use crate::{
    errors::AppError,
    models::bucket::{Bucket, BucketOrigin, BucketStatus},
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::HeaderMap,
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use super::{bearer_key, require_admin};

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Serialize)]
pub struct PieceCommitment {
    pub commitment_id: Option<String>,
    pub padded_piece_size: Option<i64>,
}

/// Bucket as exposed to API callers; omits the owner key.
#[derive(Serialize)]
pub struct BucketResponse {
    pub bucket_handle: Uuid,
    pub collection_name: String,
    pub status: BucketStatus,
    pub origin: BucketOrigin,
    pub piece_commitment: PieceCommitment,
    pub archive_id: Option<String>,
    pub directory_id: Option<String>,
    pub byte_size: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Bucket> for BucketResponse {
    fn from(bucket: Bucket) -> Self {
        Self {
            bucket_handle: bucket.handle,
            collection_name: bucket.collection_name,
            status: bucket.status,
            origin: bucket.origin,
            piece_commitment: PieceCommitment {
                commitment_id: bucket.commitment_id,
                padded_piece_size: bucket.padded_piece_size,
            },
            archive_id: bucket.archive_id,
            directory_id: bucket.directory_id,
            byte_size: bucket.byte_size,
            created_at: bucket.created_at,
            updated_at: bucket.updated_at,
        }
    }
}

async fn list_by_status(
    state: &AppState,
    status: BucketStatus,
    query: PageQuery,
) -> Result<Json<Vec<BucketResponse>>, AppError> {
    let page = query.page.unwrap_or(1).max(1);
    let page_size = query.page_size.unwrap_or(25).clamp(1, 100);
    let buckets = state
        .meta
        .list_buckets_by_status(status, (page - 1) * page_size, page_size)
        .await?;
    if buckets.is_empty() {
        return Err(AppError::not_found(format!(
            "no {} buckets found",
            status.as_str()
        )));
    }
    Ok(Json(buckets.into_iter().map(BucketResponse::from).collect()))
}

/// `GET /api/v1/buckets/get/open`
pub async fn list_open_buckets(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<BucketResponse>>, AppError> {
    list_by_status(&state, BucketStatus::Open, query).await
}

/// `GET /api/v1/buckets/get/processing`
pub async fn list_processing_buckets(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<BucketResponse>>, AppError> {
    list_by_status(&state, BucketStatus::Processing, query).await
}

/// `GET /api/v1/buckets/get/ready`
pub async fn list_ready_buckets(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<BucketResponse>>, AppError> {
    list_by_status(&state, BucketStatus::Ready, query).await
}

#[derive(Debug, Deserialize)]
pub struct CreateBucketRequest {
    pub name: String,
    pub bucket_size_threshold: Option<i64>,
    pub split_chunk_size: Option<i64>,
}

/// `POST /api/v1/buckets/create`
///
/// Admin: pre-create a collection's policy (with optional custom sizes)
/// and its open bucket before any upload arrives.
pub async fn create_bucket(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateBucketRequest>,
) -> Result<Json<BucketResponse>, AppError> {
    require_admin(&headers, &state.settings)?;
    if request.name.trim().is_empty() {
        return Err(AppError::bad_request(
            "please provide a name for the collection bucket",
        ));
    }

    let policy = state
        .meta
        .find_or_create_policy(
            &request.name,
            request
                .bucket_size_threshold
                .filter(|size| *size > 0)
                .unwrap_or(state.settings.bucket_size_threshold),
            request
                .split_chunk_size
                .filter(|size| *size > 0)
                .unwrap_or(state.settings.split_chunk_size),
        )
        .await?;

    if let Some(existing) = state.meta.find_open_bucket(&request.name).await? {
        return Ok(Json(existing.into()));
    }
    let bucket = state
        .meta
        .create_bucket(
            &request.name,
            &bearer_key(&headers),
            policy.id,
            BucketOrigin::Aggregate,
        )
        .await?;
    Ok(Json(bucket.into()))
}

/// `DELETE /api/v1/buckets/{handle}`
///
/// Admin: mark a bucket deleted. Only open and processing buckets may be
/// deleted; the transition is terminal.
pub async fn delete_bucket(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(handle): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_admin(&headers, &state.settings)?;

    if state.meta.mark_deleted(&handle).await? == 0 {
        return match state.meta.find_bucket(&handle).await? {
            Some(bucket) => Err(AppError::new(
                StatusCode::CONFLICT,
                format!(
                    "bucket is `{}`; only open or processing buckets can be deleted",
                    bucket.status.as_str()
                ),
            )),
            None => Err(AppError::not_found("bucket not found")),
        };
    }

    Ok(Json(json!({
        "message": "Bucket deleted",
        "bucket": handle,
    })))
}
