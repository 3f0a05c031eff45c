//! Status lookups for content and buckets.

use crate::{errors::AppError, models::content::Content, state::AppState};
use axum::{
    Json,
    extract::{Path, State},
};
use serde_json::{Value, json};
use std::collections::HashSet;
use uuid::Uuid;

use super::bucket_handlers::BucketResponse;

/// `GET /api/v1/status/content/{id}`
pub async fn content_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    let content = state
        .meta
        .find_content(id)
        .await?
        .ok_or_else(|| AppError::not_found("content not found; check that the id is valid"))?;
    Ok(Json(json!({ "content": content.sanitized() })))
}

/// `GET /api/v1/status/cid/{cid}`
pub async fn contents_by_cid(
    State(state): State<AppState>,
    Path(cid): Path<String>,
) -> Result<Json<Value>, AppError> {
    let contents = state.meta.find_contents_by_content_id(&cid).await?;
    if contents.is_empty() {
        return Err(AppError::not_found(
            "content not found; check that the identifier is valid",
        ));
    }
    let contents: Vec<Content> = contents.into_iter().map(Content::sanitized).collect();
    Ok(Json(json!({ "cids": contents })))
}

/// `GET /api/v1/status/bucket/{handle}`
///
/// The bucket plus its member rows. Once the bucket has a directory node,
/// only members whose identifiers are actually reachable from it are
/// listed, which is what downstream deal tracking keys on.
pub async fn bucket_status(
    State(state): State<AppState>,
    Path(handle): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let bucket = state
        .meta
        .find_bucket(&handle)
        .await?
        .ok_or_else(|| AppError::not_found("bucket not found; check that the handle is valid"))?;

    let members = state.meta.contents_for_bucket(&handle).await?;
    let members = match &bucket.directory_id {
        Some(directory_id) => {
            let linked: HashSet<String> = state
                .store
                .read_directory(directory_id)
                .await?
                .into_iter()
                .map(|link| link.id)
                .collect();
            members
                .into_iter()
                .filter(|content| linked.contains(&content.content_id))
                .collect()
        }
        None => members,
    };
    let members: Vec<Content> = members.into_iter().map(Content::sanitized).collect();

    Ok(Json(json!({
        "bucket": BucketResponse::from(bucket),
        "content_links": members,
    })))
}
