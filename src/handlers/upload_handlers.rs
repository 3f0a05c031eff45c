//! Upload handler: multipart ingest into the aggregation pipeline.
//! Streams each file field into the content store without buffering the
//! payload in memory; text fields preceding a file field apply to it.

use crate::{errors::AppError, models::content::Content, state::AppState};
use axum::{Json, extract::Multipart, extract::State, http::HeaderMap, http::StatusCode};
use futures::StreamExt;
use serde::Serialize;
use std::io;

use super::bearer_key;

#[derive(Serialize)]
pub struct UploadResponse {
    pub status: String,
    pub message: String,
    pub contents: Vec<Content>,
}

/// `POST /api/v1/content/add`
///
/// Accepts one or more `data` file fields plus optional `collection_name`
/// and `object_id` text fields. The request task stays occupied for the
/// whole read of each upload; aggregation and archiving continue in the
/// background after the response.
pub async fn add_content(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let owner_key = bearer_key(&headers);
    let mut collection_name = state.settings.default_collection.clone();
    let mut object_id: Option<String> = None;
    let mut contents: Vec<Content> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(err.to_string()))?
    {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "collection_name" => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| AppError::bad_request(err.to_string()))?;
                if !value.trim().is_empty() {
                    collection_name = value;
                }
            }
            "object_id" => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| AppError::bad_request(err.to_string()))?;
                if !value.trim().is_empty() {
                    object_id = Some(value);
                }
            }
            "data" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let stream = field
                    .map(|chunk| chunk.map_err(|err| io::Error::new(io::ErrorKind::Other, err)));
                let content = state
                    .ingest
                    .ingest(
                        &owner_key,
                        &collection_name,
                        &file_name,
                        object_id.as_deref(),
                        stream,
                    )
                    .await?;
                contents.push(content.sanitized());
            }
            _ => {}
        }
    }

    if contents.is_empty() {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "multipart request carried no `data` field",
        ));
    }

    Ok(Json(UploadResponse {
        status: "success".into(),
        message: "File uploaded and pinned successfully. Please take note of the ids.".into(),
        contents,
    }))
}
