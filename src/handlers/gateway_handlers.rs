//! Gateway read path: resolve a content identifier back into bytes.
//! Delegates entirely to the content store.

use crate::{errors::AppError, services::content_store::StoreError, state::AppState};
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

/// `GET /gw/{cid}`
///
/// Streams a payload block by block. A directory identifier resolves to
/// its listing instead of a byte stream.
pub async fn download(
    State(state): State<AppState>,
    Path(cid): Path<String>,
) -> Result<Response, AppError> {
    match state.store.reader(&cid).await {
        Ok((length, stream)) => {
            let mut response = Response::new(Body::from_stream(stream));
            *response.status_mut() = StatusCode::OK;
            let headers = response.headers_mut();
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            );
            headers.insert(
                header::CONTENT_LENGTH,
                HeaderValue::from_str(&length.to_string())
                    .unwrap_or_else(|_| HeaderValue::from_static("0")),
            );
            Ok(response)
        }
        Err(StoreError::NotAFile(_)) => {
            let listing = state.store.read_directory(&cid).await?;
            Ok(Json(listing).into_response())
        }
        Err(err) => Err(err.into()),
    }
}
