//! HTTP handlers. These stay thin: header parsing, routing into the
//! services, and shaping responses. Authorization here is limited to
//! bearer-key extraction and the admin-key check.

pub mod bucket_handlers;
pub mod gateway_handlers;
pub mod health_handlers;
pub mod stats_handlers;
pub mod status_handlers;
pub mod upload_handlers;

use crate::{errors::AppError, state::ApiSettings};
use axum::http::{HeaderMap, header};

/// Second token of the `Authorization` header (`Bearer <key>`), or empty.
pub(crate) fn bearer_key(headers: &HeaderMap) -> String {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split_whitespace().nth(1))
        .unwrap_or_default()
        .to_string()
}

/// Reject callers that do not present the configured admin key.
pub(crate) fn require_admin(headers: &HeaderMap, settings: &ApiSettings) -> Result<(), AppError> {
    if bearer_key(headers) != settings.admin_api_key {
        return Err(AppError::unauthorized("Unauthorized"));
    }
    Ok(())
}
