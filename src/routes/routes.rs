//! Defines routes for the ingestion node's HTTP surface.
//!
//! ## Structure
//! - **Ingestion**
//!   - `POST   /api/v1/content/add` — multipart upload into the pipeline
//!
//! - **Status / tracking**
//!   - `GET    /api/v1/status/content/{id}` — one content row
//!   - `GET    /api/v1/status/cid/{cid}` — rows by content identifier
//!   - `GET    /api/v1/status/bucket/{handle}` — bucket plus linked members
//!
//! - **Buckets**
//!   - `GET    /api/v1/buckets/get/open|processing|ready` — paged listings
//!   - `POST   /api/v1/buckets/create` — admin: pre-create policy + bucket
//!   - `DELETE /api/v1/buckets/{handle}` — admin: mark deleted
//!
//! - **Gateway / node**
//!   - `GET    /gw/{cid}` — stream stored bytes back out
//!   - `GET    /api/v1/stats`, `GET /healthz`, `GET /readyz`

use crate::{
    handlers::{
        bucket_handlers::{
            create_bucket, delete_bucket, list_open_buckets, list_processing_buckets,
            list_ready_buckets,
        },
        gateway_handlers::download,
        health_handlers::{healthz, readyz},
        stats_handlers::node_stats,
        status_handlers::{bucket_status, content_status, contents_by_cid},
        upload_handlers::add_content,
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{delete, get, post},
};

/// Build and return the router for the full API surface.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // gateway read path
        .route("/gw/{cid}", get(download))
        // ingestion
        .route("/api/v1/content/add", post(add_content))
        // status / tracking
        .route("/api/v1/status/content/{id}", get(content_status))
        .route("/api/v1/status/cid/{cid}", get(contents_by_cid))
        .route("/api/v1/status/bucket/{handle}", get(bucket_status))
        // buckets
        .route("/api/v1/buckets/get/open", get(list_open_buckets))
        .route("/api/v1/buckets/get/processing", get(list_processing_buckets))
        .route("/api/v1/buckets/get/ready", get(list_ready_buckets))
        .route("/api/v1/buckets/create", post(create_bucket))
        .route("/api/v1/buckets/{handle}", delete(delete_bucket))
        // node stats
        .route("/api/v1/stats", get(node_stats))
}
