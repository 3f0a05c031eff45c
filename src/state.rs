//! Shared application state handed to every handler.

use crate::services::{
    content_store::ContentStore, ingest::IngestService, metadata_store::MetadataStore,
    stats::StatsCache,
};

/// Knobs the HTTP layer needs beyond the injected services.
#[derive(Clone, Debug)]
pub struct ApiSettings {
    pub default_collection: String,
    pub admin_api_key: String,
    pub bucket_size_threshold: i64,
    pub split_chunk_size: i64,
}

#[derive(Clone)]
pub struct AppState {
    pub meta: MetadataStore,
    pub store: ContentStore,
    pub ingest: IngestService,
    pub stats: StatsCache,
    pub settings: ApiSettings,
}
