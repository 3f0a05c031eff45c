//! Service layer: the content-addressed block store, the metadata store
//! facade, the ingest pipeline entry point, and the stats cache.

pub mod content_store;
pub mod ingest;
pub mod metadata_store;
pub mod stats;
