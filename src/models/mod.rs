//! Core data models for the edge ingestion node.
//!
//! These entities represent the durable state of the aggregation pipeline:
//! per-collection policies, aggregation buckets, and ingested content.
//! They map cleanly to database tables via `sqlx::FromRow` and serialize
//! naturally as JSON via `serde`.

pub mod bucket;
pub mod content;
pub mod policy;
