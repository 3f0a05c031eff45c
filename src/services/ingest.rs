//! src/services/ingest.rs
//!
//! IngestService — the synchronous front half of the pipeline. Consumes an
//! upload stream into the content store, records the content row, and
//! routes the item either to the splitter (oversized) or onto the
//! collection's open bucket followed by a per-event aggregation check.

use crate::{
    jobs::{AggregateJob, Dispatcher, Job, JobContext, SplitJob},
    models::{bucket::Bucket, bucket::BucketOrigin, content::Content},
    services::{
        content_store::{ContentStore, StoreError},
        metadata_store::{MetadataStore, is_unique_violation},
    },
};
use bytes::Bytes;
use futures::Stream;
use std::io;
use thiserror::Error;
use tracing::debug;

/// Node-level defaults applied when a collection is seen for the first
/// time, plus the routing knobs the ingest path needs.
#[derive(Clone, Debug)]
pub struct IngestSettings {
    /// Default aggregation threshold for new policies.
    pub bucket_size_threshold: i64,
    /// Default split window for new policies.
    pub split_chunk_size: i64,
    /// Uploads larger than this bypass aggregation and are split.
    pub split_trigger_size: i64,
    /// Per-owner cumulative size cap; zero disables the check.
    pub capacity_limit_per_key: i64,
    /// Worker count for job batches spawned off the request path.
    pub job_concurrency: usize,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("collection name must not be empty")]
    EmptyCollectionName,
    #[error("refusing to ingest an empty stream")]
    EmptyStream,
    #[error("capacity limit of {0} bytes reached for this key")]
    CapacityExceeded(i64),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

pub type IngestResult<T> = Result<T, IngestError>;

#[derive(Clone)]
pub struct IngestService {
    meta: MetadataStore,
    store: ContentStore,
    settings: IngestSettings,
}

impl IngestService {
    pub fn new(meta: MetadataStore, store: ContentStore, settings: IngestSettings) -> Self {
        Self {
            meta,
            store,
            settings,
        }
    }

    fn job_context(&self) -> JobContext {
        JobContext {
            meta: self.meta.clone(),
            store: self.store.clone(),
        }
    }

    /// Ingest one payload.
    ///
    /// Synchronous up to the store-add and record creation: the calling
    /// task stays occupied for the entire read of the upload, which is the
    /// node's backpressure — one task per concurrent upload, no internal
    /// queue in front of the store. Aggregation and archiving happen
    /// asynchronously afterwards.
    pub async fn ingest<S>(
        &self,
        owner_key: &str,
        collection_name: &str,
        name: &str,
        object_id: Option<&str>,
        stream: S,
    ) -> IngestResult<Content>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        if collection_name.trim().is_empty() {
            return Err(IngestError::EmptyCollectionName);
        }
        let limit = self.settings.capacity_limit_per_key;
        if limit > 0 && self.meta.total_size_for_owner(owner_key).await? >= limit {
            return Err(IngestError::CapacityExceeded(limit));
        }

        let policy = self
            .meta
            .find_or_create_policy(
                collection_name,
                self.settings.bucket_size_threshold,
                self.settings.split_chunk_size,
            )
            .await?;

        let (content_id, byte_size) = self.store.add_stream(stream).await?;
        if byte_size == 0 {
            return Err(IngestError::EmptyStream);
        }
        let display_name = if name.is_empty() {
            content_id.clone()
        } else {
            name.to_string()
        };

        if byte_size > self.settings.split_trigger_size {
            let content = self
                .meta
                .create_content(
                    &display_name,
                    &content_id,
                    byte_size,
                    collection_name,
                    None,
                    owner_key,
                    object_id,
                )
                .await?;
            debug!(content = content.id, byte_size, "routing oversized upload to splitter");
            let dispatcher = Dispatcher::new();
            dispatcher
                .submit(Job::Split(SplitJob {
                    content: content.clone(),
                }))
                .await;
            dispatcher.start_detached(self.job_context(), self.settings.job_concurrency);
            return Ok(content);
        }

        let bucket = self
            .open_bucket_for(collection_name, owner_key, policy.id)
            .await?;

        let existing = match object_id {
            Some(oid) => self.meta.find_content_by_object_id(owner_key, oid).await?,
            None => None,
        };
        let content = match existing {
            Some(row) => {
                self.meta
                    .reassign_content(
                        row.id,
                        &display_name,
                        &content_id,
                        byte_size,
                        Some(&bucket.handle),
                    )
                    .await?
            }
            None => {
                self.meta
                    .create_content(
                        &display_name,
                        &content_id,
                        byte_size,
                        collection_name,
                        Some(&bucket.handle),
                        owner_key,
                        object_id,
                    )
                    .await?
            }
        };
        self.meta.add_bucket_size(&bucket.handle, byte_size).await?;

        let dispatcher = Dispatcher::new();
        dispatcher
            .submit(Job::Aggregate(AggregateJob {
                bucket_handle: bucket.handle,
            }))
            .await;
        dispatcher.start_detached(self.job_context(), self.settings.job_concurrency);

        Ok(content)
    }

    /// The collection's open bucket, created on demand. A concurrent
    /// ingest may win the creation race; the loser reads the winner's row
    /// (the open-bucket uniqueness lives in the schema).
    async fn open_bucket_for(
        &self,
        collection_name: &str,
        owner_key: &str,
        policy_id: i64,
    ) -> IngestResult<Bucket> {
        if let Some(bucket) = self.meta.find_open_bucket(collection_name).await? {
            return Ok(bucket);
        }
        match self
            .meta
            .create_bucket(collection_name, owner_key, policy_id, BucketOrigin::Aggregate)
            .await
        {
            Ok(bucket) => Ok(bucket),
            Err(err) if is_unique_violation(&err) => self
                .meta
                .find_open_bucket(collection_name)
                .await?
                .ok_or(IngestError::Db(err)),
            Err(err) => Err(err.into()),
        }
    }
}
