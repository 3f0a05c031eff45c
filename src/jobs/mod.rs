//! Background job pipeline: splitting oversized uploads, checking
//! aggregation thresholds, and generating archives.
//!
//! Jobs form a closed set of variants with one uniform run capability.
//! They carry no shared in-process state; everything they coordinate on
//! goes through the metadata store, so the pipeline stays correct even if
//! each job ran in its own process.

pub mod aggregator;
pub mod archive;
pub mod commitment;
pub mod dispatcher;
pub mod splitter;

use crate::services::{
    content_store::{ContentStore, StoreError},
    metadata_store::MetadataStore,
};
use futures::{FutureExt, future::BoxFuture};
use thiserror::Error;
use uuid::Uuid;

pub use aggregator::AggregateJob;
pub use archive::ArchiveJob;
pub use dispatcher::Dispatcher;
pub use splitter::SplitJob;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("{0}")]
    Validation(String),
    #[error("bucket `{0}` not found")]
    MissingBucket(Uuid),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Everything a job needs to do its work, injected explicitly.
#[derive(Clone)]
pub struct JobContext {
    pub meta: MetadataStore,
    pub store: ContentStore,
}

/// The closed set of background task kinds.
pub enum Job {
    Split(SplitJob),
    Aggregate(AggregateJob),
    Archive(ArchiveJob),
}

impl Job {
    /// Short label used in dispatcher logs.
    pub fn describe(&self) -> String {
        match self {
            Job::Split(job) => format!("split(content={})", job.content.id),
            Job::Aggregate(job) => format!("aggregate(bucket={})", job.bucket_handle),
            Job::Archive(job) => format!("archive(bucket={})", job.bucket_handle),
        }
    }

    pub fn run<'a>(&'a self, ctx: &'a JobContext) -> BoxFuture<'a, Result<(), JobError>> {
        match self {
            Job::Split(job) => job.run(ctx).boxed(),
            Job::Aggregate(job) => job.run(ctx).boxed(),
            Job::Archive(job) => job.run(ctx).boxed(),
        }
    }
}
