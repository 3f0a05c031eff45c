//! Per-event threshold check and archive claim for one bucket.

use super::{ArchiveJob, Dispatcher, Job, JobContext, JobError};
use tracing::{debug, info};
use uuid::Uuid;

/// Evaluates whether one bucket has crossed its aggregation threshold and,
/// if so, atomically claims it for archiving.
///
/// Triggered once per ingest event for the bucket that changed. The size
/// check may race with concurrent inserts into the same bucket; that is
/// fine because the conditional claim — not the check — decides who
/// archives. Redundant checks converging on the same claim are idempotent:
/// all but one observe zero affected rows and stop.
pub struct AggregateJob {
    pub bucket_handle: Uuid,
}

impl AggregateJob {
    pub async fn run(&self, ctx: &JobContext) -> Result<(), JobError> {
        let bucket = ctx
            .meta
            .find_bucket(&self.bucket_handle)
            .await?
            .ok_or(JobError::MissingBucket(self.bucket_handle))?;

        let policy = ctx
            .meta
            .find_policy_by_id(bucket.policy_id)
            .await?
            .ok_or_else(|| {
                JobError::Validation(format!("bucket `{}` has no policy", bucket.handle))
            })?;

        let total = ctx.meta.content_size_for_bucket(&bucket.handle).await?;
        if total < policy.bucket_size_threshold {
            debug!(
                bucket = %bucket.handle,
                total,
                threshold = policy.bucket_size_threshold,
                "bucket below aggregation threshold"
            );
            return Ok(());
        }

        match ctx.meta.claim_for_processing(&bucket.handle).await? {
            0 => {
                debug!(bucket = %bucket.handle, "bucket already claimed by a concurrent check");
                Ok(())
            }
            _ => {
                info!(
                    bucket = %bucket.handle,
                    total,
                    threshold = policy.bucket_size_threshold,
                    "claimed bucket for archiving"
                );
                let dispatcher = Dispatcher::new();
                dispatcher
                    .submit(Job::Archive(ArchiveJob {
                        bucket_handle: bucket.handle,
                    }))
                    .await;
                dispatcher.start_detached(ctx.clone(), 1);
                Ok(())
            }
        }
    }
}
