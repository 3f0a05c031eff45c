//! Decomposes an oversized upload into policy-sized chunks with their own
//! dedicated bucket.

use super::{ArchiveJob, Dispatcher, Job, JobContext, JobError};
use crate::models::{bucket::BucketOrigin, content::Content};
use tracing::info;

/// Splits one oversized content item into `split_chunk_size` windows.
///
/// Each window becomes its own stored payload and content row, tagged with
/// its ordinal position. The chunks land in a fresh dedicated bucket that
/// is claimed and archived immediately — a split bucket never waits for
/// further aggregation.
pub struct SplitJob {
    pub content: Content,
}

impl SplitJob {
    pub async fn run(&self, ctx: &JobContext) -> Result<(), JobError> {
        let collection = &self.content.collection_name;
        let policy = ctx.meta.find_policy(collection).await?.ok_or_else(|| {
            JobError::Validation(format!("no policy for collection `{collection}`"))
        })?;

        if policy.split_chunk_size <= 0 {
            return Err(JobError::Validation(format!(
                "policy `{collection}` has non-positive split chunk size {}",
                policy.split_chunk_size
            )));
        }

        let payload = ctx.store.get_bytes(&self.content.content_id).await?;
        if payload.is_empty() {
            return Err(JobError::Validation(
                "refusing to split an empty payload".into(),
            ));
        }

        let bucket = ctx
            .meta
            .create_bucket(
                collection,
                &self.content.owner_key,
                policy.id,
                BucketOrigin::Split,
            )
            .await?;

        let mut chunk_count = 0usize;
        let mut total = 0i64;
        for (ordinal, window) in payload.chunks(policy.split_chunk_size as usize).enumerate() {
            let (chunk_id, size) = ctx.store.add_bytes(window).await?;
            ctx.meta
                .create_content(
                    &format!("{ordinal}-split-{chunk_id}"),
                    &chunk_id,
                    size,
                    collection,
                    Some(&bucket.handle),
                    &self.content.owner_key,
                    None,
                )
                .await?;
            chunk_count += 1;
            total += size;
        }
        ctx.meta.add_bucket_size(&bucket.handle, total).await?;

        info!(
            bucket = %bucket.handle,
            chunks = chunk_count,
            bytes = total,
            "split oversized upload into dedicated bucket"
        );

        if ctx.meta.claim_for_processing(&bucket.handle).await? == 1 {
            let dispatcher = Dispatcher::new();
            dispatcher
                .submit(Job::Archive(ArchiveJob {
                    bucket_handle: bucket.handle,
                }))
                .await;
            dispatcher.start_detached(ctx.clone(), 1);
        }

        Ok(())
    }
}
