//! Assembles a claimed bucket's content into one directory node, one
//! serialized archive, and one commitment digest.

use super::{JobContext, JobError, commitment::CommitmentCalculator};
use crate::{
    models::bucket::BucketStatus,
    services::content_store::DagLink,
};
use tracing::{info, warn};
use uuid::Uuid;

/// Generates the archive for a bucket already claimed into `processing`.
///
/// Failure at any step aborts the run and leaves the bucket in
/// `processing` with no archive fields populated — a stuck state that an
/// operator re-drives; nothing here rolls back or retries.
pub struct ArchiveJob {
    pub bucket_handle: Uuid,
}

impl ArchiveJob {
    pub async fn run(&self, ctx: &JobContext) -> Result<(), JobError> {
        let bucket = ctx
            .meta
            .find_bucket(&self.bucket_handle)
            .await?
            .ok_or(JobError::MissingBucket(self.bucket_handle))?;
        if bucket.status != BucketStatus::Processing {
            return Err(JobError::Validation(format!(
                "bucket `{}` is `{}`, expected `processing`",
                bucket.handle,
                bucket.status.as_str()
            )));
        }

        let contents = ctx.meta.contents_for_bucket(&bucket.handle).await?;
        if contents.is_empty() {
            return Err(JobError::Validation(format!(
                "bucket `{}` has no content to archive",
                bucket.handle
            )));
        }

        // Fetch every member's node up front so a missing or corrupt block
        // fails the run before anything is written.
        let mut children = Vec::with_capacity(contents.len());
        for content in &contents {
            ctx.store.get_block(&content.content_id).await?;
            children.push(DagLink {
                name: content.name.clone(),
                id: content.content_id.clone(),
                size: content.byte_size,
            });
        }

        let directory_id = ctx.store.build_directory(children).await?;
        let archive = ctx.store.export_archive(&directory_id).await?;
        let (archive_id, archive_size) = ctx.store.add_bytes(&archive).await?;

        let mut calculator = CommitmentCalculator::new();
        calculator.update(&archive);
        let commitment = calculator.finalize();

        let updated = ctx
            .meta
            .finalize_archive(
                &bucket.handle,
                &archive_id,
                &directory_id,
                &commitment.digest_hex(),
                commitment.padded_piece_size as i64,
                archive_size,
            )
            .await?;
        if updated == 0 {
            warn!(
                bucket = %bucket.handle,
                "bucket left processing state before archive completion; result discarded"
            );
            return Ok(());
        }

        info!(
            bucket = %bucket.handle,
            archive = %archive_id,
            directory = %directory_id,
            commitment = %commitment.digest_hex(),
            padded_piece_size = commitment.padded_piece_size,
            archive_size,
            members = contents.len(),
            "bucket archived and ready"
        );
        Ok(())
    }
}
