//! End-to-end tests for the ingestion-aggregation pipeline: splitting,
//! threshold claims, archive generation, and the bucket state machine.

use edge_ingest::{
    jobs::{AggregateJob, ArchiveJob, JobContext, SplitJob},
    models::bucket::{Bucket, BucketOrigin, BucketStatus},
    services::{
        content_store::{ContentStore, decode_archive},
        ingest::{IngestError, IngestService, IngestSettings},
        metadata_store::MetadataStore,
    },
};
use sqlx::sqlite::SqlitePoolOptions;
use std::{sync::Arc, time::Duration};
use tempfile::TempDir;
use uuid::Uuid;

struct TestNode {
    _dir: TempDir,
    meta: MetadataStore,
    store: ContentStore,
    ingest: IngestService,
}

impl TestNode {
    fn ctx(&self) -> JobContext {
        JobContext {
            meta: self.meta.clone(),
            store: self.store.clone(),
        }
    }
}

async fn node(settings: IngestSettings) -> TestNode {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_url = format!(
        "sqlite://{}?mode=rwc",
        dir.path().join("meta.db").display()
    );
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await
        .expect("connect sqlite");
    let meta = MetadataStore::new(Arc::new(pool));
    meta.migrate().await.expect("migrate");
    let store = ContentStore::open(dir.path().join("store"))
        .await
        .expect("open store");
    let ingest = IngestService::new(meta.clone(), store.clone(), settings);
    TestNode {
        _dir: dir,
        meta,
        store,
        ingest,
    }
}

fn settings(threshold: i64, chunk: i64, trigger: i64) -> IngestSettings {
    IngestSettings {
        bucket_size_threshold: threshold,
        split_chunk_size: chunk,
        split_trigger_size: trigger,
        capacity_limit_per_key: 0,
        job_concurrency: 1,
    }
}

async fn ingest_bytes(
    node: &TestNode,
    owner: &str,
    collection: &str,
    name: &str,
    object_id: Option<&str>,
    payload: &[u8],
) -> Result<edge_ingest::models::content::Content, IngestError> {
    let owned = bytes::Bytes::copy_from_slice(payload);
    node.ingest
        .ingest(
            owner,
            collection,
            name,
            object_id,
            futures::stream::iter([Ok(owned)]),
        )
        .await
}

/// Poll until the bucket reaches `status`, failing after a few seconds.
async fn wait_for_status(meta: &MetadataStore, handle: &Uuid, status: BucketStatus) -> Bucket {
    for _ in 0..200 {
        if let Some(bucket) = meta.find_bucket(handle).await.expect("find bucket") {
            if bucket.status == status {
                return bucket;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("bucket {handle} never reached {}", status.as_str());
}

/// Poll until exactly one bucket with `status` exists and return it.
async fn wait_for_one_bucket(meta: &MetadataStore, status: BucketStatus) -> Bucket {
    for _ in 0..200 {
        let buckets = meta
            .list_buckets_by_status(status, 0, 10)
            .await
            .expect("list buckets");
        if buckets.len() == 1 {
            return buckets.into_iter().next().unwrap();
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("no single {} bucket appeared", status.as_str());
}

#[tokio::test]
async fn scenario_a_threshold_crossing_archives_exactly_once() {
    let node = node(settings(100, 1_000, 1_000_000)).await;

    let payloads: [&[u8]; 3] = [&[1u8; 40], &[2u8; 40], &[3u8; 30]];
    let mut handle = None;
    for (i, payload) in payloads.iter().enumerate() {
        let content = ingest_bytes(&node, "key-a", "photos", &format!("item-{i}"), None, payload)
            .await
            .expect("ingest");
        handle = content.bucket_handle;
    }
    let handle = handle.expect("bucket assigned");

    let bucket = wait_for_status(&node.meta, &handle, BucketStatus::Ready).await;
    assert_eq!(bucket.origin, BucketOrigin::Aggregate);
    let archive_id = bucket.archive_id.expect("archive identifier");
    let directory_id = bucket.directory_id.expect("directory identifier");
    assert!(bucket.commitment_id.is_some());
    assert!(bucket.padded_piece_size.unwrap() > 0);

    let members = node.meta.contents_for_bucket(&handle).await.unwrap();
    assert_eq!(members.len(), 3);

    // Round trip: every member is reachable from the directory node and
    // resolves to the bytes that were ingested.
    let links = node.store.read_directory(&directory_id).await.unwrap();
    for (member, payload) in members.iter().zip(payloads.iter()) {
        assert!(links.iter().any(|link| link.id == member.content_id));
        let stored = node.store.get_bytes(&member.content_id).await.unwrap();
        assert_eq!(stored.as_slice(), *payload);
    }

    // The archive is itself addressable and decodes back to the directory
    // root with each block present exactly once.
    let archive = node.store.get_bytes(&archive_id).await.unwrap();
    assert_eq!(archive.len() as i64, bucket.byte_size);
    let (root, blocks) = decode_archive(&archive).unwrap();
    assert_eq!(root, directory_id);
    let mut seen = std::collections::HashSet::new();
    for (id, _) in &blocks {
        assert!(seen.insert(id.clone()), "block {id} appears twice");
    }
}

#[tokio::test]
async fn scenario_b_oversized_upload_splits_into_dedicated_bucket() {
    let node = node(settings(1_000_000, 100, 100)).await;

    let payload: Vec<u8> = (0..500).map(|i| (i % 256) as u8).collect();
    let root = ingest_bytes(&node, "key-b", "backups", "big.bin", None, &payload)
        .await
        .expect("ingest");
    assert!(root.bucket_handle.is_none());

    let bucket = wait_for_one_bucket(&node.meta, BucketStatus::Ready).await;
    assert_eq!(bucket.origin, BucketOrigin::Split);

    let chunks = node.meta.contents_for_bucket(&bucket.handle).await.unwrap();
    assert_eq!(chunks.len(), 5);
    assert_eq!(chunks.iter().map(|c| c.byte_size).sum::<i64>(), 500);

    // Concatenating chunk bytes in creation order reproduces the input.
    let mut reassembled = Vec::new();
    for chunk in &chunks {
        reassembled.extend(node.store.get_bytes(&chunk.content_id).await.unwrap());
    }
    assert_eq!(reassembled, payload);
}

#[tokio::test]
async fn splitter_produces_ceil_l_over_c_chunks() {
    let node = node(settings(1_000_000, 100, 1_000_000)).await;
    node.meta
        .find_or_create_policy("clips", 1_000_000, 100)
        .await
        .unwrap();

    let payload: Vec<u8> = (0..250).map(|i| (i % 127) as u8).collect();
    let (content_id, size) = node.store.add_bytes(&payload).await.unwrap();
    let content = node
        .meta
        .create_content("clip.bin", &content_id, size, "clips", None, "key-s", None)
        .await
        .unwrap();

    SplitJob { content }.run(&node.ctx()).await.expect("split");

    let bucket = wait_for_one_bucket(&node.meta, BucketStatus::Ready).await;
    let chunks = node.meta.contents_for_bucket(&bucket.handle).await.unwrap();
    assert_eq!(chunks.len(), 3); // ceil(250 / 100)
    assert_eq!(
        chunks.iter().map(|c| c.byte_size).collect::<Vec<_>>(),
        vec![100, 100, 50]
    );
    for (ordinal, chunk) in chunks.iter().enumerate() {
        assert!(chunk.name.starts_with(&format!("{ordinal}-split-")));
    }
}

#[tokio::test]
async fn splitter_rejects_bad_chunk_size_and_empty_payload() {
    let node = node(settings(1_000_000, 0, 1_000_000)).await;

    // Non-positive chunk size fails validation before any bucket exists.
    node.meta
        .find_or_create_policy("bad-policy", 1_000_000, 0)
        .await
        .unwrap();
    let (content_id, _) = node.store.add_bytes(b"payload").await.unwrap();
    let content = node
        .meta
        .create_content("x", &content_id, 7, "bad-policy", None, "key", None)
        .await
        .unwrap();
    assert!(SplitJob { content }.run(&node.ctx()).await.is_err());

    // Empty payloads are rejected before bucket creation too.
    node.meta
        .find_or_create_policy("empty", 1_000_000, 100)
        .await
        .unwrap();
    let (empty_id, _) = node.store.add_bytes(&[]).await.unwrap();
    let content = node
        .meta
        .create_content("empty", &empty_id, 0, "empty", None, "key", None)
        .await
        .unwrap();
    assert!(SplitJob { content }.run(&node.ctx()).await.is_err());

    for status in [
        BucketStatus::Open,
        BucketStatus::Processing,
        BucketStatus::Ready,
    ] {
        assert!(
            node.meta
                .list_buckets_by_status(status, 0, 10)
                .await
                .unwrap()
                .is_empty()
        );
    }
}

#[tokio::test]
async fn scenario_c_concurrent_claims_have_one_winner() {
    let node = node(settings(50, 1_000, 1_000_000)).await;
    let policy = node
        .meta
        .find_or_create_policy("race", 50, 1_000)
        .await
        .unwrap();
    let bucket = node
        .meta
        .create_bucket("race", "key-r", policy.id, BucketOrigin::Aggregate)
        .await
        .unwrap();
    let (content_id, size) = node.store.add_bytes(&[9u8; 60]).await.unwrap();
    node.meta
        .create_content("r", &content_id, size, "race", Some(&bucket.handle), "key-r", None)
        .await
        .unwrap();

    let claims = futures::future::join_all(
        (0..8).map(|_| node.meta.claim_for_processing(&bucket.handle)),
    )
    .await;
    let total: u64 = claims.into_iter().map(|c| c.unwrap()).sum();
    assert_eq!(total, 1, "exactly one concurrent claim may win");

    // The winner's archive run completes; the losers did nothing further.
    ArchiveJob {
        bucket_handle: bucket.handle,
    }
    .run(&node.ctx())
    .await
    .expect("archive");
    let bucket = node.meta.find_bucket(&bucket.handle).await.unwrap().unwrap();
    assert_eq!(bucket.status, BucketStatus::Ready);
}

#[tokio::test]
async fn concurrent_aggregate_checks_archive_once() {
    let node = node(settings(50, 1_000, 1_000_000)).await;
    let policy = node
        .meta
        .find_or_create_policy("burst", 50, 1_000)
        .await
        .unwrap();
    let bucket = node
        .meta
        .create_bucket("burst", "key", policy.id, BucketOrigin::Aggregate)
        .await
        .unwrap();
    for i in 0..3u8 {
        let (content_id, size) = node.store.add_bytes(&[i; 30]).await.unwrap();
        node.meta
            .create_content(
                &format!("c{i}"),
                &content_id,
                size,
                "burst",
                Some(&bucket.handle),
                "key",
                None,
            )
            .await
            .unwrap();
    }

    // Several redundant per-event checks converge on the same claim.
    let ctx = node.ctx();
    let checks = (0..4).map(|_| {
        let ctx = ctx.clone();
        let handle = bucket.handle;
        async move { AggregateJob { bucket_handle: handle }.run(&ctx).await }
    });
    for result in futures::future::join_all(checks).await {
        result.expect("aggregate check");
    }

    let ready = wait_for_status(&node.meta, &bucket.handle, BucketStatus::Ready).await;
    assert!(ready.archive_id.is_some());
}

#[tokio::test]
async fn bucket_status_transitions_are_linear() {
    let node = node(settings(1_000, 1_000, 1_000_000)).await;
    let policy = node
        .meta
        .find_or_create_policy("states", 1_000, 1_000)
        .await
        .unwrap();
    let bucket = node
        .meta
        .create_bucket("states", "key", policy.id, BucketOrigin::Aggregate)
        .await
        .unwrap();

    // finalize may not skip the processing state
    assert_eq!(
        node.meta
            .finalize_archive(&bucket.handle, "a", "d", "c", 1, 1)
            .await
            .unwrap(),
        0
    );

    assert_eq!(node.meta.claim_for_processing(&bucket.handle).await.unwrap(), 1);
    // a second claim cannot re-run the transition
    assert_eq!(node.meta.claim_for_processing(&bucket.handle).await.unwrap(), 0);

    assert_eq!(
        node.meta
            .finalize_archive(&bucket.handle, "a", "d", "c", 1, 1)
            .await
            .unwrap(),
        1
    );

    // ready is terminal except for nothing: deletes only apply to
    // open/processing buckets
    assert_eq!(node.meta.mark_deleted(&bucket.handle).await.unwrap(), 0);
    let still_ready = node.meta.find_bucket(&bucket.handle).await.unwrap().unwrap();
    assert_eq!(still_ready.status, BucketStatus::Ready);

    // deleted is terminal
    let doomed = node
        .meta
        .create_bucket("states-2", "key", policy.id, BucketOrigin::Aggregate)
        .await
        .unwrap();
    assert_eq!(node.meta.mark_deleted(&doomed.handle).await.unwrap(), 1);
    assert_eq!(node.meta.claim_for_processing(&doomed.handle).await.unwrap(), 0);
}

#[tokio::test]
async fn upsert_by_object_id_updates_in_place() {
    let node = node(settings(1_000_000, 1_000, 1_000_000)).await;

    let first = ingest_bytes(&node, "key-u", "docs", "v1.txt", Some("doc-1"), b"first version")
        .await
        .unwrap();
    let second = ingest_bytes(&node, "key-u", "docs", "v2.txt", Some("doc-1"), b"second, longer version")
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_ne!(first.content_id, second.content_id);
    assert_eq!(second.name, "v2.txt");

    let rows = node
        .meta
        .find_contents_by_content_id(&second.content_id)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn ingest_validation_rejects_before_mutation() {
    let node = node(settings(1_000_000, 1_000, 1_000_000)).await;

    let err = ingest_bytes(&node, "key", "", "x", None, b"data")
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::EmptyCollectionName));

    let err = ingest_bytes(&node, "key", "things", "x", None, b"")
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::EmptyStream));

    // neither attempt may have produced a content row
    assert_eq!(node.meta.totals().await.unwrap().content_count, 0);
}

#[tokio::test]
async fn capacity_limit_rejects_further_uploads() {
    let mut cfg = settings(1_000_000, 1_000, 1_000_000);
    cfg.capacity_limit_per_key = 10;
    let node = node(cfg).await;

    ingest_bytes(&node, "small-key", "cap", "a", None, &[0u8; 10])
        .await
        .expect("first upload fits");
    let err = ingest_bytes(&node, "small-key", "cap", "b", None, &[0u8; 4])
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::CapacityExceeded(10)));

    // an unrelated key is unaffected
    ingest_bytes(&node, "other-key", "cap", "c", None, &[0u8; 4])
        .await
        .expect("other key still allowed");
}

#[tokio::test]
async fn failed_archive_leaves_bucket_processing() {
    let node = node(settings(50, 1_000, 1_000_000)).await;
    let policy = node
        .meta
        .find_or_create_policy("stuck", 50, 1_000)
        .await
        .unwrap();
    let bucket = node
        .meta
        .create_bucket("stuck", "key", policy.id, BucketOrigin::Aggregate)
        .await
        .unwrap();

    // a member whose block was never stored
    let bogus = format!("55{}", "ab".repeat(32));
    node.meta
        .create_content("ghost", &bogus, 64, "stuck", Some(&bucket.handle), "key", None)
        .await
        .unwrap();
    assert_eq!(node.meta.claim_for_processing(&bucket.handle).await.unwrap(), 1);

    let err = ArchiveJob {
        bucket_handle: bucket.handle,
    }
    .run(&node.ctx())
    .await
    .unwrap_err();
    assert!(err.to_string().contains("not found"));

    let bucket = node.meta.find_bucket(&bucket.handle).await.unwrap().unwrap();
    assert_eq!(bucket.status, BucketStatus::Processing);
    assert!(bucket.archive_id.is_none());
    assert!(bucket.commitment_id.is_none());
}

#[tokio::test]
async fn commitment_fields_are_deterministic_across_identical_buckets() {
    // Two nodes ingesting identical content must produce identical
    // directory identifiers, archives, and commitments.
    let mut results = Vec::new();
    for _ in 0..2 {
        let node = node(settings(20, 1_000, 1_000_000)).await;
        ingest_bytes(&node, "key", "mirror", "same.bin", None, &[7u8; 32])
            .await
            .unwrap();
        let bucket = wait_for_one_bucket(&node.meta, BucketStatus::Ready).await;
        results.push((
            bucket.directory_id.unwrap(),
            bucket.archive_id.unwrap(),
            bucket.commitment_id.unwrap(),
            bucket.padded_piece_size.unwrap(),
        ));
    }
    assert_eq!(results[0], results[1]);
}
