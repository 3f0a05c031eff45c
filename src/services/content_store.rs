//! src/services/content_store.rs
//!
//! ContentStore — local content-addressed block store with a small
//! Merkle-DAG layer on top. Payloads are stored as fixed-size leaf blocks
//! addressed by SHA-256; multi-block payloads get a file node listing their
//! leaves, and buckets get a directory node mapping display names to
//! content identifiers. Blocks live on disk sharded beneath
//! `root/blocks/{shard}/{shard}/{id}`.

use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    collections::HashSet,
    io::{self, ErrorKind},
    path::PathBuf,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

/// Window size for leaf blocks produced from an ingested stream.
pub const BLOCK_SIZE: usize = 256 * 1024;

/// Multicodec tag for a raw leaf block.
const CODEC_RAW: u8 = 0x55;
/// Multicodec tag for an encoded DAG node (file or directory).
const CODEC_DAG: u8 = 0x70;

const ARCHIVE_MAGIC: &[u8; 4] = b"EARC";
const ARCHIVE_VERSION: u8 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("block `{0}` not found")]
    NotFound(String),
    #[error("`{0}` is not a valid content identifier")]
    InvalidIdentifier(String),
    #[error("block `{id}` failed digest verification")]
    DigestMismatch { id: String },
    #[error("`{0}` does not name a file payload")]
    NotAFile(String),
    #[error("`{0}` does not name a directory node")]
    NotADirectory(String),
    #[error("malformed archive stream: {0}")]
    ArchiveFormat(String),
    #[error(transparent)]
    Node(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Codec of a stored block, recovered from the identifier's leading byte.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Codec {
    Raw,
    Dag,
}

impl Codec {
    fn tag(self) -> u8 {
        match self {
            Self::Raw => CODEC_RAW,
            Self::Dag => CODEC_DAG,
        }
    }
}

/// Kind discriminator for encoded DAG nodes.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Directory,
}

/// A named, sized edge from a DAG node to another block.
///
/// File nodes leave `name` empty; directory nodes use the child's display
/// name.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct DagLink {
    pub name: String,
    pub id: String,
    pub size: i64,
}

/// An encoded file or directory node.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DagNode {
    pub kind: NodeKind,
    pub size: i64,
    pub links: Vec<DagLink>,
}

/// ContentStore provides the collaborator capabilities the pipeline
/// consumes:
/// - add a byte stream and receive its content identifier
/// - fetch a payload or node back by identifier
/// - build a directory node from name→identifier children
/// - export one archive stream covering a root and everything reachable
///   from it, each block exactly once
///
/// Re-adding identical bytes is idempotent: the write is skipped when the
/// addressed block already exists.
#[derive(Clone, Debug)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    /// Open (and if needed create) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("blocks")).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    /// Derive the identifier for `bytes` under `codec`.
    fn identifier(codec: Codec, bytes: &[u8]) -> String {
        let digest = Sha256::digest(bytes);
        let mut id = Vec::with_capacity(33);
        id.push(codec.tag());
        id.extend_from_slice(&digest);
        hex::encode(id)
    }

    /// Recover the codec from an identifier, validating its shape.
    pub fn codec_of(id: &str) -> StoreResult<Codec> {
        let bytes =
            hex::decode(id).map_err(|_| StoreError::InvalidIdentifier(id.to_string()))?;
        if bytes.len() != 33 {
            return Err(StoreError::InvalidIdentifier(id.to_string()));
        }
        match bytes[0] {
            CODEC_RAW => Ok(Codec::Raw),
            CODEC_DAG => Ok(Codec::Dag),
            _ => Err(StoreError::InvalidIdentifier(id.to_string())),
        }
    }

    /// Physical path of a block, sharded two levels deep by identifier
    /// prefix to keep per-directory file counts small.
    fn block_path(&self, id: &str) -> PathBuf {
        let mut path = self.root.join("blocks");
        path.push(&id[0..2]);
        path.push(&id[2..4]);
        path.push(id);
        path
    }

    /// Store one block, returning its identifier.
    ///
    /// Writes go through a temp file and an atomic rename; if the block
    /// already exists the write is skipped entirely.
    async fn put_block(&self, codec: Codec, bytes: &[u8]) -> StoreResult<String> {
        let id = Self::identifier(codec, bytes);
        let path = self.block_path(&id);
        if fs::try_exists(&path).await? {
            debug!(%id, "block already present, skipping write");
            return Ok(id);
        }

        let parent = path.parent().map(PathBuf::from).ok_or_else(|| {
            StoreError::Io(io::Error::new(
                ErrorKind::Other,
                "block path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;
        if let Err(err) = file.write_all(bytes).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }
        match fs::rename(&tmp_path, &path).await {
            Ok(_) => {}
            // A concurrent writer produced the same content-addressed
            // block; either copy is equally valid.
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                let _ = fs::remove_file(&tmp_path).await;
            }
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err.into());
            }
        }
        Ok(id)
    }

    /// Read one block back, verifying it still matches its identifier.
    pub async fn get_block(&self, id: &str) -> StoreResult<Vec<u8>> {
        let codec = Self::codec_of(id)?;
        let path = self.block_path(id);
        let bytes = fs::read(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StoreError::NotFound(id.to_string())
            } else {
                StoreError::Io(err)
            }
        })?;
        if Self::identifier(codec, &bytes) != id {
            return Err(StoreError::DigestMismatch { id: id.to_string() });
        }
        Ok(bytes)
    }

    /// Whether a block for `id` is present on disk.
    pub async fn has_block(&self, id: &str) -> StoreResult<bool> {
        Self::codec_of(id)?;
        Ok(fs::try_exists(self.block_path(id)).await?)
    }

    /// Consume a byte stream into leaf blocks and return the payload's
    /// content identifier plus its total length.
    ///
    /// Single-block payloads are addressed directly by their leaf; larger
    /// payloads get a file node listing the leaves in order.
    pub async fn add_stream<S>(&self, stream: S) -> StoreResult<(String, i64)>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let mut leaves: Vec<DagLink> = Vec::new();
        let mut window: Vec<u8> = Vec::with_capacity(BLOCK_SIZE);
        let mut total: i64 = 0;

        pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            let mut rest = &chunk[..];
            while !rest.is_empty() {
                let take = (BLOCK_SIZE - window.len()).min(rest.len());
                window.extend_from_slice(&rest[..take]);
                rest = &rest[take..];
                if window.len() == BLOCK_SIZE {
                    self.flush_leaf(&mut leaves, &mut window, &mut total).await?;
                }
            }
        }
        if !window.is_empty() {
            self.flush_leaf(&mut leaves, &mut window, &mut total).await?;
        }

        match leaves.len() {
            0 => {
                let id = self.put_block(Codec::Raw, &[]).await?;
                Ok((id, 0))
            }
            1 => Ok((leaves[0].id.clone(), total)),
            _ => {
                let node = DagNode {
                    kind: NodeKind::File,
                    size: total,
                    links: leaves,
                };
                let id = self.put_block(Codec::Dag, &serde_json::to_vec(&node)?).await?;
                Ok((id, total))
            }
        }
    }

    async fn flush_leaf(
        &self,
        leaves: &mut Vec<DagLink>,
        window: &mut Vec<u8>,
        total: &mut i64,
    ) -> StoreResult<()> {
        let id = self.put_block(Codec::Raw, window).await?;
        leaves.push(DagLink {
            name: String::new(),
            id,
            size: window.len() as i64,
        });
        *total += window.len() as i64;
        window.clear();
        Ok(())
    }

    /// Convenience wrapper around [`Self::add_stream`] for in-memory bytes.
    pub async fn add_bytes(&self, bytes: &[u8]) -> StoreResult<(String, i64)> {
        let owned = Bytes::copy_from_slice(bytes);
        self.add_stream(futures::stream::iter([Ok(owned)])).await
    }

    /// Decode a DAG node block.
    pub async fn read_node(&self, id: &str) -> StoreResult<DagNode> {
        if Self::codec_of(id)? != Codec::Dag {
            return Err(StoreError::InvalidIdentifier(id.to_string()));
        }
        Ok(serde_json::from_slice(&self.get_block(id).await?)?)
    }

    /// Resolve an identifier to its ordered leaf blocks and total length.
    async fn leaf_blocks(&self, id: &str) -> StoreResult<(i64, Vec<String>)> {
        match Self::codec_of(id)? {
            Codec::Raw => {
                let path = self.block_path(id);
                let meta = fs::metadata(&path).await.map_err(|err| {
                    if err.kind() == ErrorKind::NotFound {
                        StoreError::NotFound(id.to_string())
                    } else {
                        StoreError::Io(err)
                    }
                })?;
                Ok((meta.len() as i64, vec![id.to_string()]))
            }
            Codec::Dag => {
                let node = self.read_node(id).await?;
                match node.kind {
                    NodeKind::File => Ok((
                        node.size,
                        node.links.into_iter().map(|l| l.id).collect(),
                    )),
                    NodeKind::Directory => Err(StoreError::NotAFile(id.to_string())),
                }
            }
        }
    }

    /// Fetch the complete payload for an identifier.
    ///
    /// Directory identifiers resolve to their encoded node bytes, which is
    /// what the gateway serves for a directory listing.
    pub async fn get_bytes(&self, id: &str) -> StoreResult<Vec<u8>> {
        if Self::codec_of(id)? == Codec::Dag {
            let node = self.read_node(id).await?;
            if node.kind == NodeKind::Directory {
                return Ok(self.get_block(id).await?);
            }
        }
        let (total, blocks) = self.leaf_blocks(id).await?;
        let mut out = Vec::with_capacity(total.max(0) as usize);
        for block in blocks {
            out.extend_from_slice(&self.get_block(&block).await?);
        }
        Ok(out)
    }

    /// Streaming variant of [`Self::get_bytes`] for the gateway read path.
    ///
    /// Returns the payload length and a block-by-block byte stream.
    pub async fn reader(
        &self,
        id: &str,
    ) -> StoreResult<(i64, impl Stream<Item = io::Result<Bytes>> + Send + 'static)> {
        let (total, blocks) = self.leaf_blocks(id).await?;
        let store = self.clone();
        let stream = futures::stream::iter(blocks).then(move |block| {
            let store = store.clone();
            async move {
                store
                    .get_block(&block)
                    .await
                    .map(Bytes::from)
                    .map_err(|err| io::Error::new(ErrorKind::Other, err))
            }
        });
        Ok((total, stream))
    }

    /// Build and store a directory node from name→identifier children.
    ///
    /// Children are sorted by name so identical member sets always produce
    /// the identical directory identifier.
    pub async fn build_directory(&self, mut children: Vec<DagLink>) -> StoreResult<String> {
        children.sort_by(|a, b| a.name.cmp(&b.name));
        let node = DagNode {
            kind: NodeKind::Directory,
            size: children.iter().map(|l| l.size).sum(),
            links: children,
        };
        self.put_block(Codec::Dag, &serde_json::to_vec(&node)?).await
    }

    /// Read a directory node's children.
    pub async fn read_directory(&self, id: &str) -> StoreResult<Vec<DagLink>> {
        let node = self.read_node(id).await?;
        match node.kind {
            NodeKind::Directory => Ok(node.links),
            NodeKind::File => Err(StoreError::NotADirectory(id.to_string())),
        }
    }

    /// Serialize `root` and every block reachable from it into one archive
    /// stream. Traversal is depth-first in link order and each block is
    /// written exactly once, however many links point at it.
    pub async fn export_archive(&self, root: &str) -> StoreResult<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(ARCHIVE_MAGIC);
        out.push(ARCHIVE_VERSION);
        write_frame(&mut out, root.as_bytes());

        let mut stack = vec![root.to_string()];
        let mut visited: HashSet<String> = HashSet::new();
        while let Some(id) = stack.pop() {
            if !visited.insert(id.clone()) {
                continue;
            }
            let bytes = self.get_block(&id).await?;
            write_frame(&mut out, id.as_bytes());
            write_frame(&mut out, &bytes);
            if Self::codec_of(&id)? == Codec::Dag {
                let node: DagNode = serde_json::from_slice(&bytes)?;
                for link in node.links.into_iter().rev() {
                    stack.push(link.id);
                }
            }
        }
        Ok(out)
    }
}

fn write_frame(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

fn read_frame<'a>(input: &mut &'a [u8]) -> StoreResult<&'a [u8]> {
    if input.len() < 4 {
        return Err(StoreError::ArchiveFormat("truncated frame length".into()));
    }
    let len = u32::from_be_bytes([input[0], input[1], input[2], input[3]]) as usize;
    let rest = &input[4..];
    if rest.len() < len {
        return Err(StoreError::ArchiveFormat("truncated frame body".into()));
    }
    let (frame, rest) = rest.split_at(len);
    *input = rest;
    Ok(frame)
}

/// Parse an archive stream back into its root identifier and block list,
/// in the order they were written.
pub fn decode_archive(mut input: &[u8]) -> StoreResult<(String, Vec<(String, Vec<u8>)>)> {
    if input.len() < 5 || &input[0..4] != ARCHIVE_MAGIC {
        return Err(StoreError::ArchiveFormat("bad magic".into()));
    }
    if input[4] != ARCHIVE_VERSION {
        return Err(StoreError::ArchiveFormat(format!(
            "unsupported version {}",
            input[4]
        )));
    }
    input = &input[5..];
    let root = String::from_utf8(read_frame(&mut input)?.to_vec())
        .map_err(|_| StoreError::ArchiveFormat("non-utf8 root identifier".into()))?;
    let mut blocks = Vec::new();
    while !input.is_empty() {
        let id = String::from_utf8(read_frame(&mut input)?.to_vec())
            .map_err(|_| StoreError::ArchiveFormat("non-utf8 block identifier".into()))?;
        let data = read_frame(&mut input)?.to_vec();
        blocks.push((id, data));
    }
    Ok((root, blocks))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_store() -> (tempfile::TempDir, ContentStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ContentStore::open(dir.path()).await.expect("open store");
        (dir, store)
    }

    #[tokio::test]
    async fn add_and_get_round_trip() {
        let (_dir, store) = temp_store().await;
        let payload = b"hello content store".to_vec();
        let (id, size) = store.add_bytes(&payload).await.unwrap();
        assert_eq!(size, payload.len() as i64);
        assert_eq!(store.get_bytes(&id).await.unwrap(), payload);
    }

    #[tokio::test]
    async fn large_payload_spans_multiple_blocks() {
        let (_dir, store) = temp_store().await;
        let payload: Vec<u8> = (0..BLOCK_SIZE * 2 + 17).map(|i| (i % 251) as u8).collect();
        let (id, size) = store.add_bytes(&payload).await.unwrap();
        assert_eq!(size, payload.len() as i64);
        assert_eq!(ContentStore::codec_of(&id).unwrap(), Codec::Dag);
        assert_eq!(store.get_bytes(&id).await.unwrap(), payload);
    }

    #[tokio::test]
    async fn adding_identical_bytes_is_idempotent() {
        let (_dir, store) = temp_store().await;
        let (a, _) = store.add_bytes(b"same bytes").await.unwrap();
        let (b, _) = store.add_bytes(b"same bytes").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn directory_identifier_is_order_independent() {
        let (_dir, store) = temp_store().await;
        let (id_a, _) = store.add_bytes(b"aaa").await.unwrap();
        let (id_b, _) = store.add_bytes(b"bbb").await.unwrap();
        let forward = vec![
            DagLink { name: "a".into(), id: id_a.clone(), size: 3 },
            DagLink { name: "b".into(), id: id_b.clone(), size: 3 },
        ];
        let backward = vec![
            DagLink { name: "b".into(), id: id_b, size: 3 },
            DagLink { name: "a".into(), id: id_a, size: 3 },
        ];
        let d1 = store.build_directory(forward).await.unwrap();
        let d2 = store.build_directory(backward).await.unwrap();
        assert_eq!(d1, d2);
    }

    #[tokio::test]
    async fn archive_visits_shared_blocks_once() {
        let (_dir, store) = temp_store().await;
        let (id, _) = store.add_bytes(b"shared payload").await.unwrap();
        let dir_id = store
            .build_directory(vec![
                DagLink { name: "one".into(), id: id.clone(), size: 14 },
                DagLink { name: "two".into(), id: id.clone(), size: 14 },
            ])
            .await
            .unwrap();
        let archive = store.export_archive(&dir_id).await.unwrap();
        let (root, blocks) = decode_archive(&archive).unwrap();
        assert_eq!(root, dir_id);
        let occurrences = blocks.iter().filter(|(bid, _)| *bid == id).count();
        assert_eq!(occurrences, 1);
    }
}
