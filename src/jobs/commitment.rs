//! Commitment digest over an archive stream.
//!
//! The digest is the root of a binary SHA-256 Merkle tree over fixed-size
//! leaves: the final partial leaf is zero-padded, and the leaf count is
//! rounded up to the next power of two with all-zero leaves. The padded
//! piece size reported alongside the digest is the smallest leaf-aligned
//! size the tree shape corresponds to. The tree construction stands in for
//! the external proof system's primitive; the pipeline only depends on the
//! contract — determinism, full consumption of the input, fixed-size
//! output.

use sha2::{Digest, Sha256};

/// Leaf width the commitment scheme aligns input to.
pub const LEAF_SIZE: u64 = 64 * 1024;

/// Result of committing to one archive stream.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Commitment {
    pub digest: [u8; 32],
    pub padded_piece_size: u64,
}

impl Commitment {
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest)
    }
}

/// Incremental calculator; feed the archive bytes in any chunking, then
/// finalize. Identical input bytes produce the identical commitment
/// regardless of how they were chunked.
pub struct CommitmentCalculator {
    leaves: Vec<[u8; 32]>,
    window: Vec<u8>,
}

impl Default for CommitmentCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl CommitmentCalculator {
    pub fn new() -> Self {
        Self {
            leaves: Vec::new(),
            window: Vec::with_capacity(LEAF_SIZE as usize),
        }
    }

    pub fn update(&mut self, mut bytes: &[u8]) {
        while !bytes.is_empty() {
            let take = (LEAF_SIZE as usize - self.window.len()).min(bytes.len());
            self.window.extend_from_slice(&bytes[..take]);
            bytes = &bytes[take..];
            if self.window.len() == LEAF_SIZE as usize {
                self.leaves.push(Sha256::digest(&self.window).into());
                self.window.clear();
            }
        }
    }

    pub fn finalize(mut self) -> Commitment {
        if !self.window.is_empty() {
            self.window.resize(LEAF_SIZE as usize, 0);
            self.leaves.push(Sha256::digest(&self.window).into());
        }

        let width = self.leaves.len().max(1).next_power_of_two();
        if self.leaves.len() < width {
            let zero_leaf: [u8; 32] = Sha256::digest(vec![0u8; LEAF_SIZE as usize]).into();
            self.leaves.resize(width, zero_leaf);
        }

        let mut layer = self.leaves;
        while layer.len() > 1 {
            layer = layer
                .chunks(2)
                .map(|pair| {
                    let mut hasher = Sha256::new();
                    hasher.update(pair[0]);
                    hasher.update(pair[1]);
                    hasher.finalize().into()
                })
                .collect();
        }

        Commitment {
            digest: layer[0],
            padded_piece_size: width as u64 * LEAF_SIZE,
        }
    }
}

/// One-shot commitment over a complete in-memory archive.
pub fn commit_to(bytes: &[u8]) -> Commitment {
    let mut calc = CommitmentCalculator::new();
    calc.update(bytes);
    calc.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_input_yields_identical_commitment() {
        let payload: Vec<u8> = (0..200_000).map(|i| (i % 256) as u8).collect();
        let a = commit_to(&payload);
        let b = commit_to(&payload);
        assert_eq!(a, b);
    }

    #[test]
    fn chunking_does_not_change_the_commitment() {
        let payload: Vec<u8> = (0..150_000).map(|i| (i % 73) as u8).collect();
        let whole = commit_to(&payload);

        let mut calc = CommitmentCalculator::new();
        for piece in payload.chunks(777) {
            calc.update(piece);
        }
        assert_eq!(calc.finalize(), whole);
    }

    #[test]
    fn different_input_yields_different_digest() {
        let a = commit_to(b"archive one");
        let b = commit_to(b"archive two");
        assert_ne!(a.digest, b.digest);
    }

    #[test]
    fn padded_size_is_smallest_aligned_power_of_two_cover() {
        assert_eq!(commit_to(&[1u8; 1]).padded_piece_size, LEAF_SIZE);
        assert_eq!(
            commit_to(&vec![1u8; LEAF_SIZE as usize]).padded_piece_size,
            LEAF_SIZE
        );
        assert_eq!(
            commit_to(&vec![1u8; LEAF_SIZE as usize + 1]).padded_piece_size,
            2 * LEAF_SIZE
        );
        assert_eq!(
            commit_to(&vec![1u8; 3 * LEAF_SIZE as usize]).padded_piece_size,
            4 * LEAF_SIZE
        );
    }

    #[test]
    fn empty_input_still_commits_deterministically() {
        let a = commit_to(&[]);
        let b = commit_to(&[]);
        assert_eq!(a, b);
        assert_eq!(a.padded_piece_size, LEAF_SIZE);
    }
}
