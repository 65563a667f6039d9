//! Hashing utilities for Merkle tree and data blocks.
//!
//! This module provides the SHA-2 based hashing used by the verifier:
//! - Salted hashing of a single tree or data block
//! - Paired (two-lane) hashing of two data blocks in one call
//! - Plain hashing of arbitrary buffers
//!
//! When a salt is configured, it is zero-padded to a multiple of the algorithm's
//! internal block size and hashed before every block. The padded-salt state is
//! computed once per file ([`HashState`]) and cloned for each block.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use strum::{Display, EnumString};

use crate::merkletree::params::MerkleTreeParams;

/// Largest digest size of any supported algorithm.
pub const MAX_DIGEST_SIZE: usize = 64;

/// Scratch buffer large enough for any supported digest.
/// Only the first `digest_size` bytes are meaningful.
pub type DigestBuf = [u8; MAX_DIGEST_SIZE];

/// Bytes fed to each lane per step of [`hash_2_blocks`].
const LANE_CHUNK: usize = 256;

/// Hash algorithms a Merkle tree can be built with.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    /// Size of the digest in bytes.
    pub fn digest_size(&self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha512 => 64,
        }
    }

    /// Size of the algorithm's internal compression block in bytes.
    pub fn block_size(&self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 64,
            HashAlgorithm::Sha512 => 128,
        }
    }

    /// Whether [`hash_2_blocks`] is worth using for this algorithm.
    pub fn supports_multibuffer(&self) -> bool {
        matches!(self, HashAlgorithm::Sha256)
    }
}

/// Hash state with the padded salt (if any) already absorbed.
#[derive(Clone)]
pub enum HashState {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl HashState {
    pub fn new(alg: HashAlgorithm, salt: &[u8]) -> Self {
        let mut state = match alg {
            HashAlgorithm::Sha256 => HashState::Sha256(Sha256::new()),
            HashAlgorithm::Sha512 => HashState::Sha512(Sha512::new()),
        };
        if !salt.is_empty() {
            let mut padded = vec![0u8; salt.len().next_multiple_of(alg.block_size())];
            padded[..salt.len()].copy_from_slice(salt);
            state.update(&padded);
        }
        state
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        match self {
            HashState::Sha256(_) => HashAlgorithm::Sha256,
            HashState::Sha512(_) => HashAlgorithm::Sha512,
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            HashState::Sha256(h) => h.update(data),
            HashState::Sha512(h) => h.update(data),
        }
    }

    /// Writes the digest into the front of `out`.
    fn finalize_into(self, out: &mut [u8]) {
        match self {
            HashState::Sha256(h) => out[..32].copy_from_slice(&h.finalize()),
            HashState::Sha512(h) => out[..64].copy_from_slice(&h.finalize()),
        }
    }
}

impl fmt::Debug for HashState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HashState({})", self.algorithm())
    }
}

/// Computes the salted digest of one Merkle tree or data block.
///
/// # Arguments
/// * `params` - Tree parameters; provide the algorithm, salt and block size
/// * `data` - The block, exactly `params.block_size` bytes
/// * `out` - Receives the digest in its first `params.digest_size` bytes
pub fn hash_block(params: &MerkleTreeParams, data: &[u8], out: &mut [u8]) {
    debug_assert_eq!(data.len(), params.block_size);
    let mut state = params.hash_state().clone();
    state.update(data);
    state.finalize_into(out);
}

/// Computes the salted digests of two blocks in one call.
///
/// Both lanes advance in lock-step over the two inputs, which is how a
/// multibuffer primitive consumes them. The results are identical to two
/// [`hash_block`] calls. This never goes wider than two blocks.
///
/// # Arguments
/// * `params` - Tree parameters
/// * `data1`, `data2` - The blocks, each `params.block_size` bytes
/// * `out1`, `out2` - Receive the digests of `data1` and `data2`
pub fn hash_2_blocks(
    params: &MerkleTreeParams,
    data1: &[u8],
    data2: &[u8],
    out1: &mut [u8],
    out2: &mut [u8],
) {
    debug_assert_eq!(data1.len(), params.block_size);
    debug_assert_eq!(data2.len(), params.block_size);
    let mut lane1 = params.hash_state().clone();
    let mut lane2 = params.hash_state().clone();
    for (chunk1, chunk2) in data1.chunks(LANE_CHUNK).zip(data2.chunks(LANE_CHUNK)) {
        lane1.update(chunk1);
        lane2.update(chunk2);
    }
    lane1.finalize_into(out1);
    lane2.finalize_into(out2);
}

/// Computes the unsalted digest of an arbitrary buffer.
pub fn hash_buffer<T: AsRef<[u8]>>(alg: HashAlgorithm, data: T) -> Vec<u8> {
    let mut state = HashState::new(alg, &[]);
    state.update(data.as_ref());
    let mut out = [0u8; MAX_DIGEST_SIZE];
    state.finalize_into(&mut out);
    out[..alg.digest_size()].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn params(alg: HashAlgorithm, salt: &[u8]) -> MerkleTreeParams {
        MerkleTreeParams::new(alg, salt, 1024, 4096, 1 << 20).unwrap()
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!(HashAlgorithm::Sha256.to_string(), "sha256");
        assert_eq!(
            HashAlgorithm::from_str("sha512").unwrap(),
            HashAlgorithm::Sha512
        );
        assert!(HashAlgorithm::from_str("md5").is_err());
        assert!(HashAlgorithm::Sha256.supports_multibuffer());
        assert!(!HashAlgorithm::Sha512.supports_multibuffer());
    }

    #[test]
    fn test_hash_buffer() {
        assert_eq!(
            hex::encode(hash_buffer(HashAlgorithm::Sha256, "hello")),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(hash_buffer(HashAlgorithm::Sha512, "hello").len(), 64);
    }

    #[test]
    fn test_unsalted_block_matches_plain_hash() {
        let p = params(HashAlgorithm::Sha256, &[]);
        let block = vec![0x5au8; 1024];
        let mut out = [0u8; MAX_DIGEST_SIZE];
        hash_block(&p, &block, &mut out);
        assert_eq!(&out[..32], &hash_buffer(HashAlgorithm::Sha256, &block)[..]);
    }

    #[test]
    fn test_salt_is_padded() {
        let salt = [1u8, 2, 3];
        let p = params(HashAlgorithm::Sha256, &salt);
        let block = vec![7u8; 1024];
        let mut out = [0u8; MAX_DIGEST_SIZE];
        hash_block(&p, &block, &mut out);

        let mut expected_input = vec![0u8; 64];
        expected_input[..3].copy_from_slice(&salt);
        expected_input.extend_from_slice(&block);
        assert_eq!(
            &out[..32],
            &hash_buffer(HashAlgorithm::Sha256, &expected_input)[..]
        );
    }

    #[test]
    fn test_hash_2_blocks_matches_single() {
        for alg in [HashAlgorithm::Sha256, HashAlgorithm::Sha512] {
            let p = params(alg, b"salty");
            let a: Vec<u8> = (0..1024).map(|i| (i % 253) as u8).collect();
            let b: Vec<u8> = (0..1024).map(|i| (i % 127) as u8).collect();
            let (mut ha, mut hb) = ([0u8; MAX_DIGEST_SIZE], [0u8; MAX_DIGEST_SIZE]);
            hash_2_blocks(&p, &a, &b, &mut ha, &mut hb);

            let mut single = [0u8; MAX_DIGEST_SIZE];
            hash_block(&p, &a, &mut single);
            assert_eq!(ha, single);
            hash_block(&p, &b, &mut single);
            assert_eq!(hb, single);
        }
    }
}
