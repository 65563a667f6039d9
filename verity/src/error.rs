use std::io;
use thiserror::Error;

use crate::report::CorruptionSite;

/// Errors reported by the verifier.
///
/// Every error is terminal for the read that triggered it: nothing here is
/// retried or repaired.
#[derive(Error, Debug)]
pub enum VerityError {
    #[error("Invalid Merkle tree parameters: {0}")]
    InvalidParams(String),

    #[error("Too many levels in Merkle tree")]
    TooManyLevels,

    #[error("Root hash is {actual} bytes, expected {expected}")]
    InvalidRootHash { expected: usize, actual: usize },

    #[error("Error reading Merkle tree page {index}: {source}")]
    TreePageRead {
        index: u64,
        #[source]
        source: io::Error,
    },

    #[error("File corrupted at pos {pos} ({site})")]
    Corrupted { pos: u64, site: CorruptionSite },

    #[error("Data range len {len} offset {offset} is empty, out of the page, or not aligned to block size {block_size}")]
    Misaligned {
        len: usize,
        offset: usize,
        block_size: usize,
    },

    #[error("Data block digest is {actual} bytes, expected at least {expected}")]
    DigestLength { expected: usize, actual: usize },

    #[error("Data page {index} is already up to date")]
    AlreadyUptodate { index: u64 },

    #[error("Verification work queue is not initialized")]
    WorkqueueNotInitialized,

    #[error("Verification work queue is already initialized")]
    WorkqueueAlreadyInitialized,
}

impl VerityError {
    /// Whether this error means the data or tree failed authentication,
    /// as opposed to an I/O or usage problem.
    pub fn is_corruption(&self) -> bool {
        matches!(self, VerityError::Corrupted { .. })
    }
}
