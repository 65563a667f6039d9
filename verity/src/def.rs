//! Core definitions and constants for the verifier.
//!
//! The limits here bound every per-file structure: the number of tree levels bounds
//! the ascend/descend stack, and the digest size bounds the scratch digest buffers.

/// Maximum number of levels in a Merkle tree.
/// With 1 KiB blocks and 64-byte digests this still covers files of 2^42 bytes.
pub const MAX_LEVELS: usize = 8;

/// Smallest supported Merkle tree block size (1KB).
pub const MIN_BLOCK_SIZE: usize = 1024;

/// Default Merkle tree block size (4KB).
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Default storage page size (4KB).
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Maximum salt length in bytes.
pub const MAX_SALT_SIZE: usize = 32;

/// Read-ahead of the first tree level is a quarter of the data pages of a read-ahead I/O.
pub const READAHEAD_DATA_PAGES_SHIFT: u32 = 2;

/// Thread name of the verification work queue.
pub const WORKQUEUE_NAME: &str = "verity_read_queue";
