//! Per-file verification settings.
//!
//! The settings fix the tree geometry (`block_size`, `page_size`, `hash_alg`,
//! `salt`), so a file must be verified with exactly the configuration it was
//! sealed with. `enable_multibuffer` and `workqueue_threads` only affect speed.

use serde::{Deserialize, Serialize};

use crate::def::{DEFAULT_BLOCK_SIZE, DEFAULT_PAGE_SIZE};
use crate::utils::hasher::HashAlgorithm;

fn default_workqueue_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Configuration for verifying one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerityConfig {
    /// Merkle tree block size in bytes (default: 4KB)
    pub block_size: usize,
    /// Storage page size in bytes (default: 4KB)
    pub page_size: usize,
    /// Hash algorithm of the tree (default: sha256)
    pub hash_alg: HashAlgorithm,
    /// Salt hashed before every block, up to 32 bytes (default: none)
    #[serde(with = "hex_bytes")]
    pub salt: Vec<u8>,
    /// Whether to hash data blocks two at a time when the algorithm allows it
    pub enable_multibuffer: bool,
    /// Number of threads of the verification work queue
    pub workqueue_threads: usize,
}

impl Default for VerityConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            page_size: DEFAULT_PAGE_SIZE,
            hash_alg: HashAlgorithm::Sha256,
            salt: Vec::new(),
            enable_multibuffer: true,
            workqueue_threads: default_workqueue_threads(),
        }
    }
}

impl VerityConfig {
    /// Creates a new configuration; the work queue size keeps its default.
    ///
    /// # Arguments
    /// * `block_size` - Merkle tree block size in bytes
    /// * `page_size` - Storage page size in bytes
    /// * `hash_alg` - Hash algorithm of the tree
    /// * `salt` - Salt hashed before every block
    pub fn new(block_size: usize, page_size: usize, hash_alg: HashAlgorithm, salt: &[u8]) -> Self {
        Self {
            block_size,
            page_size,
            hash_alg,
            salt: salt.to_vec(),
            ..Default::default()
        }
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_hash_alg(mut self, hash_alg: HashAlgorithm) -> Self {
        self.hash_alg = hash_alg;
        self
    }

    pub fn with_salt(mut self, salt: &[u8]) -> Self {
        self.salt = salt.to_vec();
        self
    }

    pub fn with_multibuffer(mut self, enable: bool) -> Self {
        self.enable_multibuffer = enable;
        self
    }

    pub fn with_workqueue_threads(mut self, threads: usize) -> Self {
        self.workqueue_threads = threads;
        self
    }
}

// Salts are written as hex strings in serialized configs.
mod hex_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(D::Error::custom)
    }
}
