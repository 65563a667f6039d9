use std::fmt;
use std::sync::Arc;

use crate::config::VerityConfig;
use crate::error::VerityError;
use crate::merkletree::{MerkleTreeParams, VerifiedCache};
use crate::report::{LogReporter, Reporter};
use crate::utils::hasher::{hash_block, DigestBuf, MAX_DIGEST_SIZE};

/// Verification state of one verity-enabled file.
///
/// Built once when the file is opened for verification and shared, read-only,
/// by every reader of the file. The only mutable part is the verified-state
/// cache, which is updated with atomic operations.
pub struct VerityInfo {
    file_id: u64,
    file_size: u64,
    params: MerkleTreeParams,
    root_hash: DigestBuf,
    zero_block_hash: DigestBuf,
    verified: VerifiedCache,
    supports_multibuffer: bool,
    reporter: Arc<dyn Reporter>,
}

impl VerityInfo {
    /// Builds the verification state of a file.
    ///
    /// # Arguments
    /// * `config` - Tree configuration the file was sealed with
    /// * `file_id` - Identifies the file in reports
    /// * `file_size` - Logical size of the file
    /// * `root_hash` - Trusted root digest, exactly one digest long
    ///
    /// # Returns
    /// The state, or an error when the geometry or the root hash is unusable
    pub fn new(
        config: &VerityConfig,
        file_id: u64,
        file_size: u64,
        root_hash: &[u8],
    ) -> Result<Self, VerityError> {
        let params = MerkleTreeParams::new(
            config.hash_alg,
            &config.salt,
            config.block_size,
            config.page_size,
            file_size,
        )?;
        if root_hash.len() != params.digest_size {
            return Err(VerityError::InvalidRootHash {
                expected: params.digest_size,
                actual: root_hash.len(),
            });
        }

        let mut root = [0u8; MAX_DIGEST_SIZE];
        root[..root_hash.len()].copy_from_slice(root_hash);
        let mut zero_block_hash = [0u8; MAX_DIGEST_SIZE];
        hash_block(
            &params,
            &vec![0u8; params.block_size],
            &mut zero_block_hash,
        );

        Ok(VerityInfo {
            file_id,
            file_size,
            verified: VerifiedCache::new(&params),
            supports_multibuffer: config.enable_multibuffer
                && config.hash_alg.supports_multibuffer(),
            params,
            root_hash: root,
            zero_block_hash,
            reporter: Arc::new(LogReporter),
        })
    }

    /// Replaces the default log reporter.
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn file_id(&self) -> u64 {
        self.file_id
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn params(&self) -> &MerkleTreeParams {
        &self.params
    }

    pub fn root_hash(&self) -> &[u8] {
        &self.root_hash[..self.params.digest_size]
    }

    pub fn zero_block_hash(&self) -> &[u8] {
        &self.zero_block_hash[..self.params.digest_size]
    }

    pub fn verified(&self) -> &VerifiedCache {
        &self.verified
    }

    pub fn supports_multibuffer(&self) -> bool {
        self.supports_multibuffer
    }

    pub fn reporter(&self) -> &dyn Reporter {
        self.reporter.as_ref()
    }
}

impl fmt::Debug for VerityInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerityInfo")
            .field("file_id", &self.file_id)
            .field("file_size", &self.file_size)
            .field("hash_alg", &self.params.hash_alg)
            .field("block_size", &self.params.block_size)
            .field("num_levels", &self.params.num_levels)
            .field("root_hash", &hex::encode(self.root_hash()))
            .field("bitmap", &self.verified.uses_bitmap())
            .field("multibuffer", &self.supports_multibuffer)
            .finish()
    }
}
