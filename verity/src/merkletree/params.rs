//! Geometry of a file's Merkle tree.
//!
//! The tree is stored as a flat sequence of hash blocks, level-major, with the root
//! level first and level 0 (the level holding the data block digests) last:
//!
//! ```text
//! block:  0            1 .. a            a+1 .. a+b
//!         [level n-1]  [level n-2] ...   [level 0]
//! ```
//!
//! `level_start[level]` is the index of the first hash block of `level` in that
//! sequence. Everything else is derived with shifts and masks: the block size, the
//! digest size and the page size are all powers of two.

use crate::def::{MAX_LEVELS, MAX_SALT_SIZE, MIN_BLOCK_SIZE};
use crate::error::VerityError;
use crate::utils::hasher::{HashAlgorithm, HashState};

/// Immutable geometry of one file's Merkle tree.
#[derive(Clone, Debug)]
pub struct MerkleTreeParams {
    pub hash_alg: HashAlgorithm,
    hash_state: HashState,
    pub digest_size: usize,
    pub block_size: usize,
    pub page_size: usize,
    /// Number of digests per hash block, i.e. the arity of the tree
    pub hashes_per_block: usize,
    /// Number of tree blocks sharing one storage page
    pub blocks_per_page: usize,
    pub log_digestsize: u32,
    pub log_blocksize: u32,
    pub log_arity: u32,
    pub log_pagesize: u32,
    pub log_blocks_per_page: u32,
    /// Number of levels, 0 when the file fits in a single block
    pub num_levels: usize,
    pub level_start: [u64; MAX_LEVELS],
    /// Size of the tree in bytes
    pub tree_size: u64,
    /// Number of storage pages the tree spans
    pub tree_pages: u64,
}

impl MerkleTreeParams {
    /// Computes the geometry of the tree covering `file_size` bytes.
    ///
    /// # Arguments
    /// * `hash_alg` - Algorithm used for every tree and data block
    /// * `salt` - Salt prepended to every hashed block, at most 32 bytes
    /// * `block_size` - Merkle tree block size; a power of two, at least 1KB and
    ///   at most `page_size`
    /// * `page_size` - Storage page size; a power of two
    /// * `file_size` - Logical size of the protected file
    ///
    /// # Returns
    /// The parameters, or `InvalidParams`/`TooManyLevels` for a tree that can't be used
    pub fn new(
        hash_alg: HashAlgorithm,
        salt: &[u8],
        block_size: usize,
        page_size: usize,
        file_size: u64,
    ) -> Result<Self, VerityError> {
        if !page_size.is_power_of_two() {
            return Err(VerityError::InvalidParams(format!(
                "page size {} is not a power of 2",
                page_size
            )));
        }
        if !block_size.is_power_of_two() || block_size < MIN_BLOCK_SIZE || block_size > page_size
        {
            return Err(VerityError::InvalidParams(format!(
                "unsupported block size {} (page size {})",
                block_size, page_size
            )));
        }
        if salt.len() > MAX_SALT_SIZE {
            return Err(VerityError::InvalidParams(format!(
                "salt too long ({} > {})",
                salt.len(),
                MAX_SALT_SIZE
            )));
        }

        let digest_size = hash_alg.digest_size();
        let log_digestsize = digest_size.trailing_zeros();
        let log_blocksize = block_size.trailing_zeros();
        let log_pagesize = page_size.trailing_zeros();
        let hashes_per_block = block_size >> log_digestsize;
        let log_arity = log_blocksize - log_digestsize;
        let log_blocks_per_page = log_pagesize - log_blocksize;

        // Number of hash blocks in each level, level 0 first
        let mut blocks_in_level = [0u64; MAX_LEVELS];
        let mut num_levels = 0;
        let mut blocks = file_size.div_ceil(block_size as u64);
        while blocks > 1 {
            if num_levels >= MAX_LEVELS {
                return Err(VerityError::TooManyLevels);
            }
            blocks = (blocks + hashes_per_block as u64 - 1) >> log_arity;
            blocks_in_level[num_levels] = blocks;
            num_levels += 1;
        }

        // The root level is stored first
        let mut level_start = [0u64; MAX_LEVELS];
        let mut offset = 0u64;
        for level in (0..num_levels).rev() {
            level_start[level] = offset;
            offset += blocks_in_level[level];
        }
        let tree_size = offset << log_blocksize;

        Ok(MerkleTreeParams {
            hash_alg,
            hash_state: HashState::new(hash_alg, salt),
            digest_size,
            block_size,
            page_size,
            hashes_per_block,
            blocks_per_page: 1 << log_blocks_per_page,
            log_digestsize,
            log_blocksize,
            log_arity,
            log_pagesize,
            log_blocks_per_page,
            num_levels,
            level_start,
            tree_size,
            tree_pages: tree_size.div_ceil(page_size as u64),
        })
    }

    pub(crate) fn hash_state(&self) -> &HashState {
        &self.hash_state
    }

    /// Total number of hash blocks in the tree.
    pub fn num_hash_blocks(&self) -> u64 {
        self.tree_size >> self.log_blocksize
    }

    /// Index of the data block containing byte `pos`.
    pub fn data_block_index(&self, pos: u64) -> u64 {
        pos >> self.log_blocksize
    }

    /// Index of a hash block in the whole tree, from its level and its index
    /// within the level.
    pub fn hash_block_index(&self, level: usize, index_in_level: u64) -> u64 {
        self.level_start[level] + index_in_level
    }

    /// Index of the storage page holding hash block `hblock_idx`.
    pub fn hash_page_index(&self, hblock_idx: u64) -> u64 {
        hblock_idx >> self.log_blocks_per_page
    }

    /// Byte offset of hash block `hblock_idx` within its page.
    pub fn hash_block_offset_in_page(&self, hblock_idx: u64) -> usize {
        ((hblock_idx << self.log_blocksize) & (self.page_size as u64 - 1)) as usize
    }

    /// Byte offset, within its hash block, of the digest of node `hidx` of the
    /// level below.
    pub fn hash_offset_in_block(&self, hidx: u64) -> usize {
        ((hidx << self.log_digestsize) & (self.block_size as u64 - 1)) as usize
    }

    /// Whether several tree blocks share a page, so that verification state
    /// must be tracked per block rather than per page.
    pub fn uses_block_bitmap(&self) -> bool {
        self.blocks_per_page > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_mib_file() {
        // 256 data blocks -> 2 level-0 blocks -> 1 root block
        let p = MerkleTreeParams::new(HashAlgorithm::Sha256, &[], 4096, 4096, 1 << 20).unwrap();
        assert_eq!(p.hashes_per_block, 128);
        assert_eq!(p.log_arity, 7);
        assert_eq!(p.num_levels, 2);
        assert_eq!(p.level_start[1], 0);
        assert_eq!(p.level_start[0], 1);
        assert_eq!(p.num_hash_blocks(), 3);
        assert_eq!(p.tree_size, 3 * 4096);
        assert_eq!(p.tree_pages, 3);
        assert!(!p.uses_block_bitmap());

        // leaf 5: level 0 block 0, digest at 5 * 32
        let hidx = p.data_block_index(5 * 4096);
        assert_eq!(hidx, 5);
        let hblock = p.hash_block_index(0, hidx >> p.log_arity);
        assert_eq!(hblock, 1);
        assert_eq!(p.hash_offset_in_block(hidx), 5 * 32);
        // its parent: root block, digest at 0
        let root_block = p.hash_block_index(1, (hidx >> p.log_arity) >> p.log_arity);
        assert_eq!(root_block, 0);
        assert_eq!(p.hash_offset_in_block(hidx >> p.log_arity), 0);

        // leaf 200 lives under level-0 block 1, whose digest is the second in the root
        let hidx = 200u64;
        assert_eq!(p.hash_block_index(0, hidx >> p.log_arity), 2);
        assert_eq!(p.hash_offset_in_block(hidx), (200 - 128) * 32);
        assert_eq!(p.hash_offset_in_block(hidx >> p.log_arity), 32);
    }

    #[test]
    fn test_small_blocks_share_pages() {
        let p = MerkleTreeParams::new(HashAlgorithm::Sha256, &[], 1024, 4096, 1 << 20).unwrap();
        // 1024 data blocks, arity 32: 32 level-0 blocks, 1 root block
        assert_eq!(p.num_levels, 2);
        assert_eq!(p.blocks_per_page, 4);
        assert_eq!(p.log_blocks_per_page, 2);
        assert!(p.uses_block_bitmap());
        assert_eq!(p.num_hash_blocks(), 33);
        assert_eq!(p.tree_pages, 9);
        assert_eq!(p.hash_page_index(5), 1);
        assert_eq!(p.hash_block_offset_in_page(5), 1024);
        assert_eq!(p.hash_block_offset_in_page(32), 0);
    }

    #[test]
    fn test_single_block_and_empty_files() {
        for size in [0u64, 1, 4096] {
            let p = MerkleTreeParams::new(HashAlgorithm::Sha256, &[], 4096, 4096, size).unwrap();
            assert_eq!(p.num_levels, 0, "size {}", size);
            assert_eq!(p.tree_size, 0);
            assert_eq!(p.tree_pages, 0);
        }
        let p = MerkleTreeParams::new(HashAlgorithm::Sha256, &[], 4096, 4096, 4097).unwrap();
        assert_eq!(p.num_levels, 1);
        assert_eq!(p.tree_size, 4096);
    }

    #[test]
    fn test_invalid_params() {
        let alg = HashAlgorithm::Sha256;
        assert!(MerkleTreeParams::new(alg, &[], 3000, 4096, 1).is_err());
        assert!(MerkleTreeParams::new(alg, &[], 512, 4096, 1).is_err());
        assert!(MerkleTreeParams::new(alg, &[], 8192, 4096, 1).is_err());
        assert!(MerkleTreeParams::new(alg, &[], 4096, 5000, 1).is_err());
        assert!(MerkleTreeParams::new(alg, &[0u8; 33], 4096, 4096, 1).is_err());
        assert!(MerkleTreeParams::new(alg, &[0u8; 32], 4096, 4096, 1).is_ok());
    }

    #[test]
    fn test_too_many_levels() {
        // arity 16: 16^8 + 1 data blocks need 9 levels
        let file_size = 1024 * ((1u64 << 32) + 1);
        let res = MerkleTreeParams::new(HashAlgorithm::Sha512, &[], 1024, 4096, file_size);
        assert!(matches!(res, Err(VerityError::TooManyLevels)));

        let res = MerkleTreeParams::new(HashAlgorithm::Sha512, &[], 1024, 4096, 1024 << 32);
        assert_eq!(res.unwrap().num_levels, 8);
    }
}
