use std::sync::atomic::{fence, Ordering};
use treefile::TreePage;

use crate::merkletree::params::MerkleTreeParams;
use crate::utils::bitmap::AtomicBitmap;

/// Records which Merkle tree blocks are known to be authentic while their page
/// stays in memory.
///
/// When a page holds exactly one tree block, the page's own checked flag is the
/// record. Otherwise every tree block gets a bit, and the page's checked flag
/// only tells whether the page has been seen since it was loaded.
pub enum VerifiedCache {
    PageChecked,
    Bitmap {
        bits: AtomicBitmap,
        blocks_per_page: usize,
    },
}

impl VerifiedCache {
    pub fn new(params: &MerkleTreeParams) -> Self {
        if params.uses_block_bitmap() {
            VerifiedCache::Bitmap {
                bits: AtomicBitmap::new(params.num_hash_blocks() as usize),
                blocks_per_page: params.blocks_per_page,
            }
        } else {
            VerifiedCache::PageChecked
        }
    }

    /// Returns whether tree block `hblock_idx`, stored in `page`, is verified.
    pub fn is_verified(&self, page: &TreePage, hblock_idx: u64) -> bool {
        let (bits, blocks_per_page) = match self {
            VerifiedCache::PageChecked => return page.is_checked(),
            VerifiedCache::Bitmap {
                bits,
                blocks_per_page,
            } => (bits, *blocks_per_page),
        };

        // The acquire load pairs with the release store below: once the page is
        // seen as checked, the clearing of its stale bits is visible too.
        if page.is_checked() {
            return bits.is_set(hblock_idx as usize);
        }

        // First access since the page was loaded. Bits left over from an
        // earlier incarnation of the page must not be trusted.
        let first = hblock_idx as usize & !(blocks_per_page - 1);
        bits.clear_range(first, blocks_per_page);
        page.set_checked();
        false
    }

    /// Marks tree block `hblock_idx`, stored in `page`, as verified.
    ///
    /// Concurrent marks of the same block are harmless.
    pub fn mark_verified(&self, page: &TreePage, hblock_idx: u64) {
        match self {
            VerifiedCache::PageChecked => page.set_checked(),
            VerifiedCache::Bitmap { bits, .. } => {
                // keep the bit behind the hash comparison that justified it
                fence(Ordering::Release);
                bits.set(hblock_idx as usize);
            }
        }
    }

    pub fn uses_bitmap(&self) -> bool {
        matches!(self, VerifiedCache::Bitmap { .. })
    }

    /// Number of verified bits; always 0 in page mode.
    pub fn verified_blocks(&self) -> usize {
        match self {
            VerifiedCache::PageChecked => 0,
            VerifiedCache::Bitmap { bits, .. } => bits.count_ones(),
        }
    }
}
