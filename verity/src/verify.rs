//! Read-time verification of file data against the file's Merkle tree.
//!
//! # Algorithm
//! To authenticate one data block, [`verify_data_block`] ascends from the leaf
//! toward the root, loading the hash block of each level, until it meets a hash
//! block that is already verified (or runs out of levels, in which case the root
//! hash is the trusted digest). It then descends along the same path, hashing
//! every loaded hash block, comparing it against the digest taken from its
//! verified parent, and marking it verified. Finally the digest found in level 0
//! is compared with the data block's own digest.
//!
//! Repeated reads of nearby data therefore only hash the data itself: the path
//! above it stays verified for as long as its pages stay in memory.
//!
//! # Batching
//! [`VerifyContext`] collects the blocks of one I/O unit. When the hash algorithm
//! allows it, blocks are hashed two at a time; a trailing odd block is hashed on
//! its own by [`VerifyContext::finish`].
//!
//! # Concurrency
//! Any number of threads may verify blocks of the same file at once, including
//! on shared tree paths. Marking a block verified is idempotent, so racing
//! threads at worst hash the same block twice.

use log::warn;
use smallvec::SmallVec;
use std::io;
use std::sync::Arc;
use treefile::{ReadMerkleTreePage, TreePage};

use crate::bio::{Bio, DataPage};
use crate::def::{MAX_LEVELS, READAHEAD_DATA_PAGES_SHIFT};
use crate::error::VerityError;
use crate::info::VerityInfo;
use crate::report::{CorruptionReport, CorruptionSite};
use crate::utils::hasher::{hash_2_blocks, hash_block, DigestBuf, MAX_DIGEST_SIZE};

// A hash block loaded during the ascent, waiting to be checked on the way down.
struct HashBlockRef {
    page: Arc<TreePage>,
    // index of the block in the whole tree
    index: u64,
    offset_in_page: usize,
    // offset of the wanted digest within the block
    hoffset: usize,
}

fn corrupted(
    vi: &VerityInfo,
    pos: u64,
    site: CorruptionSite,
    want: &[u8],
    real: &[u8],
) -> VerityError {
    metrics::counter!("verity.corruptions").increment(1);
    vi.reporter().report_corruption(&CorruptionReport {
        file_id: vi.file_id(),
        pos,
        site,
        hash_alg: vi.params().hash_alg,
        want: want.to_vec(),
        real: real.to_vec(),
    });
    VerityError::Corrupted { pos, site }
}

fn read_tree_page<S: ReadMerkleTreePage + ?Sized>(
    vi: &VerityInfo,
    source: &S,
    index: u64,
    num_ra_pages: u64,
    block_end: usize,
) -> Result<Arc<TreePage>, VerityError> {
    let res = source
        .read_merkle_tree_page(index, num_ra_pages)
        .and_then(|page| {
            if page.len() < block_end {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("page holds {} bytes, need {}", page.len(), block_end),
                ));
            }
            Ok(page)
        });
    res.map_err(|err| {
        metrics::counter!("verity.tree_page_errors").increment(1);
        vi.reporter().report_error(
            vi.file_id(),
            &format!("Error reading Merkle tree page {}: {}", index, err),
        );
        VerityError::TreePageRead { index, source: err }
    })
}

/// Verifies one data block against the Merkle tree.
///
/// # Arguments
/// * `vi` - Verification state of the file
/// * `source` - Where the tree pages come from
/// * `real_hash` - Salted digest of the data block, at least `digest_size` bytes
/// * `data_pos` - Byte position of the data block in the file, block aligned
/// * `max_ra_pages` - Read-ahead hint for the tree page of level 0
///
/// # Returns
/// `Ok(())` if the block is authentic. A mismatch is reported to the file's
/// reporter and returned as `Corrupted`; a failed page read as `TreePageRead`.
/// A `real_hash` shorter than one digest is rejected with `DigestLength`.
pub fn verify_data_block<S: ReadMerkleTreePage + ?Sized>(
    vi: &VerityInfo,
    source: &S,
    real_hash: &[u8],
    data_pos: u64,
    max_ra_pages: u64,
) -> Result<(), VerityError> {
    let params = vi.params();
    let hsize = params.digest_size;
    if real_hash.len() < hsize {
        warn!(
            "file {}: data block digest is {} bytes, need {}",
            vi.file_id(),
            real_hash.len(),
            hsize
        );
        return Err(VerityError::DigestLength {
            expected: hsize,
            actual: real_hash.len(),
        });
    }
    let real_hash = &real_hash[..hsize];

    if data_pos >= vi.file_size() {
        // Blocks fully past EOF are not covered by the tree, but a page that
        // spans EOF is still visible as a whole, so its tail must be zeros.
        if real_hash != vi.zero_block_hash() {
            return Err(corrupted(
                vi,
                data_pos,
                CorruptionSite::PastEof,
                vi.zero_block_hash(),
                real_hash,
            ));
        }
        return Ok(());
    }

    let mut want_hash: DigestBuf = [0u8; MAX_DIGEST_SIZE];
    let mut hblocks: SmallVec<[HashBlockRef; MAX_LEVELS]> = SmallVec::new();
    // index of the previous level's block within that level
    let mut hidx = params.data_block_index(data_pos);
    let mut found_verified = false;

    for level in 0..params.num_levels {
        let next_hidx = hidx >> params.log_arity;
        let hblock_idx = params.hash_block_index(level, next_hidx);
        let hpage_idx = params.hash_page_index(hblock_idx);
        let offset_in_page = params.hash_block_offset_in_page(hblock_idx);
        let hoffset = params.hash_offset_in_block(hidx);
        let num_ra_pages = if level == 0 {
            u64::min(max_ra_pages, params.tree_pages - hpage_idx)
        } else {
            0
        };

        let page = read_tree_page(
            vi,
            source,
            hpage_idx,
            num_ra_pages,
            offset_in_page + params.block_size,
        )?;
        if vi.verified().is_verified(&page, hblock_idx) {
            let start = offset_in_page + hoffset;
            want_hash[..hsize].copy_from_slice(&page.data()[start..start + hsize]);
            found_verified = true;
            break;
        }
        hblocks.push(HashBlockRef {
            page,
            index: hblock_idx,
            offset_in_page,
            hoffset,
        });
        hidx = next_hidx;
    }

    if !found_verified {
        want_hash[..hsize].copy_from_slice(vi.root_hash());
    }

    // Descend, verifying each hash block against its parent's digest. Pages
    // still on the stack are released when it is dropped.
    let mut real_hblock_hash: DigestBuf = [0u8; MAX_DIGEST_SIZE];
    while let Some(hblock) = hblocks.pop() {
        let level = hblocks.len();
        let block = &hblock.page.data()[hblock.offset_in_page..][..params.block_size];
        hash_block(params, block, &mut real_hblock_hash);
        if real_hblock_hash[..hsize] != want_hash[..hsize] {
            return Err(corrupted(
                vi,
                data_pos,
                CorruptionSite::HashBlock { level },
                &want_hash[..hsize],
                &real_hblock_hash[..hsize],
            ));
        }
        vi.verified().mark_verified(&hblock.page, hblock.index);
        metrics::counter!("verity.hash_blocks_verified").increment(1);
        want_hash[..hsize].copy_from_slice(&block[hblock.hoffset..hblock.hoffset + hsize]);
    }

    if want_hash[..hsize] != *real_hash {
        return Err(corrupted(
            vi,
            data_pos,
            CorruptionSite::DataBlock,
            &want_hash[..hsize],
            real_hash,
        ));
    }
    metrics::counter!("verity.blocks_verified").increment(1);
    Ok(())
}

// A data block waiting for a partner to be hashed with.
struct PendingBlock<'a> {
    data: &'a [u8],
    pos: u64,
}

/// Batches the data blocks of one I/O unit.
///
/// A block added while another is pending is hashed together with it. The
/// context borrows the data pages, so it can't outlive them; dropping it
/// without [`VerifyContext::finish`] abandons a pending block.
pub struct VerifyContext<'a, S: ReadMerkleTreePage + ?Sized> {
    vi: &'a VerityInfo,
    source: &'a S,
    max_ra_pages: u64,
    pending: Option<PendingBlock<'a>>,
    hash1: DigestBuf,
    hash2: DigestBuf,
}

impl<'a, S: ReadMerkleTreePage + ?Sized> VerifyContext<'a, S> {
    pub fn new(vi: &'a VerityInfo, source: &'a S, max_ra_pages: u64) -> Self {
        Self {
            vi,
            source,
            max_ra_pages,
            pending: None,
            hash1: [0u8; MAX_DIGEST_SIZE],
            hash2: [0u8; MAX_DIGEST_SIZE],
        }
    }

    pub fn max_ra_pages(&self) -> u64 {
        self.max_ra_pages
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Verifies, or queues for verification, the blocks in `len` bytes of `page`
    /// starting at `offset`.
    ///
    /// `len` and `offset` must be multiples of the block size and the range must
    /// lie within the page, which must not be up to date yet.
    pub fn add_data_blocks(
        &mut self,
        page: DataPage<'a>,
        len: usize,
        offset: usize,
    ) -> Result<(), VerityError> {
        let vi = self.vi;
        let params = vi.params();
        let block_size = params.block_size;
        // file position of the first block, if the whole range is addressable
        let start_pos = page
            .index
            .checked_mul(params.page_size as u64)
            .and_then(|pos| pos.checked_add(offset as u64))
            .filter(|pos| pos.checked_add(len as u64).is_some());
        let in_page = offset
            .checked_add(len)
            .map_or(false, |end| end <= page.data.len());
        let aligned = len != 0 && (len | offset) & (block_size - 1) == 0;
        let start_pos = match start_pos {
            Some(pos) if in_page && aligned => pos,
            _ => {
                warn!(
                    "file {}: bad data range len={} offset={} in page {}",
                    vi.file_id(),
                    len,
                    offset,
                    page.index
                );
                return Err(VerityError::Misaligned {
                    len,
                    offset,
                    block_size,
                });
            }
        };
        if page.uptodate {
            warn!(
                "file {}: data page {} is already up to date",
                vi.file_id(),
                page.index
            );
            return Err(VerityError::AlreadyUptodate { index: page.index });
        }

        let data: &'a [u8] = page.data;
        for (i, block) in data[offset..offset + len]
            .chunks_exact(block_size)
            .enumerate()
        {
            self.add_block(block, start_pos + (i * block_size) as u64)?;
        }
        Ok(())
    }

    fn add_block(&mut self, data: &'a [u8], pos: u64) -> Result<(), VerityError> {
        let vi = self.vi;
        let params = vi.params();
        if !vi.supports_multibuffer() {
            hash_block(params, data, &mut self.hash1);
            return verify_data_block(vi, self.source, &self.hash1, pos, self.max_ra_pages);
        }

        match self.pending.take() {
            Some(pending) => {
                hash_2_blocks(params, pending.data, data, &mut self.hash1, &mut self.hash2);
                metrics::counter!("verity.paired_hashes").increment(1);
                verify_data_block(
                    vi,
                    self.source,
                    &self.hash1,
                    pending.pos,
                    self.max_ra_pages,
                )?;
                verify_data_block(vi, self.source, &self.hash2, pos, self.max_ra_pages)
            }
            None => {
                self.pending = Some(PendingBlock { data, pos });
                Ok(())
            }
        }
    }

    /// Verifies the pending block, if any, on its own.
    pub fn finish(mut self) -> Result<(), VerityError> {
        match self.pending.take() {
            Some(pending) => {
                hash_block(self.vi.params(), pending.data, &mut self.hash1);
                verify_data_block(
                    self.vi,
                    self.source,
                    &self.hash1,
                    pending.pos,
                    self.max_ra_pages,
                )
            }
            None => Ok(()),
        }
    }
}

/// Verifies data that was just read into `page`.
///
/// # Arguments
/// * `vi` - Verification state of the file
/// * `source` - Where the tree pages come from
/// * `page` - The data page; must not be up to date
/// * `len` - Number of bytes to verify, a multiple of the block size
/// * `offset` - Where they start in the page, a multiple of the block size
///
/// # Returns
/// `true` if every block in the range is authentic
pub fn verify_blocks<S: ReadMerkleTreePage + ?Sized>(
    vi: &VerityInfo,
    source: &S,
    page: DataPage<'_>,
    len: usize,
    offset: usize,
) -> bool {
    let mut ctx = VerifyContext::new(vi, source, 0);
    if ctx.add_data_blocks(page, len, offset).is_err() {
        return false;
    }
    ctx.finish().is_ok()
}

/// Verifies a whole data page.
pub fn verify_page<S: ReadMerkleTreePage + ?Sized>(
    vi: &VerityInfo,
    source: &S,
    page: DataPage<'_>,
) -> bool {
    verify_blocks(vi, source, page, page.data.len(), 0)
}

/// Number of level-0 tree pages to read ahead for a completed read.
///
/// A speculative read of N data pages reads up to N/4 tree pages ahead.
pub fn readahead_pages(vi: &VerityInfo, bio: &Bio<'_>) -> u64 {
    if bio.readahead {
        bio.size() >> (vi.params().log_pagesize + READAHEAD_DATA_PAGES_SHIFT)
    } else {
        0
    }
}

/// Verifies every segment of a completed read.
///
/// All segments share one context, so blocks are paired across segment
/// boundaries.
///
/// # Returns
/// `true` if every block of every segment is authentic
pub fn verify_bio<S: ReadMerkleTreePage + ?Sized>(
    vi: &VerityInfo,
    source: &S,
    bio: &Bio<'_>,
) -> bool {
    let mut ctx = VerifyContext::new(vi, source, readahead_pages(vi, bio));
    for bv in bio.vecs.iter() {
        if ctx.add_data_blocks(bv.page, bv.len, bv.offset).is_err() {
            return false;
        }
    }
    ctx.finish().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VerityConfig;
    use crate::test_helper::{sample_data, seal, FailingSource, RecordingReporter};
    use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
    use std::collections::HashMap;

    fn counters(snapshotter: &Snapshotter) -> HashMap<String, u64> {
        snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .filter_map(|(ckey, _, _, value)| match value {
                DebugValue::Counter(n) => Some((ckey.key().name().to_owned(), n)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_verify_all_blocks() {
        let config = VerityConfig::default();
        let data = sample_data(1 << 20, 1);
        let sealed = seal(&config, &data).unwrap();
        let vi = sealed.info(&config, 1).unwrap();
        let tree = sealed.tree_file();

        let mut hash = [0u8; MAX_DIGEST_SIZE];
        for (i, block) in data.chunks(4096).enumerate() {
            hash_block(vi.params(), block, &mut hash);
            verify_data_block(&vi, &tree, &hash, (i * 4096) as u64, 0).unwrap();
        }
        // the two level-0 blocks and the root block
        assert_eq!(tree.load_count(), 3);
    }

    #[test]
    fn test_wrong_leaf_hash() {
        let config = VerityConfig::default();
        let data = sample_data(1 << 20, 2);
        let sealed = seal(&config, &data).unwrap();
        let reporter = Arc::new(RecordingReporter::default());
        let vi = sealed
            .info(&config, 9)
            .unwrap()
            .with_reporter(reporter.clone());
        let tree = sealed.tree_file();

        let mut hash = [0u8; MAX_DIGEST_SIZE];
        hash_block(vi.params(), &data[4096..8192], &mut hash);
        let err = verify_data_block(&vi, &tree, &hash, 0, 0).unwrap_err();
        assert!(matches!(
            err,
            VerityError::Corrupted {
                pos: 0,
                site: CorruptionSite::DataBlock
            }
        ));
        let reports = reporter.corruptions();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].file_id, 9);
        assert_eq!(reports[0].real, hash[..32].to_vec());

        // the path itself was fine and stays verified
        hash_block(vi.params(), &data[..4096], &mut hash);
        verify_data_block(&vi, &tree, &hash, 0, 0).unwrap();
    }

    #[test]
    fn test_single_block_file() {
        let config = VerityConfig::default();
        let data = sample_data(100, 3);
        let sealed = seal(&config, &data).unwrap();
        let vi = sealed.info(&config, 1).unwrap();
        assert_eq!(vi.params().num_levels, 0);
        let tree = sealed.tree_file();

        let mut block = data.clone();
        block.resize(4096, 0);
        let mut hash = [0u8; MAX_DIGEST_SIZE];
        hash_block(vi.params(), &block, &mut hash);
        assert_eq!(&hash[..32], vi.root_hash());
        verify_data_block(&vi, &tree, &hash, 0, 0).unwrap();
        assert_eq!(tree.load_count(), 0);

        block[200] = 1;
        hash_block(vi.params(), &block, &mut hash);
        assert!(verify_data_block(&vi, &tree, &hash, 0, 0).is_err());
    }

    #[test]
    fn test_context_pairs_blocks() {
        let config = VerityConfig::default();
        let data = sample_data(5 * 4096, 4);
        let sealed = seal(&config, &data).unwrap();
        let vi = sealed.info(&config, 1).unwrap();
        let tree = sealed.tree_file();

        let mut ctx = VerifyContext::new(&vi, &tree, 0);
        ctx.add_data_blocks(DataPage::new(0, &data[..4096]), 4096, 0)
            .unwrap();
        assert!(ctx.has_pending());
        ctx.add_data_blocks(DataPage::new(1, &data[4096..8192]), 4096, 0)
            .unwrap();
        assert!(!ctx.has_pending());
        ctx.add_data_blocks(DataPage::new(2, &data[8192..12288]), 4096, 0)
            .unwrap();
        assert!(ctx.has_pending());
        ctx.finish().unwrap();
    }

    #[test]
    fn test_readahead_pages() {
        let config = VerityConfig::default();
        let data = sample_data(1 << 20, 5);
        let sealed = seal(&config, &data).unwrap();
        let vi = sealed.info(&config, 1).unwrap();

        let mut bio = Bio::new(true);
        for i in 0..16u64 {
            let start = i as usize * 4096;
            bio.push(DataPage::new(i, &data[start..start + 4096]), 4096, 0);
        }
        assert_eq!(bio.size(), 16 * 4096);
        assert_eq!(readahead_pages(&vi, &bio), 4);
        bio.readahead = false;
        assert_eq!(readahead_pages(&vi, &bio), 0);
    }

    #[test]
    fn test_counters() {
        let config = VerityConfig::default();
        let data = sample_data(1 << 20, 6);
        let sealed = seal(&config, &data).unwrap();
        let vi = sealed
            .info(&config, 1)
            .unwrap()
            .with_reporter(Arc::new(RecordingReporter::default()));
        let tree = sealed.tree_file();

        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        metrics::with_local_recorder(&recorder, || {
            // blocks 0 and 1 are hashed together; block 0 walks up to the root
            let mut bio = Bio::new(false);
            bio.push(DataPage::new(0, &data[..4096]), 4096, 0);
            bio.push(DataPage::new(1, &data[4096..8192]), 4096, 0);
            assert!(verify_bio(&vi, &tree, &bio));

            let mut bad = data[8192..12288].to_vec();
            bad[0] ^= 1;
            assert!(!verify_page(&vi, &tree, DataPage::new(2, &bad)));

            let failing = FailingSource::new(sealed.tree_file(), 2);
            let far = DataPage::new(200, &data[200 * 4096..201 * 4096]);
            assert!(!verify_page(&vi, &failing, far));
        });

        let c = counters(&snapshotter);
        let get = |name: &str| c.get(name).copied().unwrap_or(0);
        assert_eq!(get("verity.paired_hashes"), 1);
        assert_eq!(get("verity.hash_blocks_verified"), 2);
        assert_eq!(get("verity.blocks_verified"), 2);
        assert_eq!(get("verity.corruptions"), 1);
        assert_eq!(get("verity.tree_page_errors"), 1);
    }
}
