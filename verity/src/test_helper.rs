//! Helpers for tests and demos: building ("sealing") Merkle trees, plus page
//! sources and reporters that record or inject what the verifier sees.

use parking_lot::Mutex;
use std::io;
use std::path::Path;
use std::sync::Arc;
use treefile::{MemFile, ReadMerkleTreePage, TreeFile, TreePage};

use crate::bio::DataPage;
use crate::config::VerityConfig;
use crate::error::VerityError;
use crate::info::VerityInfo;
use crate::merkletree::MerkleTreeParams;
use crate::report::{CorruptionReport, Reporter};
use crate::utils::hasher::{hash_block, MAX_DIGEST_SIZE};

/// A file's Merkle tree and root hash, laid out the way the verifier reads them.
pub struct SealedFile {
    pub tree: Vec<u8>,
    pub root_hash: Vec<u8>,
    pub params: MerkleTreeParams,
    pub file_size: u64,
}

impl SealedFile {
    pub fn info(&self, config: &VerityConfig, file_id: u64) -> Result<VerityInfo, VerityError> {
        VerityInfo::new(config, file_id, self.file_size, &self.root_hash)
    }

    /// An in-memory page cache over the tree.
    pub fn tree_file(&self) -> TreeFile<MemFile> {
        TreeFile::from_bytes(self.tree.clone(), self.params.page_size)
            .expect("page size was validated by the params")
    }

    pub fn write_tree<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        std::fs::write(path, &self.tree)
    }
}

/// Builds the Merkle tree of `data`.
///
/// Level 0 holds the digests of the data blocks, the last one zero-padded.
/// Every level is zero-padded to whole blocks, and the root hash is the
/// digest of the single block of the top level. A file of one block has no
/// tree; its root hash is the digest of that block. An empty file has an
/// all-zero root hash.
pub fn seal(config: &VerityConfig, data: &[u8]) -> Result<SealedFile, VerityError> {
    let params = MerkleTreeParams::new(
        config.hash_alg,
        &config.salt,
        config.block_size,
        config.page_size,
        data.len() as u64,
    )?;
    let bs = params.block_size;
    let ds = params.digest_size;
    let mut digest = [0u8; MAX_DIGEST_SIZE];

    if params.num_levels == 0 {
        let root_hash = if data.is_empty() {
            vec![0u8; ds]
        } else {
            let mut block = data.to_vec();
            block.resize(bs, 0);
            hash_block(&params, &block, &mut digest);
            digest[..ds].to_vec()
        };
        return Ok(SealedFile {
            tree: Vec::new(),
            root_hash,
            params,
            file_size: data.len() as u64,
        });
    }

    let mut tree = vec![0u8; params.tree_size as usize];
    let mut block = vec![0u8; bs];
    // bytes of the level below, starting with the data
    let mut below: Vec<u8> = data.to_vec();
    for level in 0..params.num_levels {
        let start = (params.level_start[level] as usize) * bs;
        let mut out = start;
        for chunk in below.chunks(bs) {
            block[..chunk.len()].copy_from_slice(chunk);
            block[chunk.len()..].fill(0);
            hash_block(&params, &block, &mut digest);
            tree[out..out + ds].copy_from_slice(&digest[..ds]);
            out += ds;
        }
        let end = out.next_multiple_of(bs);
        below = tree[start..end].to_vec();
    }
    debug_assert_eq!(below.len(), bs);
    hash_block(&params, &below, &mut digest);

    Ok(SealedFile {
        tree,
        root_hash: digest[..ds].to_vec(),
        params,
        file_size: data.len() as u64,
    })
}

/// Deterministic pseudo-random bytes.
pub fn sample_data(len: usize, seed: u64) -> Vec<u8> {
    let mut x = seed.wrapping_mul(0x9e37_79b9_7f4a_7c15) | 1;
    (0..len)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            (x >> 24) as u8
        })
        .collect()
}

/// Splits `data` into data pages, the last one zero-padded.
pub fn data_pages(data: &[u8], page_size: usize) -> Vec<Vec<u8>> {
    data.chunks(page_size)
        .map(|chunk| {
            let mut page = chunk.to_vec();
            page.resize(page_size, 0);
            page
        })
        .collect()
}

/// Borrows the pages from [`data_pages`] as not-yet-uptodate `DataPage`s.
pub fn as_data_pages(pages: &[Vec<u8>]) -> Vec<DataPage<'_>> {
    pages
        .iter()
        .enumerate()
        .map(|(i, p)| DataPage::new(i as u64, p))
        .collect()
}

/// Keeps every report for later inspection.
#[derive(Default)]
pub struct RecordingReporter {
    corruptions: Mutex<Vec<CorruptionReport>>,
    errors: Mutex<Vec<String>>,
}

impl RecordingReporter {
    pub fn corruptions(&self) -> Vec<CorruptionReport> {
        self.corruptions.lock().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }
}

impl Reporter for RecordingReporter {
    fn report_corruption(&self, report: &CorruptionReport) {
        self.corruptions.lock().push(report.clone());
    }

    fn report_error(&self, _file_id: u64, message: &str) {
        self.errors.lock().push(message.to_string());
    }
}

/// Records the arguments of every page request before forwarding it.
pub struct RecordingSource<S> {
    inner: S,
    calls: Mutex<Vec<(u64, u64)>>,
}

impl<S: ReadMerkleTreePage> RecordingSource<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// `(index, num_ra_pages)` of each request, in order.
    pub fn calls(&self) -> Vec<(u64, u64)> {
        self.calls.lock().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: ReadMerkleTreePage> ReadMerkleTreePage for RecordingSource<S> {
    fn read_merkle_tree_page(&self, index: u64, num_ra_pages: u64) -> io::Result<Arc<TreePage>> {
        self.calls.lock().push((index, num_ra_pages));
        self.inner.read_merkle_tree_page(index, num_ra_pages)
    }
}

/// Fails every request for one page.
pub struct FailingSource<S> {
    inner: S,
    fail_page: u64,
}

impl<S: ReadMerkleTreePage> FailingSource<S> {
    pub fn new(inner: S, fail_page: u64) -> Self {
        Self { inner, fail_page }
    }
}

impl<S: ReadMerkleTreePage> ReadMerkleTreePage for FailingSource<S> {
    fn read_merkle_tree_page(&self, index: u64, num_ra_pages: u64) -> io::Result<Arc<TreePage>> {
        if index == self.fail_page {
            return Err(io::Error::other(format!("injected failure on page {}", index)));
        }
        self.inner.read_merkle_tree_page(index, num_ra_pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::hasher::{hash_buffer, HashAlgorithm};

    #[test]
    fn test_seal_layout() {
        let config = VerityConfig::default();
        let data = sample_data(1 << 20, 1);
        let sealed = seal(&config, &data).unwrap();
        assert_eq!(sealed.tree.len(), 3 * 4096);

        // level 0 block 0 (tree block 1) starts with the digest of data block 0
        let leaf0 = hash_buffer(HashAlgorithm::Sha256, &data[..4096]);
        assert_eq!(&sealed.tree[4096..4096 + 32], &leaf0[..]);
        // the root block holds the digests of the two level-0 blocks
        let l0b1 = hash_buffer(HashAlgorithm::Sha256, &sealed.tree[8192..]);
        assert_eq!(&sealed.tree[32..64], &l0b1[..]);
        assert!(sealed.tree[64..4096].iter().all(|b| *b == 0));
        assert_eq!(
            sealed.root_hash,
            hash_buffer(HashAlgorithm::Sha256, &sealed.tree[..4096])
        );
    }

    #[test]
    fn test_seal_degenerate_files() {
        let config = VerityConfig::default();
        let sealed = seal(&config, &[]).unwrap();
        assert_eq!(sealed.root_hash, vec![0u8; 32]);
        assert!(sealed.tree.is_empty());

        let sealed = seal(&config, &[1, 2, 3]).unwrap();
        let mut block = vec![1u8, 2, 3];
        block.resize(4096, 0);
        assert_eq!(sealed.root_hash, hash_buffer(HashAlgorithm::Sha256, &block));
    }

    #[test]
    fn test_sample_data() {
        assert_eq!(sample_data(64, 3), sample_data(64, 3));
        assert_ne!(sample_data(64, 3), sample_data(64, 4));
        let pages = data_pages(&sample_data(5000, 1), 4096);
        assert_eq!(pages.len(), 2);
        assert!(pages[1][5000 - 4096..].iter().all(|b| *b == 0));
    }
}
