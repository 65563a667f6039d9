//! # Merkle tree page storage
//!
//! A Merkle tree used for read-time authentication lives in untrusted storage next to
//! the data it protects. The verifier never reads that storage directly: it asks a
//! page cache for one page of tree content at a time, and the page cache decides when
//! to hit the storage, how much to read ahead, and when to drop pages again.
//!
//! This crate provides both sides of that contract:
//!
//! - [`ReadMerkleTreePage`] is what the verifier consumes. Given a page index in the
//!   tree and an advisory read-ahead count, it returns a shared [`TreePage`].
//! - [`TreeFile`] is a page cache over any [`ReadAt`] backing (an OS file, or a
//!   [`MemFile`]). Pages are loaded on demand, optionally together with the following
//!   pages, and may be evicted at any time when nobody is using them.
//!
//! Every load creates a new [`TreePage`] whose `checked` flag is cleared. That is the
//! only freshness signal the verifier relies on to stop trusting verification state
//! that belonged to a previous incarnation of the page.
//!
//! A `TreeFile` can serve many reader threads. Two threads racing to load the same
//! page always end up sharing the same `TreePage`.

pub mod file;
pub mod page;

pub use file::MemFile;
pub use page::TreePage;

use anyhow::{anyhow, Result};
use auto_impl::auto_impl;
use dashmap::DashMap;
use log::debug;
use std::{
    fs::File,
    io,
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
    sync::Arc,
};

/// A trait for reading at a given offset without affecting any cursor position
#[auto_impl(&, Arc)]
pub trait ReadAt {
    /// Reads a number of bytes starting from a given offset.
    ///
    /// Returns the number of bytes read. Like `File::read`, a short read is not an
    /// error; zero means the offset is at or past the end.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;
}

#[cfg(unix)]
impl ReadAt for File {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(self, buf, offset)
    }
}

#[cfg(windows)]
impl ReadAt for File {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_read(self, buf, offset)
    }
}

/// Source of Merkle tree pages for the verifier.
#[auto_impl(&, Arc)]
pub trait ReadMerkleTreePage: Send + Sync {
    /// Returns the tree page with index `index`, loading it if needed.
    ///
    /// `num_ra_pages` is a hint: when the page has to be loaded, up to that many
    /// following pages may be loaded along with it. The call may block on I/O.
    fn read_merkle_tree_page(&self, index: u64, num_ra_pages: u64) -> io::Result<Arc<TreePage>>;
}

/// Page cache over a Merkle tree stored in a [`ReadAt`] backing.
#[derive(Debug)]
pub struct TreeFile<R: ReadAt> {
    backing: R,
    tree_size: u64,
    page_size: usize,
    pages: DashMap<u64, Arc<TreePage>>,
    loads: AtomicU64,
}

impl TreeFile<File> {
    /// Opens a tree stored in an OS file. The whole file is the tree.
    pub fn open<P: AsRef<Path>>(path: P, page_size: usize) -> Result<Self> {
        let file = File::options().read(true).open(path.as_ref())?;
        let tree_size = file.metadata()?.len();
        Self::new(file, tree_size, page_size)
    }
}

impl TreeFile<MemFile> {
    /// Creates a tree held entirely in memory.
    pub fn from_bytes(tree: Vec<u8>, page_size: usize) -> Result<Self> {
        let tree_size = tree.len() as u64;
        Self::new(MemFile::new(tree), tree_size, page_size)
    }
}

impl<R: ReadAt> TreeFile<R> {
    /// Create a `TreeFile` over `backing`, whose first `tree_size` bytes are the tree.
    ///
    /// # Returns
    ///
    /// A `Result` which is:
    ///
    /// - `Ok`: A successfully initialized `TreeFile`
    /// - `Err`: `page_size` is zero or not a power of two
    ///
    pub fn new(backing: R, tree_size: u64, page_size: usize) -> Result<Self> {
        if page_size == 0 || !page_size.is_power_of_two() {
            return Err(anyhow!("Invalid page size:{}", page_size));
        }
        Ok(TreeFile {
            backing,
            tree_size,
            page_size,
            pages: DashMap::new(),
            loads: AtomicU64::new(0),
        })
    }

    pub fn backing(&self) -> &R {
        &self.backing
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Size of the tree in bytes
    pub fn tree_size(&self) -> u64 {
        self.tree_size
    }

    /// Number of pages spanned by the tree; the last one may be partially filled
    pub fn page_count(&self) -> u64 {
        self.tree_size.div_ceil(self.page_size as u64)
    }

    pub fn is_cached(&self, index: u64) -> bool {
        self.pages.contains_key(&index)
    }

    pub fn cached_pages(&self) -> usize {
        self.pages.len()
    }

    /// Number of pages loaded from the backing so far, read-ahead included
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::SeqCst)
    }

    /// Drops the cached page `index`, unless somebody still holds it.
    ///
    /// Returns whether the page was evicted. A later access loads a new `TreePage`
    /// from the backing, with its checked flag cleared.
    pub fn evict(&self, index: u64) -> bool {
        let evicted = self
            .pages
            .remove_if(&index, |_, page| Arc::strong_count(page) == 1)
            .is_some();
        if evicted {
            debug!("evicted Merkle tree page {}", index);
        }
        evicted
    }

    /// Drops every cached page nobody holds. Returns the number of evicted pages.
    pub fn evict_all(&self) -> usize {
        let before = self.pages.len();
        self.pages.retain(|_, page| Arc::strong_count(page) > 1);
        let evicted = before.saturating_sub(self.pages.len());
        debug!("evicted {} Merkle tree pages", evicted);
        evicted
    }

    /// Returns the cached page `index`, loading it (plus up to `num_ra_pages`
    /// following pages) on a miss.
    pub fn read_page(&self, index: u64, num_ra_pages: u64) -> io::Result<Arc<TreePage>> {
        if let Some(page) = self.pages.get(&index) {
            return Ok(page.value().clone());
        }
        self.load_pages(index, num_ra_pages)
    }

    fn load_pages(&self, index: u64, num_ra_pages: u64) -> io::Result<Arc<TreePage>> {
        let page_count = self.page_count();
        if index >= page_count {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "Merkle tree page {} out of range, tree has {} pages",
                    index, page_count
                ),
            ));
        }
        let last = u64::min(index.saturating_add(num_ra_pages), page_count - 1);
        let count = (last - index + 1) as usize;
        let mut buf = vec![0u8; count * self.page_size];
        self.read_range(&mut buf, index * self.page_size as u64)?;

        let mut wanted = None;
        for (i, chunk) in buf.chunks_exact(self.page_size).enumerate() {
            let idx = index + i as u64;
            let page = self
                .pages
                .entry(idx)
                .or_insert_with(|| {
                    self.loads.fetch_add(1, Ordering::SeqCst);
                    Arc::new(TreePage::new(idx, chunk.into()))
                })
                .value()
                .clone();
            if i == 0 {
                wanted = Some(page);
            }
        }
        debug!(
            "loaded Merkle tree pages {}..={} (read-ahead {})",
            index, last, num_ra_pages
        );
        wanted.ok_or_else(|| io::Error::other("no page loaded"))
    }

    // Fill `buf` from `offset`; bytes past the end of the tree stay zero.
    fn read_range(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        let end = u64::min(offset + buf.len() as u64, self.tree_size);
        if end <= offset {
            return Ok(());
        }
        let want = (end - offset) as usize;
        let mut has_read_size = 0usize;
        while has_read_size < want {
            let n = self.backing.read_at(
                &mut buf[has_read_size..want],
                offset + has_read_size as u64,
            )?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "Short read at {}: expected {}, got {}",
                        offset,
                        want,
                        has_read_size
                    ),
                ));
            }
            has_read_size += n;
        }
        Ok(())
    }
}

impl<R: ReadAt + Send + Sync> ReadMerkleTreePage for TreeFile<R> {
    fn read_merkle_tree_page(&self, index: u64, num_ra_pages: u64) -> io::Result<Arc<TreePage>> {
        self.read_page(index, num_ra_pages)
    }
}
