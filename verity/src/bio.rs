//! Data units handed to the verifier by the read path.
//!
//! A [`DataPage`] is one page of file data that was just read from storage. A
//! [`Bio`] is a completed multi-segment read: a list of ranges, each inside one
//! data page.

/// One page of file data, as read from untrusted storage.
#[derive(Debug, Clone, Copy)]
pub struct DataPage<'a> {
    /// Index of the page within the file
    pub index: u64,
    pub data: &'a [u8],
    /// Whether the page is already trusted; such pages must not be verified again
    pub uptodate: bool,
}

impl<'a> DataPage<'a> {
    pub fn new(index: u64, data: &'a [u8]) -> Self {
        Self {
            index,
            data,
            uptodate: false,
        }
    }
}

/// A byte range within one data page.
#[derive(Debug, Clone, Copy)]
pub struct BioVec<'a> {
    pub page: DataPage<'a>,
    pub len: usize,
    pub offset: usize,
}

/// A completed read made of several page ranges.
#[derive(Debug, Clone, Default)]
pub struct Bio<'a> {
    pub vecs: Vec<BioVec<'a>>,
    /// Set for speculative reads; enables tree page read-ahead
    pub readahead: bool,
}

impl<'a> Bio<'a> {
    pub fn new(readahead: bool) -> Self {
        Self {
            vecs: Vec::new(),
            readahead,
        }
    }

    pub fn push(&mut self, page: DataPage<'a>, len: usize, offset: usize) {
        self.vecs.push(BioVec { page, len, offset });
    }

    /// Total number of bytes covered.
    pub fn size(&self) -> u64 {
        self.vecs.iter().map(|v| v.len as u64).sum()
    }
}
