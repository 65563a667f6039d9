use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// One page of Merkle tree content, as held by the page cache.
///
/// A `TreePage` is created every time its bytes are loaded from the backing
/// storage, so its `checked` flag always starts cleared after a (re)load. The
/// verifier uses that flag either as "this page's single tree block is
/// verified" or as "this page has been seen since it was loaded", depending on
/// how many tree blocks fit in a page.
pub struct TreePage {
    index: u64,
    data: Box<[u8]>,
    checked: AtomicBool,
}

impl TreePage {
    pub fn new(index: u64, data: Box<[u8]>) -> Self {
        Self {
            index,
            data,
            checked: AtomicBool::new(false),
        }
    }

    /// Index of this page within the tree.
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Tests the checked flag with acquire ordering: every write made before
    /// the matching [`TreePage::set_checked`] is visible to the caller.
    pub fn is_checked(&self) -> bool {
        self.checked.load(Ordering::Acquire)
    }

    /// Sets the checked flag with release ordering.
    pub fn set_checked(&self) {
        self.checked.store(true, Ordering::Release);
    }
}

impl fmt::Debug for TreePage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreePage")
            .field("index", &self.index)
            .field("len", &self.data.len())
            .field("checked", &self.checked.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_page_is_unchecked() {
        let page = TreePage::new(3, vec![7u8; 16].into_boxed_slice());
        assert_eq!(page.index(), 3);
        assert_eq!(page.len(), 16);
        assert!(!page.is_checked());
        page.set_checked();
        assert!(page.is_checked());
        // setting twice is harmless
        page.set_checked();
        assert!(page.is_checked());
    }
}
