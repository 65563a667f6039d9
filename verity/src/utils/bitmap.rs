use std::sync::atomic::{AtomicUsize, Ordering};

/// Fixed-size bitmap whose bits are set and cleared with atomic operations.
///
/// All operations use relaxed ordering; callers that need bit updates to be
/// published together with something else order them with their own
/// acquire/release pair.
pub struct AtomicBitmap {
    chunks: Vec<AtomicUsize>,
    size: usize,
}

impl AtomicBitmap {
    pub fn new(size: usize) -> Self {
        let bits_per_chunk = usize::BITS as usize;
        let chunk_count = size.div_ceil(bits_per_chunk);
        let mut chunks = Vec::with_capacity(chunk_count);
        for _ in 0..chunk_count {
            chunks.push(AtomicUsize::new(0));
        }

        Self { chunks, size }
    }

    fn locate(&self, index: usize) -> (usize, usize) {
        let bits_per_chunk = usize::BITS as usize;
        assert!(index < self.size, "bit {} out of range {}", index, self.size);
        (index / bits_per_chunk, 1usize << (index % bits_per_chunk))
    }

    pub fn is_set(&self, index: usize) -> bool {
        let (chunk_index, mask) = self.locate(index);
        self.chunks[chunk_index].load(Ordering::Relaxed) & mask != 0
    }

    pub fn set(&self, index: usize) {
        let (chunk_index, mask) = self.locate(index);
        self.chunks[chunk_index].fetch_or(mask, Ordering::Relaxed);
    }

    pub fn clear(&self, index: usize) {
        let (chunk_index, mask) = self.locate(index);
        self.chunks[chunk_index].fetch_and(!mask, Ordering::Relaxed);
    }

    /// Clears `count` bits starting at `start`; bits past the end are ignored.
    pub fn clear_range(&self, start: usize, count: usize) {
        let end = usize::min(start.saturating_add(count), self.size);
        for index in start..end {
            self.clear(index);
        }
    }

    pub fn count_ones(&self) -> usize {
        self.chunks
            .iter()
            .map(|c| c.load(Ordering::Relaxed).count_ones() as usize)
            .sum()
    }

    pub fn capacity(&self) -> usize {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_clear() {
        let bm = AtomicBitmap::new(130);
        assert_eq!(bm.capacity(), 130);
        assert!(!bm.is_set(0));
        bm.set(0);
        bm.set(64);
        bm.set(129);
        assert!(bm.is_set(0));
        assert!(bm.is_set(64));
        assert!(bm.is_set(129));
        assert!(!bm.is_set(63));
        assert_eq!(bm.count_ones(), 3);

        bm.set(64);
        assert_eq!(bm.count_ones(), 3);
        bm.clear(64);
        assert!(!bm.is_set(64));
        bm.clear(64);
        assert_eq!(bm.count_ones(), 2);
    }

    #[test]
    fn test_clear_range() {
        let bm = AtomicBitmap::new(16);
        for i in 0..16 {
            bm.set(i);
        }
        bm.clear_range(4, 4);
        for i in 0..16 {
            assert_eq!(bm.is_set(i), !(4..8).contains(&i), "bit {}", i);
        }
        bm.clear_range(12, 100);
        assert_eq!(bm.count_ones(), 8);
    }

    #[test]
    #[should_panic]
    fn test_out_of_range() {
        let bm = AtomicBitmap::new(8);
        bm.set(8);
    }

    #[test]
    fn test_concurrent_set() {
        let bm = AtomicBitmap::new(1024);
        std::thread::scope(|s| {
            for t in 0..4 {
                let bm = &bm;
                s.spawn(move || {
                    for i in (t..1024).step_by(4) {
                        bm.set(i);
                    }
                });
            }
        });
        assert_eq!(bm.count_ones(), 1024);
    }
}
