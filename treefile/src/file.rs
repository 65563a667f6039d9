use parking_lot::RwLock;
use std::io;

use crate::ReadAt;

/// An in-memory file holding Merkle tree bytes.
///
/// Besides serving reads, it can be written in place, which makes it handy for
/// simulating tampering with the backing storage underneath a [`crate::TreeFile`].
#[derive(Debug, Default)]
pub struct MemFile {
    data: RwLock<Vec<u8>>,
}

impl MemFile {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Returns the file size in bytes.
    pub fn len(&self) -> u64 {
        self.data.read().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Overwrites bytes at `offset`, growing the file if needed.
    pub fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        let offset = usize::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset too large"))?;
        let mut data = self.data.write();
        let end = offset + buf.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[offset..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    /// Flips one bit, addressed by its bit position from the start of the file.
    pub fn flip_bit(&self, bit: u64) -> io::Result<()> {
        let mut data = self.data.write();
        let byte = (bit / 8) as usize;
        if byte >= data.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("bit {} is beyond the end of file ({} bytes)", bit, data.len()),
            ));
        }
        data[byte] ^= 1u8 << (bit % 8);
        Ok(())
    }

    /// Returns a copy of the current content.
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl ReadAt for MemFile {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let data = self.data.read();
        if offset >= data.len() as u64 {
            return Ok(0);
        }
        let start = offset as usize;
        let n = usize::min(buf.len(), data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write() {
        let f = MemFile::new(vec![1, 2, 3, 4]);
        let mut buf = [0u8; 8];
        assert_eq!(f.read_at(&mut buf, 1).unwrap(), 3);
        assert_eq!(&buf[..3], &[2, 3, 4]);
        assert_eq!(f.read_at(&mut buf, 4).unwrap(), 0);

        f.write_at(&[9, 9], 3).unwrap();
        assert_eq!(f.len(), 5);
        assert_eq!(f.snapshot(), vec![1, 2, 3, 9, 9]);
    }

    #[test]
    fn test_flip_bit() {
        let f = MemFile::new(vec![0u8; 2]);
        f.flip_bit(9).unwrap();
        assert_eq!(f.snapshot(), vec![0, 2]);
        f.flip_bit(9).unwrap();
        assert_eq!(f.snapshot(), vec![0, 0]);
        assert!(f.flip_bit(16).is_err());
    }
}
