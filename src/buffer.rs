//! Growable byte buffer used for pending input and codec scratch space.
//!
//! All growth goes through `try_reserve` so that allocation failure surfaces
//! as [`Error::OutOfMemory`](crate::Error::OutOfMemory) instead of aborting.

use crate::error::Result;

/// Growable contiguous byte store.
///
/// Capacity is retained across [`reset`](Self::reset) calls, so a buffer that
/// is reused per frame stops allocating once it has seen the largest frame.
#[derive(Debug, Default)]
pub struct ByteBuffer {
    data: Vec<u8>,
}

impl ByteBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Create an empty buffer with at least `capacity` bytes reserved.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let mut buffer = Self::new();
        buffer.reserve(capacity)?;
        Ok(buffer)
    }

    /// Ensure capacity is at least `capacity` bytes.
    ///
    /// Growth doubles the current capacity or rounds up to `capacity`,
    /// whichever is larger.
    pub fn reserve(&mut self, capacity: usize) -> Result<()> {
        let current = self.data.capacity();
        if capacity <= current {
            return Ok(());
        }
        let target = capacity.max(current.saturating_mul(2));
        self.data.try_reserve(target - self.data.len())?;
        Ok(())
    }

    /// Set the logical size to `size` bytes.
    ///
    /// Growth zero-fills the new bytes; shrinking keeps the capacity.
    pub fn resize(&mut self, size: usize) -> Result<()> {
        self.reserve(size)?;
        self.data.resize(size, 0);
        Ok(())
    }

    /// Append `data` to the end of the buffer.
    pub fn push(&mut self, data: &[u8]) -> Result<()> {
        self.reserve(self.data.len() + data.len())?;
        self.data.extend_from_slice(data);
        Ok(())
    }

    /// Size back to zero, capacity retained.
    pub fn reset(&mut self) {
        self.data.clear();
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Take the contents as an owned `Vec`, leaving the buffer empty.
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }
}

impl std::io::Write for ByteBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.push(buf)
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::OutOfMemory, "buffer allocation failed"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_with_capacity() {
        let buffer = ByteBuffer::with_capacity(5).unwrap();
        assert!(buffer.capacity() >= 5);
        assert_eq!(buffer.len(), 0);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_push() {
        let mut buffer = ByteBuffer::new();
        buffer.push(&[0, 1, 2, 3, 4]).unwrap();
        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.as_slice(), &[0, 1, 2, 3, 4]);

        buffer.push(&[5, 6]).unwrap();
        assert_eq!(buffer.as_slice(), &[0, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_reserve_grows_capacity() {
        let mut buffer = ByteBuffer::new();
        buffer.reserve(6).unwrap();
        assert!(buffer.capacity() >= 6);
        assert_eq!(buffer.len(), 0);

        // Reserving less than current capacity is a no-op
        let capacity = buffer.capacity();
        buffer.reserve(1).unwrap();
        assert_eq!(buffer.capacity(), capacity);
    }

    #[test]
    fn test_resize_zero_fills() {
        let mut buffer = ByteBuffer::new();
        buffer.push(&[0, 1, 2, 3, 4]).unwrap();

        buffer.resize(10).unwrap();
        assert_eq!(buffer.len(), 10);
        assert_eq!(buffer.as_slice(), &[0, 1, 2, 3, 4, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_resize_shrink_keeps_prefix() {
        let mut buffer = ByteBuffer::new();
        buffer.push(&[0, 1, 2, 3, 4]).unwrap();
        let capacity = buffer.capacity();

        buffer.resize(3).unwrap();
        assert_eq!(buffer.as_slice(), &[0, 1, 2]);
        assert_eq!(buffer.capacity(), capacity);
    }

    #[test]
    fn test_reset_retains_capacity() {
        let mut buffer = ByteBuffer::new();
        buffer.push(&[0, 1, 2, 3, 4]).unwrap();
        let capacity = buffer.capacity();

        buffer.reset();
        assert_eq!(buffer.len(), 0);
        assert_eq!(buffer.capacity(), capacity);
    }

    #[test]
    fn test_write_impl() {
        use std::io::Write;

        let mut buffer = ByteBuffer::new();
        buffer.write_all(&[1, 2, 3]).unwrap();
        buffer.write_all(&[4]).unwrap();
        assert_eq!(buffer.as_slice(), &[1, 2, 3, 4]);
    }
}
