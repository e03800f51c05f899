//! Pluggable positional I/O for the reader side.
//!
//! The writer emits a pure append stream and consumes any [`std::io::Write`].
//! The reader needs positional reads and a total size, which std has no trait
//! for, so [`ReadSource`] is the capability it consumes. Implementations are
//! provided for [`File`] (platform positional reads, no seeking of the shared
//! handle) and for in-memory byte slices.

use std::fs::File;

use crate::error::{Error, Result};

/// Read-side capability: positional reads plus total size.
///
/// `read_at` takes `&self` so a single source can serve concurrent reads.
/// Short reads are promoted to [`Error::ShortRead`] by
/// [`read_exact_at`](Self::read_exact_at).
pub trait ReadSource {
    /// Read up to `buf.len()` bytes at `offset`. Returns the number of bytes
    /// read, 0 at end of file.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Total size of the source in bytes.
    fn size(&self) -> Result<u64>;

    /// Fill `buf` from `offset`, failing with `ShortRead` on EOF.
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let read = self.read_at(&mut buf[filled..], offset + filled as u64)?;
            if read == 0 {
                return Err(Error::ShortRead {
                    expected: buf.len() as u64,
                    actual: filled as u64,
                });
            }
            filled += read;
        }
        Ok(())
    }
}

impl ReadSource for File {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            Ok(FileExt::read_at(self, buf, offset)?)
        }
        #[cfg(windows)]
        {
            use std::os::windows::fs::FileExt;
            Ok(self.seek_read(buf, offset)?)
        }
    }

    fn size(&self) -> Result<u64> {
        Ok(self.metadata()?.len())
    }
}

impl ReadSource for [u8] {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if offset >= self.len() as u64 {
            return Ok(0);
        }
        let start = offset as usize;
        let count = buf.len().min(self.len() - start);
        buf[..count].copy_from_slice(&self[start..start + count]);
        Ok(count)
    }

    fn size(&self) -> Result<u64> {
        Ok(self.len() as u64)
    }
}

impl ReadSource for Vec<u8> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.as_slice().read_at(buf, offset)
    }

    fn size(&self) -> Result<u64> {
        Ok(self.len() as u64)
    }
}

impl<S: ReadSource + ?Sized> ReadSource for &S {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        (**self).read_at(buf, offset)
    }

    fn size(&self) -> Result<u64> {
        (**self).size()
    }
}
