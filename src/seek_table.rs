//! Seek table encoding and decoding.
//!
//! The seek table lives in a skippable frame appended after the compressed
//! data, so any compliant decoder can stream the whole archive while ignoring
//! it. Layout (all integers little-endian):
//!
//! ```text
//! skippable header: magic u32 = 0x184D2A5E, payload size u32
//! entries x N:      cSize u32, dSize u32, checksum u32 (iff descriptor bit 7)
//! footer (9 bytes): N u32, descriptor u8, magic u32 = 0x8F92EAB1
//! ```
//!
//! The writer accumulates a [`FrameLog`] and serializes it through a bounded
//! scratch buffer; the serializer is resumable so a short sink never forces
//! the whole trailer into memory at once. The reader parses the trailer into
//! a [`SeekTable`] of cumulative offsets with a sentinel entry holding the
//! totals, then resolves decompressed offsets with a binary search.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};
use tracing::debug;

use crate::error::{Error, Result};
use crate::io::ReadSource;

/// Magic of the skippable frame holding the seek table (variant 0xE).
pub const SKIPPABLE_MAGIC: u32 = 0x184D_2A5E;
/// Integrity magic at the very end of the trailer footer.
pub const SEEKABLE_MAGIC: u32 = 0x8F92_EAB1;
/// Size of the skippable frame header in bytes.
pub const SKIPPABLE_HEADER_SIZE: usize = 8;
/// Size of the trailer footer in bytes.
pub const FOOTER_SIZE: usize = 9;
/// Maximum number of seek table entries.
pub const MAX_FRAMES: u64 = 0x0800_0000;

/// Seek table entries are streamed through buffers of this size, rounded
/// down to a whole number of entries.
const ENTRY_BUF_SIZE: usize = 1 << 12;

/// One logged frame: sizes as stored on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLogEntry {
    pub c_size: u32,
    pub d_size: u32,
    pub checksum: u32,
}

/// Writer-side log of emitted frames, serialized into the trailer on close.
#[derive(Debug)]
pub struct FrameLog {
    entries: Vec<FrameLogEntry>,
    checksums: bool,
    // Serializer state, so trailer emission can resume mid-field when the
    // output chunk runs out.
    trailer_pos: u32,
    trailer_index: usize,
}

/// Output cursor for one resumable serialization step.
struct OutCursor<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl FrameLog {
    pub fn new(checksums: bool) -> Self {
        Self {
            entries: Vec::new(),
            checksums,
            trailer_pos: 0,
            trailer_index: 0,
        }
    }

    /// Append one frame record.
    pub fn log_frame(&mut self, c_size: u32, d_size: u32, checksum: u32) -> Result<()> {
        if self.entries.len() as u64 == MAX_FRAMES {
            return Err(Error::TooManyFrames(MAX_FRAMES));
        }
        self.entries.try_reserve(1)?;
        self.entries.push(FrameLogEntry {
            c_size,
            d_size,
            checksum,
        });
        Ok(())
    }

    /// Number of logged entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry_size(&self) -> usize {
        8 + if self.checksums { 4 } else { 0 }
    }

    /// Exact on-disk size of the trailer in bytes.
    pub fn encoded_size(&self) -> usize {
        SKIPPABLE_HEADER_SIZE + self.entries.len() * self.entry_size() + FOOTER_SIZE
    }

    /// Heap footprint of the log.
    pub fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.entries.capacity() * std::mem::size_of::<FrameLogEntry>()
    }

    /// True once the whole trailer has been serialized.
    pub fn trailer_done(&self) -> bool {
        self.trailer_pos as usize == self.encoded_size()
    }

    /// Write the part of a little-endian u32 field at absolute trailer
    /// `offset` that is still pending and fits in `out`. Returns false when
    /// `out` is exhausted and the caller must return to its caller.
    fn put32(&mut self, out: &mut OutCursor<'_>, value: u32, offset: u32) -> bool {
        if self.trailer_pos < offset + 4 {
            let wanted = (offset + 4 - self.trailer_pos) as usize;
            let len = wanted.min(out.buf.len() - out.pos);
            let bytes = value.to_le_bytes();
            let skip = (self.trailer_pos - offset) as usize;
            out.buf[out.pos..out.pos + len].copy_from_slice(&bytes[skip..skip + len]);
            out.pos += len;
            self.trailer_pos += len as u32;
            if len < 4 {
                return false;
            }
        }
        true
    }

    /// Serialize the next chunk of the trailer into `buf`.
    ///
    /// Returns the number of bytes written; call repeatedly until
    /// [`trailer_done`](Self::trailer_done). Fields already emitted by
    /// previous calls are skipped, so the concatenation of all chunks is
    /// byte-identical to a single large write.
    pub fn write_trailer(&mut self, buf: &mut [u8]) -> usize {
        let mut out = OutCursor { buf, pos: 0 };
        let entry_size = self.entry_size() as u32;
        let trailer_size = self.encoded_size() as u32;

        if !self.put32(&mut out, SKIPPABLE_MAGIC, 0) {
            return out.pos;
        }
        if !self.put32(
            &mut out,
            trailer_size - SKIPPABLE_HEADER_SIZE as u32,
            4,
        ) {
            return out.pos;
        }

        while self.trailer_index < self.entries.len() {
            let start = SKIPPABLE_HEADER_SIZE as u32 + entry_size * self.trailer_index as u32;
            let entry = self.entries[self.trailer_index];
            if !self.put32(&mut out, entry.c_size, start) {
                return out.pos;
            }
            if !self.put32(&mut out, entry.d_size, start + 4) {
                return out.pos;
            }
            if self.checksums && !self.put32(&mut out, entry.checksum, start + 8) {
                return out.pos;
            }
            self.trailer_index += 1;
        }

        if !self.put32(
            &mut out,
            self.entries.len() as u32,
            trailer_size - FOOTER_SIZE as u32,
        ) {
            return out.pos;
        }

        // Descriptor byte: bit 7 = checksum flag, the rest reserved zero.
        if self.trailer_pos < trailer_size - 4 {
            if out.pos == out.buf.len() {
                return out.pos;
            }
            out.buf[out.pos] = (self.checksums as u8) << 7;
            out.pos += 1;
            self.trailer_pos += 1;
        }

        self.put32(&mut out, SEEKABLE_MAGIC, trailer_size - 4);
        out.pos
    }
}

/// One parsed entry: cumulative offsets of the frame start.
#[derive(Debug, Clone, Copy)]
struct TableEntry {
    c_offset: u64,
    d_offset: u64,
    checksum: u32,
}

/// Location of a decompressed offset within the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLocation {
    /// Seek table entry index owning the offset.
    pub index: usize,
    /// Offset relative to the entry's decompressed start.
    pub offset_in_frame: u64,
    /// Compressed byte offset of the entry in the file.
    pub c_offset: u64,
    /// Compressed size of the entry.
    pub c_size: u64,
    /// Decompressed size of the entry.
    pub d_size: u64,
}

/// Parsed seek table: `N + 1` cumulative entries, the last being a sentinel
/// carrying the compressed-prefix length and total decompressed size.
#[derive(Debug)]
pub struct SeekTable {
    entries: Vec<TableEntry>,
    checksums: bool,
}

impl SeekTable {
    /// Read and validate the trailer from the end of `source`.
    pub fn read<S: ReadSource + ?Sized>(source: &S) -> Result<Self> {
        let file_size = source.size()?;
        let min_size = (SKIPPABLE_HEADER_SIZE + FOOTER_SIZE) as u64;
        if file_size < min_size {
            return Err(Error::MalformedTrailer(format!(
                "file of {file_size} bytes cannot hold a seek table"
            )));
        }

        let mut footer = [0u8; FOOTER_SIZE];
        source.read_exact_at(&mut footer, file_size - FOOTER_SIZE as u64)?;
        let mut cursor = Cursor::new(&footer[..]);
        let num_frames = cursor.read_u32::<LittleEndian>()?;
        let descriptor = cursor.read_u8()?;
        let magic = cursor.read_u32::<LittleEndian>()?;
        if magic != SEEKABLE_MAGIC {
            return Err(Error::MalformedTrailer(format!(
                "bad footer magic {magic:#010x}"
            )));
        }
        if descriptor & 0x7c != 0 {
            return Err(Error::MalformedTrailer(format!(
                "reserved descriptor bits set: {descriptor:#04x}"
            )));
        }
        let checksums = descriptor & 0x80 != 0;

        let entry_size = 8 + if checksums { 4 } else { 0 };
        let trailer_size =
            (SKIPPABLE_HEADER_SIZE + num_frames as usize * entry_size + FOOTER_SIZE) as u64;
        if trailer_size > file_size {
            return Err(Error::MalformedTrailer(format!(
                "seek table of {trailer_size} bytes exceeds file size {file_size}"
            )));
        }

        let mut header = [0u8; SKIPPABLE_HEADER_SIZE];
        source.read_exact_at(&mut header, file_size - trailer_size)?;
        let mut cursor = Cursor::new(&header[..]);
        let magic = cursor.read_u32::<LittleEndian>()?;
        if magic != SKIPPABLE_MAGIC {
            return Err(Error::MalformedTrailer(format!(
                "bad skippable magic {magic:#010x}"
            )));
        }
        let payload_size = cursor.read_u32::<LittleEndian>()?;
        if payload_size as u64 != trailer_size - SKIPPABLE_HEADER_SIZE as u64 {
            return Err(Error::MalformedTrailer(format!(
                "skippable frame size {payload_size} does not match {num_frames} entries"
            )));
        }

        let mut entries = Vec::new();
        entries.try_reserve_exact(num_frames as usize + 1)?;

        // Stream the entries through a bounded buffer holding a whole
        // number of entries per fill.
        let buf_len = ENTRY_BUF_SIZE - (ENTRY_BUF_SIZE % entry_size);
        let mut buf = vec![0u8; buf_len.min(num_frames as usize * entry_size).max(entry_size)];
        let mut entries_off = file_size - trailer_size + SKIPPABLE_HEADER_SIZE as u64;
        let mut c_offset = 0u64;
        let mut d_offset = 0u64;
        let mut remaining = num_frames as usize;
        while remaining > 0 {
            let batch = remaining.min(buf.len() / entry_size);
            let fill = batch * entry_size;
            source.read_exact_at(&mut buf[..fill], entries_off)?;
            entries_off += fill as u64;

            let mut cursor = Cursor::new(&buf[..fill]);
            for _ in 0..batch {
                let c_size = cursor.read_u32::<LittleEndian>()?;
                let d_size = cursor.read_u32::<LittleEndian>()?;
                let checksum = if checksums {
                    cursor.read_u32::<LittleEndian>()?
                } else {
                    0
                };
                entries.push(TableEntry {
                    c_offset,
                    d_offset,
                    checksum,
                });
                c_offset += c_size as u64;
                d_offset += d_size as u64;
            }
            remaining -= batch;
        }
        entries.push(TableEntry {
            c_offset,
            d_offset,
            checksum: 0,
        });

        debug!(
            frames = num_frames,
            compressed = c_offset,
            decompressed = d_offset,
            checksums,
            "seek table loaded"
        );

        Ok(Self { entries, checksums })
    }

    /// Number of entries (frames or frame groups) in the table.
    pub fn frames(&self) -> usize {
        self.entries.len() - 1
    }

    /// Total decompressed size of the archive.
    pub fn decompressed_size(&self) -> u64 {
        self.entries[self.entries.len() - 1].d_offset
    }

    /// Length of the compressed data prefix, excluding the trailer.
    pub fn compressed_size(&self) -> u64 {
        self.entries[self.entries.len() - 1].c_offset
    }

    pub fn has_checksums(&self) -> bool {
        self.checksums
    }

    /// Heap footprint of the parsed table.
    pub fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.entries.capacity() * std::mem::size_of::<TableEntry>()
    }

    /// Stored checksum of entry `index`, zero when the flag is clear.
    pub fn checksum(&self, index: usize) -> u32 {
        self.entries[index].checksum
    }

    /// Map a decompressed offset to the entry holding it.
    ///
    /// Returns `None` when `offset` is at or past the end of the archive.
    /// An offset equal to an entry's start resolves to that entry.
    pub fn locate(&self, offset: u64) -> Option<FrameLocation> {
        let frames = self.frames();
        if offset >= self.entries[frames].d_offset {
            return None;
        }

        // Invariant: entries[lo].d_offset <= offset < entries[hi].d_offset
        let mut lo = 0;
        let mut hi = frames;
        while lo + 1 < hi {
            let mid = lo + (hi - lo) / 2;
            if self.entries[mid].d_offset <= offset {
                lo = mid;
            } else {
                hi = mid;
            }
        }

        Some(FrameLocation {
            index: lo,
            offset_in_frame: offset - self.entries[lo].d_offset,
            c_offset: self.entries[lo].c_offset,
            c_size: self.entries[lo + 1].c_offset - self.entries[lo].c_offset,
            d_size: self.entries[lo + 1].d_offset - self.entries[lo].d_offset,
        })
    }
}
