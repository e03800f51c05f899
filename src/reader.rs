//! Random-access archive reader.
//!
//! A reader is opened over any [`ReadSource`], parses the seek table trailer,
//! and serves reads at arbitrary decompressed offsets. One reader instance
//! can be shared across threads: a read/write lock protects the frame cache
//! and the decompression context.
//!
//! The read path takes the shared lock and copies straight out of the cache
//! on a hit. On a miss it releases the shared lock, takes the exclusive lock
//! and re-checks the cache before doing any work, since another thread may have
//! materialized the frame in between. The re-check is load-bearing; without
//! it concurrent misses on the same frame would decompress it repeatedly and
//! race the insert.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::buffer::ByteBuffer;
use crate::cache::FrameCache;
use crate::codec::Decompressor;
use crate::error::{Error, Result};
use crate::io::ReadSource;
use crate::seek_table::{FrameLocation, SeekTable};
use crate::CodecKind;

/// Reader statistics.
#[derive(Debug, Clone, Copy)]
pub struct ReaderStats {
    /// Memory usage of the parsed seek table.
    pub seek_table_memory: usize,
    /// Number of seek table entries.
    pub frames: usize,
    /// Decompressed size of the archive in bytes.
    pub decompressed_size: u64,
    /// Memory usage of the frame cache.
    pub cache_memory: usize,
    /// Number of frames currently cached.
    pub cached_frames: usize,
    /// Capacity of the reader's work buffers.
    pub buffer_size: usize,
}

/// State guarded by the reader lock.
struct ReaderState {
    /// The Mutex only makes the context Sync; it is always accessed through
    /// the outer write guard and never contended.
    decoder: Mutex<Decompressor>,
    cache: Option<FrameCache>,
    /// Compressed fetch buffer.
    cbuf: ByteBuffer,
    /// Decompressed scratch for the cacheless path; a requested range's
    /// prefix is skipped at copy-out.
    dbuf: ByteBuffer,
}

/// Random-access reader for seekable compressed archives.
pub struct ArchiveReader<S: ReadSource> {
    source: S,
    seek_table: SeekTable,
    codec: CodecKind,
    state: RwLock<ReaderState>,
    /// Cursor for [`read`](Self::read).
    pos: AtomicU64,
}

impl<S: ReadSource> ArchiveReader<S> {
    /// Open an archive, detecting the codec from the first frame's magic.
    ///
    /// `cache_capacity` is the maximum number of decompressed frames to
    /// retain; 0 disables caching.
    pub fn open(source: S, cache_capacity: usize) -> Result<Self> {
        Self::open_inner(source, cache_capacity, None)
    }

    /// Open an archive with an explicit codec, overriding detection.
    pub fn open_with_codec(source: S, cache_capacity: usize, codec: CodecKind) -> Result<Self> {
        Self::open_inner(source, cache_capacity, Some(codec))
    }

    fn open_inner(source: S, cache_capacity: usize, hint: Option<CodecKind>) -> Result<Self> {
        let seek_table = SeekTable::read(&source)?;
        let codec = match hint {
            Some(kind) => kind,
            None => Self::detect_codec(&source, &seek_table)?,
        };

        debug!(
            frames = seek_table.frames(),
            decompressed = seek_table.decompressed_size(),
            codec = ?codec,
            cache_capacity,
            "opened archive reader"
        );

        Ok(Self {
            source,
            seek_table,
            codec,
            state: RwLock::new(ReaderState {
                decoder: Mutex::new(Decompressor::new(codec)),
                cache: (cache_capacity > 0).then(|| FrameCache::new(cache_capacity)),
                cbuf: ByteBuffer::new(),
                dbuf: ByteBuffer::new(),
            }),
            pos: AtomicU64::new(0),
        })
    }

    fn detect_codec(source: &S, seek_table: &SeekTable) -> Result<CodecKind> {
        if seek_table.frames() == 0 {
            // No frames to sniff; the codec is irrelevant for an empty
            // archive.
            return Ok(CodecKind::Zstd);
        }
        let mut magic = [0u8; 4];
        source.read_exact_at(&mut magic, 0)?;
        let magic = u32::from_le_bytes(magic);
        CodecKind::from_frame_magic(magic).ok_or(Error::UnknownMagic(magic))
    }

    /// The codec frames are compressed with.
    pub fn codec(&self) -> CodecKind {
        self.codec
    }

    /// Total decompressed size of the archive.
    pub fn decompressed_size(&self) -> u64 {
        self.seek_table.decompressed_size()
    }

    /// Read up to `buf.len()` bytes at decompressed `offset`.
    ///
    /// Returns the number of bytes copied, which may be less than requested
    /// when the range crosses a frame boundary; callers loop until
    /// satisfied. An offset at or past the end of the archive returns 0.
    pub fn pread(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let Some(loc) = self.seek_table.locate(offset) else {
            return Ok(0);
        };

        {
            let state = self.state.read();
            match &state.cache {
                Some(cache) => {
                    if let Some(frame) = cache.find(loc.index as u64) {
                        trace!(entry = loc.index, offset, "cache hit");
                        return Ok(copy_out(frame, loc.offset_in_frame as usize, buf));
                    }
                }
                None => {
                    drop(state);
                    return self.pread_uncached(buf, &loc);
                }
            }
        }

        // Miss: upgrade by re-acquiring exclusively, then re-check.
        let mut state = self.state.write();
        if let Some(frame) = state.cache.as_ref().and_then(|c| c.find(loc.index as u64)) {
            trace!(entry = loc.index, offset, "cache hit after upgrade");
            return Ok(copy_out(frame, loc.offset_in_frame as usize, buf));
        }

        trace!(entry = loc.index, offset, "cache miss");
        let state = &mut *state;
        let frame = Self::fetch_entry(
            &self.source,
            &loc,
            state.decoder.get_mut(),
            &mut state.cbuf,
        )?;

        let copied = copy_out(frame.as_slice(), loc.offset_in_frame as usize, buf);
        if let Some(cache) = state.cache.as_mut() {
            let inserted = cache.insert(loc.index as u64, frame.into_vec());
            debug_assert!(inserted, "insert raced despite the exclusive re-check");
        }
        Ok(copied)
    }

    /// Exclusive-only fast path when caching is disabled: decode into the
    /// reusable scratch and copy out past the prefix.
    fn pread_uncached(&self, buf: &mut [u8], loc: &FrameLocation) -> Result<usize> {
        let mut state = self.state.write();
        let state = &mut *state;

        state.cbuf.reset();
        state.cbuf.resize(loc.c_size as usize)?;
        self.source
            .read_exact_at(state.cbuf.as_mut_slice(), loc.c_offset)?;

        state.dbuf.reset();
        state.decoder.get_mut().decompress_entry(
            state.cbuf.as_slice(),
            loc.d_size as usize,
            &mut state.dbuf,
        )?;

        Ok(copy_out(
            state.dbuf.as_slice(),
            loc.offset_in_frame as usize,
            buf,
        ))
    }

    /// Fetch and decompress a whole seek table entry into a fresh buffer.
    fn fetch_entry(
        source: &S,
        loc: &FrameLocation,
        decoder: &mut Decompressor,
        cbuf: &mut ByteBuffer,
    ) -> Result<ByteBuffer> {
        cbuf.reset();
        cbuf.resize(loc.c_size as usize)?;
        source.read_exact_at(cbuf.as_mut_slice(), loc.c_offset)?;

        let mut frame = ByteBuffer::new();
        decoder.decompress_entry(cbuf.as_slice(), loc.d_size as usize, &mut frame)?;
        Ok(frame)
    }

    /// Read up to `buf.len()` bytes at the internal cursor, advancing it by
    /// the number of bytes returned.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let offset = self.pos.load(Ordering::Relaxed);
        let count = self.pread(buf, offset)?;
        self.pos.fetch_add(count as u64, Ordering::Relaxed);
        Ok(count)
    }

    /// Currently available reader statistics.
    pub fn stats(&self) -> ReaderStats {
        let state = self.state.read();
        let (cache_memory, cached_frames) = match &state.cache {
            Some(cache) => (cache.memory_usage(), cache.entries()),
            None => (0, 0),
        };
        ReaderStats {
            seek_table_memory: self.seek_table.memory_usage(),
            frames: self.seek_table.frames(),
            decompressed_size: self.seek_table.decompressed_size(),
            cache_memory,
            cached_frames,
            buffer_size: state.cbuf.capacity() + state.dbuf.capacity(),
        }
    }
}

/// Copy as much of `frame` past `offset_in_frame` as fits in `buf`.
fn copy_out(frame: &[u8], offset_in_frame: usize, buf: &mut [u8]) -> usize {
    let available = frame.len() - offset_in_frame;
    let count = buf.len().min(available);
    buf[..count].copy_from_slice(&frame[offset_in_frame..offset_in_frame + count]);
    count
}
