//! Sequential archive writer.
//!
//! The writer consumes arbitrarily sized chunks, coalesces them into frames
//! of at least `min_frame_size` uncompressed bytes, and appends each
//! compressed frame to the sink. Frame sizes are recorded in a
//! [`FrameLog`]; [`finish`](ArchiveWriter::finish) force-flushes the final
//! frame and emits the seek table trailer. The sink only ever sees appends.
//!
//! Writes are not safe to call concurrently; callers serialize externally.

use std::io::Write;

use tracing::{debug, trace};

use crate::buffer::ByteBuffer;
use crate::codec::{CodecParams, Compressor};
use crate::error::{Error, Result};
use crate::seek_table::FrameLog;

/// Trailer bytes are flushed to the sink through a chunk of this size.
const TRAILER_CHUNK_SIZE: usize = 4096;

/// Writer configuration.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Codec and its parameters.
    pub codec: CodecParams,
    /// Uncompressed byte threshold at which the current frame is closed.
    pub min_frame_size: usize,
    /// Number of compressed frames coalesced into one seek table entry.
    ///
    /// Larger values shrink the trailer but a random read may have to decode
    /// and skip up to `frames_per_entry - 1` frames.
    pub frames_per_entry: u32,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            codec: CodecParams::default(),
            min_frame_size: 1 << 20,
            frames_per_entry: 10,
        }
    }
}

/// Writer statistics.
#[derive(Debug, Clone, Copy)]
pub struct WriterStats {
    /// On-disk size of the seek table trailer, as of now.
    pub seek_table_size: usize,
    /// Memory usage of the frame log.
    pub seek_table_memory: usize,
    /// Number of seek table entries logged so far.
    pub frames: usize,
    /// Compressed bytes written so far. Always <= the final size.
    pub compressed_size: u64,
    /// Capacity of the writer's internal buffers.
    pub buffer_size: usize,
}

/// Streaming writer for seekable compressed archives.
///
/// Created over any [`Write`] sink; call [`write`](Self::write) any number of
/// times and [`finish`](Self::finish) exactly once. An error from `write`
/// poisons the writer: the frame state is unspecified and further calls are
/// rejected.
pub struct ArchiveWriter<W: Write> {
    sink: W,
    compressor: Compressor,
    log: FrameLog,
    min_frame_size: usize,
    frames_per_entry: u32,
    /// Pending uncompressed bytes of the current frame (buffered mode).
    pending: ByteBuffer,
    /// Compressed output scratch, reused across frames.
    scratch: ByteBuffer,
    /// Uncompressed / compressed bytes of the current frame.
    frame_uc: u64,
    frame_cm: u64,
    /// Total compressed bytes written.
    total_cm: u64,
    /// Frames and byte totals accumulated toward the next seek table entry.
    entry_frames: u32,
    entry_uc: u64,
    entry_cm: u64,
    frames_written: u64,
    poisoned: bool,
}

impl<W: Write> ArchiveWriter<W> {
    /// Create a writer emitting to `sink`.
    pub fn new(sink: W, config: WriterConfig) -> Result<Self> {
        if config.min_frame_size == 0 {
            return Err(Error::InvalidArgument(
                "min_frame_size must be non-zero".into(),
            ));
        }
        if config.frames_per_entry == 0 {
            return Err(Error::InvalidArgument(
                "frames_per_entry must be non-zero".into(),
            ));
        }

        let compressor = Compressor::new(&config.codec)?;
        let pending = if compressor.is_streaming() {
            ByteBuffer::new()
        } else {
            ByteBuffer::with_capacity(config.min_frame_size)?
        };

        debug!(
            codec = ?config.codec.kind(),
            min_frame_size = config.min_frame_size,
            frames_per_entry = config.frames_per_entry,
            "opened archive writer"
        );

        Ok(Self {
            sink,
            compressor,
            log: FrameLog::new(false),
            min_frame_size: config.min_frame_size,
            frames_per_entry: config.frames_per_entry,
            pending,
            scratch: ByteBuffer::new(),
            frame_uc: 0,
            frame_cm: 0,
            total_cm: 0,
            entry_frames: 0,
            entry_uc: 0,
            entry_cm: 0,
            frames_written: 0,
            poisoned: false,
        })
    }

    /// Append `data` to the archive.
    ///
    /// Chunks may be any size; they are coalesced into frames internally.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.check_usable()?;
        let result = self.write_inner(data);
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    fn write_inner(&mut self, data: &[u8]) -> Result<()> {
        if self.compressor.is_streaming() {
            // The previous frame is closed lazily: its data may still be in
            // flight in the worker pool, and ending it here flushes it.
            if self.frame_uc >= self.min_frame_size as u64 {
                self.close_frame(false)?;
            }
            let produced = self.compressor.stream_chunk(data, &mut self.scratch)?;
            if produced > 0 {
                self.sink.write_all(self.scratch.as_slice())?;
                self.frame_cm += produced as u64;
                self.total_cm += produced as u64;
            }
            self.frame_uc += data.len() as u64;
            return Ok(());
        }

        if self.pending.is_empty() && data.len() >= self.min_frame_size {
            // The incoming block alone fills a frame: compress straight from
            // the caller's buffer.
            self.frame_uc = data.len() as u64;
            self.compress_and_emit(data)?;
            return self.account_frame(false);
        }

        self.pending.push(data)?;
        self.frame_uc = self.pending.len() as u64;
        if self.pending.len() >= self.min_frame_size {
            self.close_frame(false)?;
        }
        Ok(())
    }

    /// Close the current frame: compress pending bytes (buffered mode) or
    /// drain the codec (streaming mode), then account for it.
    fn close_frame(&mut self, force_entry: bool) -> Result<()> {
        if self.compressor.is_streaming() {
            let produced = self.compressor.finish_frame(&mut self.scratch)?;
            if produced > 0 {
                self.sink.write_all(self.scratch.as_slice())?;
                self.frame_cm += produced as u64;
                self.total_cm += produced as u64;
            }
        } else {
            let pending = std::mem::take(&mut self.pending);
            let result = self.compress_and_emit(pending.as_slice());
            self.pending = pending;
            result?;
            self.pending.reset();
        }
        self.account_frame(force_entry)
    }

    /// One-shot compress `input` as a frame and write it out.
    fn compress_and_emit(&mut self, input: &[u8]) -> Result<()> {
        let compressed = self.compressor.compress_frame(input, &mut self.scratch)?;
        self.sink.write_all(self.scratch.as_slice())?;
        self.frame_cm += compressed as u64;
        self.total_cm += compressed as u64;
        Ok(())
    }

    /// Fold the finished frame into the pending seek table entry, logging
    /// the entry when full (or when forced).
    fn account_frame(&mut self, force_entry: bool) -> Result<()> {
        trace!(
            frame = self.frames_written,
            uncompressed = self.frame_uc,
            compressed = self.frame_cm,
            "frame complete"
        );
        self.frames_written += 1;
        self.entry_frames += 1;
        self.entry_uc += self.frame_uc;
        self.entry_cm += self.frame_cm;
        self.frame_uc = 0;
        self.frame_cm = 0;

        if self.entry_frames == self.frames_per_entry || force_entry {
            self.flush_entry()?;
        }
        Ok(())
    }

    fn flush_entry(&mut self) -> Result<()> {
        if self.entry_cm > u32::MAX as u64 || self.entry_uc > u32::MAX as u64 {
            return Err(Error::InvalidArgument(format!(
                "seek table entry of {} uncompressed / {} compressed bytes exceeds the format's u32 sizes",
                self.entry_uc, self.entry_cm
            )));
        }
        self.log
            .log_frame(self.entry_cm as u32, self.entry_uc as u32, 0)?;
        self.entry_frames = 0;
        self.entry_uc = 0;
        self.entry_cm = 0;
        Ok(())
    }

    /// Flush the final frame, append the seek table trailer, and return the
    /// sink. The writer is consumed whether or not this succeeds.
    pub fn finish(mut self) -> Result<W> {
        self.check_usable()?;

        if self.frame_uc > 0 {
            self.close_frame(true)?;
        } else if self.entry_frames > 0 {
            self.flush_entry()?;
        }

        // Stream the trailer out through a bounded chunk; the serializer
        // resumes mid-field across calls.
        self.scratch.reset();
        self.scratch.resize(TRAILER_CHUNK_SIZE)?;
        while !self.log.trailer_done() {
            let n = self.log.write_trailer(self.scratch.as_mut_slice());
            self.sink.write_all(&self.scratch.as_slice()[..n])?;
        }
        self.sink.flush()?;

        debug!(
            frames = self.frames_written,
            entries = self.log.len(),
            compressed = self.total_cm,
            "archive finished"
        );
        Ok(self.sink)
    }

    /// Currently available writer statistics.
    pub fn stats(&self) -> WriterStats {
        WriterStats {
            seek_table_size: self.log.encoded_size(),
            seek_table_memory: self.log.memory_usage(),
            frames: self.log.len(),
            compressed_size: self.total_cm,
            buffer_size: self.pending.capacity() + self.scratch.capacity(),
        }
    }

    fn check_usable(&self) -> Result<()> {
        if self.poisoned {
            return Err(Error::InvalidArgument(
                "writer poisoned by a previous error".into(),
            ));
        }
        Ok(())
    }
}
