//! Seekable compressed archive library
//!
//! An archive is written sequentially in one pass and can later be read at
//! any decompressed byte offset, as if the data were never compressed. The
//! writer partitions the input stream into independently compressed frames
//! (ZSTD or LZ4) and appends a seek table trailer mapping decompressed
//! offsets to frame locations; the reader parses the trailer on open and
//! serves random-access reads, optionally caching decompressed frames.
//!
//! ## Writing
//!
//! ```no_run
//! use zarc::{ArchiveWriter, WriterConfig};
//!
//! let file = std::fs::File::create("data.zarc")?;
//! let mut writer = ArchiveWriter::new(file, WriterConfig::default())?;
//! writer.write(b"hello seekable world")?;
//! writer.finish()?;
//! # Ok::<(), zarc::Error>(())
//! ```
//!
//! ## Reading
//!
//! ```no_run
//! use zarc::ArchiveReader;
//!
//! let file = std::fs::File::open("data.zarc")?;
//! let reader = ArchiveReader::open(file, 8)?;
//! let mut buf = [0u8; 5];
//! let n = reader.pread(&mut buf, 6)?;
//! # Ok::<(), zarc::Error>(())
//! ```
//!
//! Readers are shareable: wrap one in an `Arc` and call
//! [`pread`](ArchiveReader::pread) from any number of threads.

pub mod buffer;
pub mod cache;
pub mod codec;
pub mod error;
pub mod io;
pub mod reader;
pub mod seek_table;
pub mod writer;

pub use buffer::ByteBuffer;
pub use cache::FrameCache;
pub use codec::{
    CodecParams, Compressor, Decompressor, Lz4Params, ZstdParams, ZstdStrategy,
    DEFAULT_COMPRESSION_LEVEL,
};
pub use error::{Error, Result};
pub use io::ReadSource;
pub use reader::{ArchiveReader, ReaderStats};
pub use seek_table::{FrameLocation, FrameLog, SeekTable};
pub use writer::{ArchiveWriter, WriterConfig, WriterStats};

/// Magic number of a ZSTD frame (little-endian).
pub const ZSTD_FRAME_MAGIC: u32 = 0xFD2F_B528;

/// Magic number of an LZ4 frame (little-endian).
pub const LZ4_FRAME_MAGIC: u32 = 0x184D_2204;

/// Supported frame codecs.
///
/// All frames of an archive use one codec; the reader detects it from the
/// magic number of the first frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecKind {
    Zstd,
    Lz4,
}

impl CodecKind {
    /// Resolve a codec from the magic number of its frames.
    pub fn from_frame_magic(magic: u32) -> Option<Self> {
        match magic {
            ZSTD_FRAME_MAGIC => Some(Self::Zstd),
            LZ4_FRAME_MAGIC => Some(Self::Lz4),
            _ => None,
        }
    }

    /// The magic number at the start of every frame of this codec.
    pub fn frame_magic(self) -> u32 {
        match self {
            Self::Zstd => ZSTD_FRAME_MAGIC,
            Self::Lz4 => LZ4_FRAME_MAGIC,
        }
    }
}
