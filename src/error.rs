//! Error types for archive operations

use std::collections::TryReserveError;
use thiserror::Error;

/// Result type for archive operations
pub type Result<T> = std::result::Result<T, Error>;

/// Archive error types
#[derive(Error, Debug)]
pub enum Error {
    /// IO error from the underlying sink or source
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid parameter or use of a poisoned handle
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Buffer allocation failed
    #[error("out of memory: {0}")]
    OutOfMemory(#[from] TryReserveError),

    /// Fewer bytes than expected (unexpected EOF)
    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: u64, actual: u64 },

    /// Bad magic, reserved bit, or size in the seek table trailer
    #[error("malformed seek table: {0}")]
    MalformedTrailer(String),

    /// First frame magic matches no supported codec
    #[error("unknown frame magic: {0:#010x}")]
    UnknownMagic(u32),

    /// Codec reported a logical error during compress or decompress
    #[error("codec error: {0}")]
    Codec(String),

    /// Frame count exceeds the seek table format limit
    #[error("too many frames: {0}")]
    TooManyFrames(u64),
}
