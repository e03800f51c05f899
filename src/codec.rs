//! Frame codecs: ZSTD and LZ4.
//!
//! Each archive frame is one self-contained compressed frame of the selected
//! codec, so the archive body is a plain concatenation any stock decoder can
//! stream. Dispatch is a sum type with per-variant state; the reader picks
//! the variant from the first frame's magic number.
//!
//! A seek table entry may cover several consecutive frames. Decoding never
//! pre-splits the compressed bytes: the entry's whole byte range is fed to
//! the decoder, which signals the end of each frame and carries on into the
//! next one.

use std::io::{Cursor, Read, Write};

use lz4_flex::frame::{BlockSize, FrameDecoder, FrameEncoder, FrameInfo};
use tracing::trace;
use zstd_safe::{CCtx, CParameter, DCtx, InBuffer, OutBuffer};

use crate::buffer::ByteBuffer;
use crate::error::{Error, Result};
use crate::CodecKind;

/// Default ZSTD compression level.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// ZSTD compression strategies, from fastest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZstdStrategy {
    #[default]
    Fast,
    DFast,
    Greedy,
    Lazy,
    Lazy2,
    BtLazy2,
    BtOpt,
    BtUltra,
    BtUltra2,
}

impl ZstdStrategy {
    fn to_zstd(self) -> zstd_safe::Strategy {
        use zstd_safe::Strategy;
        match self {
            ZstdStrategy::Fast => Strategy::ZSTD_fast,
            ZstdStrategy::DFast => Strategy::ZSTD_dfast,
            ZstdStrategy::Greedy => Strategy::ZSTD_greedy,
            ZstdStrategy::Lazy => Strategy::ZSTD_lazy,
            ZstdStrategy::Lazy2 => Strategy::ZSTD_lazy2,
            ZstdStrategy::BtLazy2 => Strategy::ZSTD_btlazy2,
            ZstdStrategy::BtOpt => Strategy::ZSTD_btopt,
            ZstdStrategy::BtUltra => Strategy::ZSTD_btultra,
            ZstdStrategy::BtUltra2 => Strategy::ZSTD_btultra2,
        }
    }
}

/// ZSTD tunables.
#[derive(Debug, Clone)]
pub struct ZstdParams {
    /// Compression level (1 = fast, 22 = smallest).
    pub compression_level: i32,
    /// Match-finding strategy.
    pub strategy: ZstdStrategy,
    /// Worker threads. Values above 1 switch the writer to streaming
    /// compression backed by zstd's internal worker pool.
    pub nb_workers: u32,
}

impl Default for ZstdParams {
    fn default() -> Self {
        Self {
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            strategy: ZstdStrategy::Fast,
            nb_workers: 0,
        }
    }
}

/// LZ4 frame tunables.
///
/// `lz4_flex` always emits whole blocks as soon as they fill and has a single
/// fast compression mode, so the block size is the only knob.
#[derive(Debug, Clone)]
pub struct Lz4Params {
    /// Block size inside each LZ4 frame.
    pub block_size: BlockSize,
}

impl Default for Lz4Params {
    fn default() -> Self {
        Self {
            block_size: BlockSize::Max64KB,
        }
    }
}

/// Codec selection plus its parameters.
#[derive(Debug, Clone)]
pub enum CodecParams {
    Zstd(ZstdParams),
    Lz4(Lz4Params),
}

impl CodecParams {
    pub fn kind(&self) -> CodecKind {
        match self {
            CodecParams::Zstd(_) => CodecKind::Zstd,
            CodecParams::Lz4(_) => CodecKind::Lz4,
        }
    }
}

impl Default for CodecParams {
    fn default() -> Self {
        CodecParams::Zstd(ZstdParams::default())
    }
}

fn zstd_error(code: zstd_safe::ErrorCode) -> Error {
    Error::Codec(zstd_safe::get_error_name(code).to_string())
}

/// Writer-side codec state.
pub enum Compressor {
    Zstd {
        cctx: CCtx<'static>,
        streaming: bool,
    },
    Lz4 {
        info: FrameInfo,
    },
}

impl Compressor {
    pub fn new(params: &CodecParams) -> Result<Self> {
        match params {
            CodecParams::Zstd(p) => {
                let mut cctx = CCtx::create();
                cctx.set_parameter(CParameter::CompressionLevel(p.compression_level))
                    .map_err(zstd_error)?;
                cctx.set_parameter(CParameter::Strategy(p.strategy.to_zstd()))
                    .map_err(zstd_error)?;
                let streaming = p.nb_workers > 1;
                if streaming {
                    cctx.set_parameter(CParameter::NbWorkers(p.nb_workers))
                        .map_err(zstd_error)?;
                }
                Ok(Compressor::Zstd { cctx, streaming })
            }
            CodecParams::Lz4(p) => Ok(Compressor::Lz4 {
                info: FrameInfo::new().block_size(p.block_size),
            }),
        }
    }

    /// True when frames are built incrementally with
    /// [`stream_chunk`](Self::stream_chunk) / [`finish_frame`](Self::finish_frame)
    /// instead of one-shot [`compress_frame`](Self::compress_frame).
    pub fn is_streaming(&self) -> bool {
        matches!(self, Compressor::Zstd { streaming: true, .. })
    }

    /// Compress `src` into `dst` as one complete frame. Returns the
    /// compressed size.
    pub fn compress_frame(&mut self, src: &[u8], dst: &mut ByteBuffer) -> Result<usize> {
        match self {
            Compressor::Zstd { cctx, .. } => {
                dst.reset();
                dst.resize(zstd_safe::compress_bound(src.len()))?;
                let written = cctx.compress2(dst.as_mut_slice(), src).map_err(zstd_error)?;
                dst.resize(written)?;
                trace!(uncompressed = src.len(), compressed = written, "zstd frame");
                Ok(written)
            }
            Compressor::Lz4 { info } => {
                dst.reset();
                let mut encoder = FrameEncoder::with_frame_info(info.clone(), &mut *dst);
                encoder.write_all(src)?;
                encoder
                    .finish()
                    .map_err(|e| Error::Codec(format!("lz4 frame: {e}")))?;
                trace!(uncompressed = src.len(), compressed = dst.len(), "lz4 frame");
                Ok(dst.len())
            }
        }
    }

    /// Stream a chunk into the current frame, collecting any produced output
    /// in `dst`. ZSTD streaming mode only.
    pub fn stream_chunk(&mut self, src: &[u8], dst: &mut ByteBuffer) -> Result<usize> {
        let Compressor::Zstd { cctx, .. } = self else {
            return Err(Error::InvalidArgument(
                "streaming compression is only available for ZSTD".into(),
            ));
        };

        dst.reset();
        let step = CCtx::out_size();
        let mut input = InBuffer::around(src);
        while input.pos < src.len() {
            let start = dst.len();
            dst.resize(start + step)?;
            let mut output = OutBuffer::around(&mut dst.as_mut_slice()[start..]);
            cctx.compress_stream(&mut output, &mut input)
                .map_err(zstd_error)?;
            let produced = output.pos();
            dst.resize(start + produced)?;
        }
        Ok(dst.len())
    }

    /// Flush and close the current streaming frame, collecting the tail
    /// output in `dst`. ZSTD streaming mode only.
    pub fn finish_frame(&mut self, dst: &mut ByteBuffer) -> Result<usize> {
        let Compressor::Zstd { cctx, .. } = self else {
            return Err(Error::InvalidArgument(
                "streaming compression is only available for ZSTD".into(),
            ));
        };

        dst.reset();
        let step = CCtx::out_size();
        loop {
            let start = dst.len();
            dst.resize(start + step)?;
            let mut output = OutBuffer::around(&mut dst.as_mut_slice()[start..]);
            let remaining = cctx.end_stream(&mut output).map_err(zstd_error)?;
            let produced = output.pos();
            dst.resize(start + produced)?;
            if remaining == 0 {
                break;
            }
        }
        Ok(dst.len())
    }
}

/// Reader-side codec state.
pub enum Decompressor {
    Zstd { dctx: DCtx<'static> },
    Lz4,
}

impl Decompressor {
    pub fn new(kind: CodecKind) -> Self {
        match kind {
            CodecKind::Zstd => Decompressor::Zstd { dctx: DCtx::create() },
            CodecKind::Lz4 => Decompressor::Lz4,
        }
    }

    /// Decode every frame in `src` into `dst`, which ends up holding exactly
    /// `d_size` bytes.
    ///
    /// The decoder discovers frame boundaries itself; `src` is the seek table
    /// entry's whole compressed range and is never pre-split. A failure
    /// drops any mid-stream state so the next call starts clean.
    pub fn decompress_entry(
        &mut self,
        src: &[u8],
        d_size: usize,
        dst: &mut ByteBuffer,
    ) -> Result<()> {
        match self {
            Decompressor::Zstd { dctx } => {
                dst.reset();
                dst.resize(d_size)?;
                match Self::zstd_frames(dctx, src, dst.as_mut_slice()) {
                    Ok(produced) if produced == d_size => Ok(()),
                    Ok(produced) => {
                        *dctx = DCtx::create();
                        Err(Error::Codec(format!(
                            "entry decompressed to {produced} bytes, expected {d_size}"
                        )))
                    }
                    Err(e) => {
                        // The session may be mid-frame; start over.
                        *dctx = DCtx::create();
                        Err(e)
                    }
                }
            }
            Decompressor::Lz4 => {
                dst.reset();
                dst.reserve(d_size)?;
                let total = src.len() as u64;
                let mut cursor = Cursor::new(src);
                while cursor.position() < total {
                    let mut decoder = FrameDecoder::new(&mut cursor);
                    let mut produced = 0u64;
                    let mut chunk = [0u8; 16 * 1024];
                    loop {
                        let read = decoder
                            .read(&mut chunk)
                            .map_err(|e| Error::Codec(format!("lz4 frame: {e}")))?;
                        if read == 0 {
                            break;
                        }
                        dst.push(&chunk[..read])?;
                        produced += read as u64;
                    }
                    if produced == 0 {
                        break;
                    }
                }
                if dst.len() != d_size {
                    return Err(Error::Codec(format!(
                        "entry decompressed to {} bytes, expected {d_size}",
                        dst.len()
                    )));
                }
                Ok(())
            }
        }
    }

    /// Drive the streaming decoder across all frames in `src`, writing into
    /// `out`. Returns the total bytes produced.
    fn zstd_frames(dctx: &mut DCtx<'static>, src: &[u8], out: &mut [u8]) -> Result<usize> {
        let mut input = InBuffer::around(src);
        let mut output = OutBuffer::around(out);
        while input.pos < src.len() {
            let in_before = input.pos;
            let out_before = output.pos();
            dctx.decompress_stream(&mut output, &mut input)
                .map_err(zstd_error)?;
            if input.pos == in_before && output.pos() == out_before {
                return Err(Error::Codec("decompression made no progress".into()));
            }
        }
        Ok(output.pos())
    }
}
