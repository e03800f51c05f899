//! End-to-end archive tests: write, reopen, random-access reads.

use std::sync::Arc;
use std::thread;

use zarc::{
    ArchiveReader, ArchiveWriter, CodecKind, CodecParams, Lz4Params, ReadSource, WriterConfig,
    ZstdParams,
};

/// Deterministic pseudo-random byte stream (LCG), so failures reproduce.
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0
    }

    fn bytes(&mut self, len: usize) -> Vec<u8> {
        (0..len).map(|_| (self.next() >> 33) as u8).collect()
    }
}

fn build_archive(data: &[u8], chunk_size: usize, config: WriterConfig) -> Vec<u8> {
    let mut writer = ArchiveWriter::new(Vec::new(), config).unwrap();
    for chunk in data.chunks(chunk_size.max(1)) {
        writer.write(chunk).unwrap();
    }
    writer.finish().unwrap()
}

/// Loop pread until `len` bytes are gathered or the archive ends.
fn read_all<S: ReadSource>(reader: &ArchiveReader<S>, mut offset: u64, len: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; len];
    while out.len() < len {
        let n = reader
            .pread(&mut buf[..len - out.len()], offset)
            .unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
        offset += n as u64;
    }
    out
}

fn zstd_config(min_frame_size: usize, frames_per_entry: u32) -> WriterConfig {
    WriterConfig {
        codec: CodecParams::Zstd(ZstdParams::default()),
        min_frame_size,
        frames_per_entry,
    }
}

fn lz4_config(min_frame_size: usize, frames_per_entry: u32) -> WriterConfig {
    WriterConfig {
        codec: CodecParams::Lz4(Lz4Params::default()),
        min_frame_size,
        frames_per_entry,
    }
}

#[test]
fn round_trip_matrix() {
    let data = Rng(7).bytes(10_000);
    for (name, config) in [
        ("zstd tiny frames", zstd_config(64, 1)),
        ("zstd grouped entries", zstd_config(256, 4)),
        ("zstd one big frame", zstd_config(1 << 20, 10)),
        ("lz4 tiny frames", lz4_config(64, 1)),
        ("lz4 grouped entries", lz4_config(256, 4)),
        ("lz4 one big frame", lz4_config(1 << 20, 10)),
    ] {
        let bytes = build_archive(&data, 777, config);
        let reader = ArchiveReader::open(bytes, 4).unwrap();
        assert_eq!(reader.decompressed_size(), data.len() as u64, "{name}");
        assert_eq!(read_all(&reader, 0, data.len()), data, "{name}");
    }
}

#[test]
fn random_access_matches_reference() {
    let mut rng = Rng(42);
    let data = rng.bytes(50_000);
    let bytes = build_archive(&data, 1000, zstd_config(4096, 2));
    let reader = ArchiveReader::open(bytes, 3).unwrap();

    for _ in 0..200 {
        let offset = (rng.next() % (data.len() as u64 + 10)) as usize;
        let len = (rng.next() % 2000) as usize + 1;
        let expected_len = len.min(data.len().saturating_sub(offset));
        let got = read_all(&reader, offset as u64, len);
        assert_eq!(got.len(), expected_len, "offset {offset} len {len}");
        let start = offset.min(data.len());
        assert_eq!(got, &data[start..start + expected_len]);
    }
}

#[test]
fn cached_and_cacheless_readers_agree() {
    let mut rng = Rng(1234);
    let data = rng.bytes(20_000);
    let bytes = build_archive(&data, 500, lz4_config(1024, 3));

    let cached = ArchiveReader::open(bytes.clone(), 2).unwrap();
    let cacheless = ArchiveReader::open(bytes, 0).unwrap();

    for _ in 0..100 {
        let offset = rng.next() % 20_000;
        let len = (rng.next() % 500) as usize + 1;
        assert_eq!(
            read_all(&cached, offset, len),
            read_all(&cacheless, offset, len),
            "offset {offset} len {len}"
        );
    }
    assert_eq!(cacheless.stats().cached_frames, 0);
    assert_eq!(cacheless.stats().cache_memory, 0);
}

#[test]
fn streaming_multi_worker_writer_round_trips() {
    let data = Rng(99).bytes(300_000);
    let config = WriterConfig {
        codec: CodecParams::Zstd(ZstdParams {
            nb_workers: 2,
            ..ZstdParams::default()
        }),
        min_frame_size: 64 * 1024,
        frames_per_entry: 1,
    };
    let bytes = build_archive(&data, 10_000, config);

    let reader = ArchiveReader::open(bytes, 4).unwrap();
    assert!(reader.stats().frames >= 2);
    assert_eq!(read_all(&reader, 0, data.len()), data);
    assert_eq!(read_all(&reader, 150_000, 1000), &data[150_000..151_000]);
}

#[test]
fn file_backed_archive() {
    use std::io::Write as _;

    let data = Rng(5).bytes(8_192);
    let bytes = build_archive(&data, 300, zstd_config(1024, 1));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.zarc");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(&bytes).unwrap();
    file.flush().unwrap();

    let reader = ArchiveReader::open(std::fs::File::open(&path).unwrap(), 4).unwrap();
    assert_eq!(read_all(&reader, 0, data.len()), data);
    assert_eq!(read_all(&reader, 5000, 100), &data[5000..5100]);
}

#[test]
fn writing_through_a_file_sink() {
    let data = Rng(6).bytes(4_096);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sink.zarc");

    let file = std::fs::File::create(&path).unwrap();
    let mut writer = ArchiveWriter::new(file, zstd_config(512, 2)).unwrap();
    for chunk in data.chunks(100) {
        writer.write(chunk).unwrap();
    }
    writer.finish().unwrap();

    let reader = ArchiveReader::open(std::fs::File::open(&path).unwrap(), 2).unwrap();
    assert_eq!(read_all(&reader, 0, data.len()), data);
}

// Seed scenario 1
#[test]
fn empty_archive() {
    let writer = ArchiveWriter::new(Vec::new(), WriterConfig::default()).unwrap();
    let bytes = writer.finish().unwrap();

    let reader = ArchiveReader::open(bytes, 4).unwrap();
    assert_eq!(reader.stats().decompressed_size, 0);
    assert_eq!(reader.stats().frames, 0);

    let mut buf = [0u8; 1];
    assert_eq!(reader.pread(&mut buf, 0).unwrap(), 0);
}

// Seed scenario 2
#[test]
fn single_tiny_frame() {
    let mut writer = ArchiveWriter::new(Vec::new(), zstd_config(1 << 20, 1)).unwrap();
    writer.write(&[1, 2, 3, 4, 5]).unwrap();
    let bytes = writer.finish().unwrap();

    let reader = ArchiveReader::open(bytes, 4).unwrap();
    assert_eq!(reader.stats().frames, 1);

    let mut buf = [0u8; 5];
    assert_eq!(reader.pread(&mut buf, 0).unwrap(), 5);
    assert_eq!(buf, [1, 2, 3, 4, 5]);

    let mut buf = [0u8; 3];
    assert_eq!(reader.pread(&mut buf, 1).unwrap(), 3);
    assert_eq!(buf, [2, 3, 4]);
}

// Seed scenario 3
#[test]
fn cross_frame_read() {
    let mut writer = ArchiveWriter::new(Vec::new(), zstd_config(4, 1)).unwrap();
    for _ in 0..10 {
        writer.write(&[0xAA]).unwrap();
    }
    let bytes = writer.finish().unwrap();

    let reader = ArchiveReader::open(bytes, 4).unwrap();
    assert!(reader.stats().frames >= 2);

    // A single pread stops at the frame boundary; looping gathers all 10.
    let mut calls = 0;
    let mut out = Vec::new();
    let mut buf = [0u8; 10];
    let mut offset = 0u64;
    while out.len() < 10 {
        let n = reader.pread(&mut buf[..10 - out.len()], offset).unwrap();
        if n == 0 {
            break;
        }
        calls += 1;
        out.extend_from_slice(&buf[..n]);
        offset += n as u64;
    }
    assert!(calls >= 2);
    assert_eq!(out, vec![0xAA; 10]);
}

// Seed scenario 4
#[test]
fn out_of_range_read() {
    let data = Rng(3).bytes(1000);
    let bytes = build_archive(&data, 100, zstd_config(256, 1));
    let reader = ArchiveReader::open(bytes, 2).unwrap();
    let end = reader.decompressed_size();
    assert_eq!(end, 1000);

    let mut buf = [0u8; 10];
    assert_eq!(reader.pread(&mut buf, end).unwrap(), 0);
    assert_eq!(reader.pread(&mut buf, end + 1).unwrap(), 0);
}

// Seed scenario 5
#[test]
fn lz4_autodetect() {
    let data = Rng(8).bytes(5000);
    let bytes = build_archive(&data, 128, lz4_config(512, 1));

    let reader = ArchiveReader::open(bytes, 2).unwrap();
    assert_eq!(reader.codec(), CodecKind::Lz4);
    assert_eq!(read_all(&reader, 0, data.len()), data);
}

// Seed scenario 5, frame-count agreement
#[test]
fn lz4_autodetect_frame_counts_agree() {
    let data = Rng(9).bytes(4096);
    let mut writer = ArchiveWriter::new(Vec::new(), lz4_config(256, 1)).unwrap();
    for chunk in data.chunks(256) {
        // Chunks of exactly min_frame_size: every write closes a frame, so
        // the log is complete before finish.
        writer.write(chunk).unwrap();
    }
    let frames_logged = writer.stats().frames;
    let bytes = writer.finish().unwrap();

    let reader = ArchiveReader::open(bytes, 2).unwrap();
    assert_eq!(reader.codec(), CodecKind::Lz4);
    assert_eq!(reader.stats().frames, frames_logged);
}

// Seed scenario 6
#[test]
fn concurrent_readers_see_consistent_bytes() {
    let mut rng = Rng(77);
    let data = Arc::new(rng.bytes(100_000));
    let bytes = build_archive(&data, 1000, zstd_config(4096, 2));
    let reader = Arc::new(ArchiveReader::open(bytes, 3).unwrap());

    let mut handles = Vec::new();
    for thread_id in 0..4u64 {
        let reader = Arc::clone(&reader);
        let data = Arc::clone(&data);
        handles.push(thread::spawn(move || {
            let mut rng = Rng(thread_id + 1);
            for _ in 0..1000 {
                let offset = (rng.next() % (data.len() as u64 + 100)) as usize;
                let len = (rng.next() % 300) as usize + 1;
                let expected_len = len.min(data.len().saturating_sub(offset));

                let mut out = Vec::new();
                let mut buf = vec![0u8; len];
                let mut pos = offset as u64;
                while out.len() < expected_len {
                    let n = reader.pread(&mut buf[..len - out.len()], pos).unwrap();
                    if n == 0 {
                        break;
                    }
                    out.extend_from_slice(&buf[..n]);
                    pos += n as u64;
                }
                let start = offset.min(data.len());
                assert_eq!(out, &data[start..start + expected_len]);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = reader.stats();
    assert!(stats.cached_frames <= 3);
    assert!(stats.cached_frames > 0);
}

#[test]
fn sequential_read_crosses_entries() {
    let data = Rng(11).bytes(10_000);
    let bytes = build_archive(&data, 100, zstd_config(512, 3));
    let reader = ArchiveReader::open(bytes, 2).unwrap();

    let mut out = Vec::new();
    let mut buf = [0u8; 777];
    loop {
        let n = reader.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    assert_eq!(out, data);
}

#[test]
fn trailer_is_byte_stable() {
    // Same input, same configuration: identical archives.
    let data = Rng(21).bytes(2048);
    let a = build_archive(&data, 100, zstd_config(512, 2));
    let b = build_archive(&data, 100, zstd_config(512, 2));
    assert_eq!(a, b);
}
