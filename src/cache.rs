//! Bounded cache of decompressed frames.
//!
//! The cache owns the decompressed bytes of up to `capacity` frames, keyed by
//! seek table entry index. Recency is tracked with a monotonic access stamp
//! per entry: [`find`](FrameCache::find) bumps the stamp through an atomic so
//! hits stay race-free under the reader's shared lock, and eviction removes
//! the entry with the smallest stamp. With no intervening finds this degrades
//! to insertion-order eviction; a find promotes the entry to most recently
//! used.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;

/// Bounded associative store of decompressed frames.
#[derive(Debug)]
pub struct FrameCache {
    map: HashMap<u64, CacheEntry>,
    capacity: usize,
    /// Total bytes owned by cached frames.
    bytes: usize,
    tick: AtomicU64,
}

#[derive(Debug)]
struct CacheEntry {
    data: Vec<u8>,
    stamp: AtomicU64,
}

impl FrameCache {
    /// Create a cache holding up to `capacity` frames. Callers disable
    /// caching by not constructing one; a zero capacity is a caller bug.
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0);
        Self {
            map: HashMap::with_capacity(capacity),
            capacity,
            bytes: 0,
            tick: AtomicU64::new(0),
        }
    }

    /// Look up a frame, promoting it to most recently used on a hit.
    pub fn find(&self, frame_idx: u64) -> Option<&[u8]> {
        let entry = self.map.get(&frame_idx)?;
        let now = self.tick.fetch_add(1, Ordering::Relaxed) + 1;
        entry.stamp.store(now, Ordering::Relaxed);
        Some(&entry.data)
    }

    /// Insert a frame, taking ownership of `data`.
    ///
    /// Fails (returns false) when the index is already present; callers that
    /// raced on a lock upgrade re-check with [`find`](Self::find) first. At
    /// capacity the least recently used entry is dropped before inserting.
    pub fn insert(&mut self, frame_idx: u64, data: Vec<u8>) -> bool {
        if self.map.contains_key(&frame_idx) {
            return false;
        }

        if self.map.len() == self.capacity {
            let victim = self
                .map
                .iter()
                .min_by_key(|(_, entry)| entry.stamp.load(Ordering::Relaxed))
                .map(|(idx, _)| *idx);
            if let Some(idx) = victim {
                if let Some(evicted) = self.map.remove(&idx) {
                    self.bytes -= evicted.data.len();
                    trace!(frame = idx, len = evicted.data.len(), "evicted frame");
                }
            }
        }

        let now = self.tick.fetch_add(1, Ordering::Relaxed) + 1;
        self.bytes += data.len();
        self.map.insert(
            frame_idx,
            CacheEntry {
                data,
                stamp: AtomicU64::new(now),
            },
        );
        true
    }

    /// Number of frames currently cached.
    pub fn entries(&self) -> usize {
        self.map.len()
    }

    /// Total heap footprint: owned frame bytes plus map overhead.
    pub fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.map.capacity()
                * (std::mem::size_of::<u64>() + std::mem::size_of::<CacheEntry>())
            + self.bytes
    }
}
