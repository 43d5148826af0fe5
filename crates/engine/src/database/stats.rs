//! Store counters
//!
//! Counters are cumulative for the lifetime of one `Haystack` instance and
//! use Relaxed ordering: they are diagnostics, not synchronization.

use haystack_core::PileId;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(super) struct StoreCounters {
    puts: AtomicU64,
    gets: AtomicU64,
    bytes_written: AtomicU64,
    rotations: AtomicU64,
    recovered_bytes: AtomicU64,
}

impl StoreCounters {
    pub(super) fn record_put(&self, bytes: u64) {
        self.puts.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(super) fn record_get(&self) {
        self.gets.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn record_rotation(&self) {
        self.rotations.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn record_recovery(&self, bytes: u64) {
        self.recovered_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(super) fn snapshot(&self, active_pile: PileId, active_cursor: u64, keys: usize) -> HaystackStats {
        HaystackStats {
            puts: self.puts.load(Ordering::Relaxed),
            gets: self.gets.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
            recovered_bytes: self.recovered_bytes.load(Ordering::Relaxed),
            active_pile,
            active_cursor,
            keys,
        }
    }
}

/// Point-in-time view of store activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HaystackStats {
    /// Successful puts
    pub puts: u64,
    /// Successful gets
    pub gets: u64,
    /// Needle bytes appended by successful puts
    pub bytes_written: u64,
    /// Pile rotations
    pub rotations: u64,
    /// Uncommitted bytes trimmed by recovery
    pub recovered_bytes: u64,
    /// Pile currently receiving appends
    pub active_pile: PileId,
    /// Committed length of the active pile
    pub active_cursor: u64,
    /// Number of indexed keys
    pub keys: usize,
}
