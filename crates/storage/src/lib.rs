//! Index layer for Haystack
//!
//! This crate implements the key → needle location index:
//! - IndexStore: typed view over a KeyValueStore (entries + metadata buckets)
//! - LogKvStore: durable engine backed by a CRC-framed batch log
//! - MemoryKvStore: in-memory engine for ephemeral stores and tests
//! - LogRecord: on-disk record format of the batch log
//!
//! # Visibility
//!
//! Both engines apply a committed batch under a single write lock, so a
//! reader sees either none or all of the batch's puts.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod format;
pub mod index;
pub mod log_kv;
pub mod memory;

pub use format::{LogRecord, LogRecordError, LOG_RECORD_FORMAT_VERSION};
pub use index::{IndexStore, INDEX_BUCKET, META_BUCKET, META_CURSOR_KEY, META_PILE_KEY};
pub use log_kv::{LogKvStore, INDEX_LOG_FILE};
pub use memory::MemoryKvStore;

use rustc_hash::FxHashMap;

/// Bucket name → key → value
pub(crate) type Buckets = FxHashMap<String, FxHashMap<Vec<u8>, Vec<u8>>>;

/// Apply a batch's puts to `buckets`, later puts winning
pub(crate) fn apply_batch(buckets: &mut Buckets, ops: Vec<haystack_core::BatchPut>) {
    for op in ops {
        buckets.entry(op.bucket).or_default().insert(op.key, op.value);
    }
}

pub(crate) fn bucket_get(buckets: &Buckets, bucket: &str, key: &[u8]) -> Option<Vec<u8>> {
    buckets.get(bucket).and_then(|b| b.get(key)).cloned()
}

pub(crate) fn bucket_scan(buckets: &Buckets, bucket: &str) -> Vec<(Vec<u8>, Vec<u8>)> {
    buckets
        .get(bucket)
        .map(|b| b.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

pub(crate) fn bucket_len(buckets: &Buckets, bucket: &str) -> usize {
    buckets.get(bucket).map_or(0, |b| b.len())
}
