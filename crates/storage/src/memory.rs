//! In-memory index engine
//!
//! Nothing survives the process. Used by `Haystack::ephemeral` and by tests
//! that do not care about restart behavior.

use crate::{apply_batch, bucket_get, bucket_len, bucket_scan, Buckets};
use haystack_core::{KeyValueStore, Result, WriteBatch};
use parking_lot::RwLock;

/// A `KeyValueStore` held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    buckets: RwLock<Buckets>,
}

impl MemoryKvStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKvStore {
    fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(bucket_get(&self.buckets.read(), bucket, key))
    }

    fn scan(&self, bucket: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(bucket_scan(&self.buckets.read(), bucket))
    }

    fn len(&self, bucket: &str) -> Result<usize> {
        Ok(bucket_len(&self.buckets.read(), bucket))
    }

    fn commit(&self, batch: WriteBatch) -> Result<()> {
        apply_batch(&mut self.buckets.write(), batch.into_ops());
        Ok(())
    }
}
