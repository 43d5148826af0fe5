//! Capability traits consumed by the store
//!
//! The orchestrator never touches the filesystem or the index engine
//! directly. It goes through these traits so pile files can live on local
//! disk, in memory, or behind a caching layer, and the index can be any
//! engine that commits multi-bucket batches atomically.
//!
//! Thread safety: all methods must be safe to call concurrently from
//! multiple threads (requires Send + Sync).

use crate::batch::WriteBatch;
use crate::error::Result;
use std::io;

/// An open, growable byte file
///
/// Handles are cheap to clone; clones refer to the same underlying file.
/// Appends through one handle are serialized; `read_at` may run
/// concurrently with appends and with other reads.
pub trait FileHandle: Clone + Send + Sync + 'static {
    /// Append `bytes` at the end of the file, returning the offset where
    /// they begin.
    fn append(&self, bytes: &[u8]) -> io::Result<u64>;

    /// Read into `buf` starting at `offset`.
    ///
    /// Fills as much of `buf` as the file allows and returns the number of
    /// bytes read, which is less than `buf.len()` only at end of file.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Current file length in bytes
    fn len(&self) -> io::Result<u64>;

    /// True if the file holds no bytes
    fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Shrink the file to `len` bytes
    ///
    /// A `len` past the current end is rejected with `InvalidInput`.
    fn truncate(&self, len: u64) -> io::Result<()>;

    /// Force written bytes to stable storage
    fn sync(&self) -> io::Result<()>;
}

/// A namespace of files addressed by name
pub trait FileStore: Send + Sync + 'static {
    /// Handle type returned by this store
    type Handle: FileHandle;

    /// Open a file, creating it empty if it does not exist
    fn open_or_create(&self, name: &str) -> io::Result<Self::Handle>;

    /// Open an existing file; `None` if it does not exist
    fn open(&self, name: &str) -> io::Result<Option<Self::Handle>>;

    /// Names of all files in the store
    fn list(&self) -> io::Result<Vec<String>>;
}

/// A named-bucket key-value engine with atomic batch commit
pub trait KeyValueStore: Send + Sync + 'static {
    /// Get the value for `key` in `bucket`
    fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// All key/value pairs in `bucket`, in unspecified order
    fn scan(&self, bucket: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Number of keys in `bucket`
    fn len(&self, bucket: &str) -> Result<usize> {
        Ok(self.scan(bucket)?.len())
    }

    /// Commit every put in `batch`, or none of them
    ///
    /// Readers observe either the state before the batch or the state after
    /// it, never a mix.
    fn commit(&self, batch: WriteBatch) -> Result<()>;

    /// Reclaim space held by overwritten values
    ///
    /// Returns `false` if the engine has nothing to compact.
    fn compact(&self) -> Result<bool> {
        Ok(false)
    }
}
