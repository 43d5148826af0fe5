//! Store engine for Haystack
//!
//! This crate orchestrates all lower layers:
//! - Haystack: the store, with open/close, put/get and recovery
//! - Configuration via `haystack.toml`
//! - Data directory layout and process locking
//! - Verification and statistics
//!
//! The engine is the only component that knows about:
//! - The active pile and its committed cursor
//! - Ordering between pile appends and index commits
//! - Recovery of uncommitted pile bytes

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod database;

pub use database::{
    CachedDiskHaystack, ConfigError, CorruptNeedle, DataDir, DiskHaystack, EphemeralHaystack, Haystack,
    HaystackConfig, HaystackStats, StoreState, VerifyReport, CONFIG_FILE_NAME,
};

pub use haystack_core::{
    CancelToken, CorruptionKind, DurabilityMode, FileHandle, FileStore, HaystackError,
    HaystackMeta, IndexEntry, KeyValueStore, LimitError, Limits, MagicField, PileId, Result,
    WriteBatch,
};
pub use haystack_durability::{CachingFileStore, LocalFileStore, MemoryFileStore};
pub use haystack_storage::{LogKvStore, MemoryKvStore};
