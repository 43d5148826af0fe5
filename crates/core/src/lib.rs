//! Core types and traits for Haystack
//!
//! This crate defines the foundational types used throughout the system:
//! - IndexEntry: durable pointer from a content key to its needle
//! - HaystackMeta: store-wide active pile id and write cursor
//! - HaystackError / CorruptionKind: error hierarchy
//! - Limits: key and payload size bounds
//! - CancelToken: caller-supplied cancellation and deadlines
//! - Traits: FileStore / FileHandle / KeyValueStore capabilities
//! - WriteBatch: atomic multi-bucket write set for a KeyValueStore

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod cancel;
pub mod error;
pub mod limits;
pub mod traits;
pub mod types;

pub use batch::{BatchPut, WriteBatch};
pub use cancel::CancelToken;
pub use error::{CorruptionKind, HaystackError, MagicField, Result};
pub use limits::{LimitError, Limits};
pub use traits::{FileHandle, FileStore, KeyValueStore};
pub use types::{DurabilityMode, HaystackMeta, IndexEntry, PileId, INDEX_ENTRY_SIZE};
