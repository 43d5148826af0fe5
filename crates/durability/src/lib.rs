//! Durability layer for Haystack
//!
//! This crate handles everything that touches pile files:
//!
//! - Needle format: the self-describing record written for every put
//! - Pile naming: `pile-NNNNNN.pile`, one file per pile id
//! - PileStore: append, positional read, rotation check, truncation
//! - PileScanner: walks a pile needle by needle for verification
//! - File stores: `LocalFileStore` (directory on disk) and `MemoryFileStore`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod file_store;
pub mod format;
pub mod pile;
pub mod scan;

pub use file_store::{
    CachingFile, CachingFileStore, LocalFile, LocalFileStore, MemoryFile, MemoryFileStore,
};
pub use format::needle::{
    checksum, decode, encode, encoded_len, Needle, NeedleHeader, MAGIC_FOOT, MAGIC_HEAD,
    NEEDLE_HEADER_SIZE, NEEDLE_OVERHEAD,
};
pub use pile::{parse_pile_file_name, pile_file_name, PileConfig, PileConfigError, PileStore};
pub use scan::{PileScanner, ScanItem};
