//! Haystack - append-only blob store
//!
//! Values ("needles") are appended to size-bounded pile files and located
//! through a durable index mapping each key to `(pile, offset, size, flag)`.
//! Writes are never rewritten in place; overwriting a key appends a new
//! needle and repoints the index.
//!
//! # Quick Start
//!
//! ```ignore
//! use haystack::{Haystack, HaystackConfig};
//!
//! // Open (or create) a store in a data directory
//! let store = Haystack::open_dir("./data")?;
//!
//! store.put(b"photo:42", &jpeg_bytes, 0)?;
//! let bytes = store.get(b"photo:42")?;
//! ```
//!
//! # Architecture
//!
//! - `haystack-core`: errors, index types, limits and storage traits
//! - `haystack-durability`: needle codec, file stores and pile management
//! - `haystack-storage`: the index key-value engines
//! - `haystack-engine`: the store itself, recovery and verification
//!
//! Only the engine API is re-exported here.

pub use haystack_engine::*;
