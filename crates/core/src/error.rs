//! Error types for Haystack
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use crate::types::PileId;
use std::fmt;
use std::io;
use thiserror::Error;

/// Result type alias for Haystack operations
pub type Result<T> = std::result::Result<T, HaystackError>;

/// Which of the two needle sentinels failed to match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MagicField {
    /// Sentinel at the start of the needle
    Head,
    /// Sentinel after the payload
    Foot,
}

impl fmt::Display for MagicField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MagicField::Head => f.write_str("head"),
            MagicField::Foot => f.write_str("foot"),
        }
    }
}

/// Ways a stored needle can fail integrity checks
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorruptionKind {
    /// A magic sentinel does not match its constant
    #[error("bad {field} magic: found {found:#010x}")]
    BadMagic {
        /// Which sentinel
        field: MagicField,
        /// Value found on disk
        found: u32,
    },

    /// Declared key/data sizes need more bytes than are available
    #[error("truncated record: need {needed} bytes, have {available}")]
    TruncatedRecord {
        /// Bytes required by the declared sizes
        needed: u64,
        /// Bytes actually available
        available: u64,
    },

    /// Stored checksum differs from the one recomputed over key and data
    #[error("checksum mismatch: expected {expected:016x}, computed {computed:016x}")]
    ChecksumMismatch {
        /// Checksum stored in the needle
        expected: u64,
        /// Checksum computed from the needle's key and data
        computed: u64,
    },

    /// The needle holds a different key than the one it was looked up by
    #[error("key mismatch: needle key does not match the requested key")]
    KeyMismatch,

    /// The record ends before the indexed size does
    #[error("size mismatch: record is {record} bytes, index says {indexed}")]
    SizeMismatch {
        /// Length of the decoded record
        record: u64,
        /// Length recorded in the index entry
        indexed: u64,
    },
}

/// Error types for the Haystack store
#[derive(Debug, Error)]
pub enum HaystackError {
    /// Key absent from the index (a normal negative result)
    #[error("key not found: {}", display_key(.key))]
    NotFound {
        /// The key that was looked up
        key: Vec<u8>,
    },

    /// Needle integrity violated
    #[error("corrupt needle in pile {pile} at offset {offset}: {kind}")]
    Corruption {
        /// Pile holding the needle
        pile: PileId,
        /// Byte offset of the needle within the pile
        offset: u64,
        /// What failed
        kind: CorruptionKind,
    },

    /// I/O error from the underlying file or index storage
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Fewer bytes available in a pile than requested
    #[error("short read from pile {pile} at offset {offset}: expected {expected} bytes, got {actual}")]
    ShortRead {
        /// Pile being read
        pile: PileId,
        /// Starting offset
        offset: u64,
        /// Bytes requested
        expected: u64,
        /// Bytes available
        actual: u64,
    },

    /// Rotation metadata could not be persisted
    #[error("pile rotation failed: {0}")]
    Rotation(String),

    /// The index batch could not be committed
    #[error("index transaction failed: {0}")]
    Transaction(String),

    /// Internal invariant violated (index and piles disagree)
    #[error("inconsistent store: {0}")]
    Inconsistent(String),

    /// The caller's cancel token fired or its deadline passed
    #[error("operation cancelled")]
    Cancelled,

    /// The store has been closed
    #[error("store is closed")]
    Closed,

    /// Rejected input (empty key, oversized payload)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// The data directory is held by another process
    #[error("store is locked: {0}")]
    Locked(String),
}

impl HaystackError {
    /// Build a corruption error for a needle at `pile`/`offset`
    pub fn corruption(pile: PileId, offset: u64, kind: CorruptionKind) -> Self {
        HaystackError::Corruption { pile, offset, kind }
    }

    /// Build an invariant-violation error
    pub fn inconsistent(msg: impl Into<String>) -> Self {
        HaystackError::Inconsistent(msg.into())
    }

    /// Build a transaction error
    pub fn transaction(msg: impl Into<String>) -> Self {
        HaystackError::Transaction(msg.into())
    }

    /// Build an invalid-input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        HaystackError::InvalidInput(msg.into())
    }

    /// True for [`HaystackError::NotFound`]
    pub fn is_not_found(&self) -> bool {
        matches!(self, HaystackError::NotFound { .. })
    }

    /// True for [`HaystackError::Corruption`]
    pub fn is_corruption(&self) -> bool {
        matches!(self, HaystackError::Corruption { .. })
    }

    /// The corruption kind, if this is a corruption error
    pub fn corruption_kind(&self) -> Option<&CorruptionKind> {
        match self {
            HaystackError::Corruption { kind, .. } => Some(kind),
            _ => None,
        }
    }
}

/// Render a key for messages: printable UTF-8 as-is, anything else as hex.
fn display_key(key: &[u8]) -> String {
    match std::str::from_utf8(key) {
        Ok(s) if s.chars().all(|c| !c.is_control()) => s.to_string(),
        _ => key.iter().map(|b| format!("{:02x}", b)).collect(),
    }
}
