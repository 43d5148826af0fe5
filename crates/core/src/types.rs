//! Index and metadata types
//!
//! These are the durable pointers that tie a content key to the bytes of its
//! needle. Both have fixed little-endian encodings so the index engine can
//! store them as opaque values.

/// Numeric pile identifier, assigned monotonically starting at 0
pub type PileId = u64;

/// Encoded size of an [`IndexEntry`]: four little-endian `u64`s
pub const INDEX_ENTRY_SIZE: usize = 32;

/// Location of a needle: `{pile, offset, size, flag}`
///
/// One entry per live key; a `Put` for an existing key overwrites it.
/// The flag is opaque and copied from the needle it points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IndexEntry {
    /// Pile holding the needle
    pub pile: PileId,
    /// Byte offset of the needle within the pile
    pub offset: u64,
    /// Encoded needle length in bytes
    pub size: u64,
    /// Opaque record flag
    pub flag: u64,
}

impl IndexEntry {
    /// Create a new index entry
    pub fn new(pile: PileId, offset: u64, size: u64, flag: u64) -> Self {
        IndexEntry {
            pile,
            offset,
            size,
            flag,
        }
    }

    /// First byte past the needle, or `None` on overflow
    pub fn end(&self) -> Option<u64> {
        self.offset.checked_add(self.size)
    }

    /// Serialize to the 32-byte on-disk form
    pub fn to_bytes(&self) -> [u8; INDEX_ENTRY_SIZE] {
        let mut bytes = [0u8; INDEX_ENTRY_SIZE];
        bytes[0..8].copy_from_slice(&self.pile.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.offset.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.size.to_le_bytes());
        bytes[24..32].copy_from_slice(&self.flag.to_le_bytes());
        bytes
    }

    /// Deserialize from the on-disk form
    ///
    /// Returns `None` unless `bytes` is exactly [`INDEX_ENTRY_SIZE`] long.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != INDEX_ENTRY_SIZE {
            return None;
        }
        Some(IndexEntry {
            pile: u64::from_le_bytes(bytes[0..8].try_into().ok()?),
            offset: u64::from_le_bytes(bytes[8..16].try_into().ok()?),
            size: u64::from_le_bytes(bytes[16..24].try_into().ok()?),
            flag: u64::from_le_bytes(bytes[24..32].try_into().ok()?),
        })
    }
}

/// Store-wide write position: which pile is active and where its next append lands
///
/// `active_pile_cursor` is the authority over the active pile's logical
/// length. Bytes past it are uncommitted and are trimmed on recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HaystackMeta {
    /// Pile currently receiving appends
    pub active_pile_id: PileId,
    /// Committed length of the active pile
    pub active_pile_cursor: u64,
}

impl HaystackMeta {
    /// Create metadata for a given pile and cursor
    pub fn new(active_pile_id: PileId, active_pile_cursor: u64) -> Self {
        HaystackMeta {
            active_pile_id,
            active_pile_cursor,
        }
    }

    /// Metadata written the first time a store is opened
    pub fn bootstrap() -> Self {
        HaystackMeta::new(0, 0)
    }
}

/// When appended bytes are forced to stable storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurabilityMode {
    /// fsync the pile and the index on every put (the default)
    ///
    /// An index entry is never durable before the bytes it points at.
    #[default]
    Always,

    /// Leave flushing to the OS page cache
    ///
    /// A crash may lose recent puts; recovery still trims the pile back to
    /// the last committed cursor.
    Cache,
}

impl DurabilityMode {
    /// Whether writes must be fsynced before they are acknowledged
    pub fn requires_sync(&self) -> bool {
        matches!(self, DurabilityMode::Always)
    }
}
