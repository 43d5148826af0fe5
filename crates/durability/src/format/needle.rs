//! Needle record format.
//!
//! A pile is a packed sequence of needles with no header and no padding
//! between records. Every integer is little-endian.
//!
//! # Record Layout
//!
//! ```text
//! ┌────────────┬──────────┬──────────────┬─────────────┬───────────────┬──────────────┬────────────┬──────────────┐
//! │ MagicHd (4)│ Flag (8) │ KeySize (4)  │ Key (var)   │ DataSize (4)  │ Data (var)   │ MagicFt (4)│ Checksum (8) │
//! └────────────┴──────────┴──────────────┴─────────────┴───────────────┴──────────────┴────────────┴──────────────┘
//! ```
//!
//! The checksum is XXH3-64 (seed 0) over `key ++ data`. The head and foot
//! sentinels are distinct so a scanner can recognise a record boundary from
//! either side.

use haystack_core::{CorruptionKind, MagicField};
use xxhash_rust::xxh3::Xxh3;

/// Sentinel at the start of every needle
pub const MAGIC_HEAD: u32 = 0x0044_BEEF;

/// Sentinel between the payload and the checksum
pub const MAGIC_FOOT: u32 = 0x00BE_EF44;

/// Bytes before the key: magic head (4) + flag (8) + key size (4)
pub const NEEDLE_HEADER_SIZE: usize = 16;

/// Fixed bytes in every needle: header (16) + data size (4) + magic foot (4) + checksum (8)
pub const NEEDLE_OVERHEAD: usize = 32;

/// A decoded needle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Needle {
    /// Opaque record flag
    pub flag: u64,
    /// Content key
    pub key: Vec<u8>,
    /// Payload
    pub data: Vec<u8>,
}

impl Needle {
    /// Create a new needle
    pub fn new(key: Vec<u8>, data: Vec<u8>, flag: u64) -> Self {
        Needle { flag, key, data }
    }

    /// Length of this needle once encoded
    pub fn encoded_len(&self) -> usize {
        encoded_len(self.key.len(), self.data.len())
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        encode(&self.key, &self.data, self.flag)
    }

    /// Deserialize from exactly one encoded needle
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CorruptionKind> {
        decode(bytes)
    }
}

/// The fixed prefix of a needle, readable without the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeedleHeader {
    /// Opaque record flag
    pub flag: u64,
    /// Declared key length
    pub key_size: u32,
}

impl NeedleHeader {
    /// Parse the first [`NEEDLE_HEADER_SIZE`] bytes of a needle
    ///
    /// Only the head sentinel is verified; sizes are not trusted until the
    /// full record is decoded.
    pub fn from_bytes(bytes: &[u8; NEEDLE_HEADER_SIZE]) -> Result<Self, CorruptionKind> {
        let magic = le_u32(&bytes[0..4]);
        if magic != MAGIC_HEAD {
            return Err(CorruptionKind::BadMagic {
                field: MagicField::Head,
                found: magic,
            });
        }
        Ok(NeedleHeader {
            flag: le_u64(&bytes[4..12]),
            key_size: le_u32(&bytes[12..16]),
        })
    }

    /// Offset of the `data_size` field relative to the needle start
    pub fn data_size_offset(&self) -> u64 {
        NEEDLE_HEADER_SIZE as u64 + self.key_size as u64
    }
}

/// Encoded length of a needle with the given key and payload lengths
pub fn encoded_len(key_len: usize, data_len: usize) -> usize {
    NEEDLE_OVERHEAD + key_len + data_len
}

/// XXH3-64 over `key ++ data`
pub fn checksum(key: &[u8], data: &[u8]) -> u64 {
    let mut hasher = Xxh3::new();
    hasher.update(key);
    hasher.update(data);
    hasher.digest()
}

/// Encode a needle.
///
/// Callers validate lengths first (see `haystack_core::Limits`): `key` and
/// `data` must each fit in a `u32`.
pub fn encode(key: &[u8], data: &[u8], flag: u64) -> Vec<u8> {
    debug_assert!(key.len() <= u32::MAX as usize);
    debug_assert!(data.len() <= u32::MAX as usize);

    let mut buf = Vec::with_capacity(encoded_len(key.len(), data.len()));
    buf.extend_from_slice(&MAGIC_HEAD.to_le_bytes());
    buf.extend_from_slice(&flag.to_le_bytes());
    buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
    buf.extend_from_slice(key);
    buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
    buf.extend_from_slice(data);
    buf.extend_from_slice(&MAGIC_FOOT.to_le_bytes());
    buf.extend_from_slice(&checksum(key, data).to_le_bytes());
    buf
}

/// Decode exactly one needle from `bytes`.
///
/// `bytes` must be the whole record and nothing else: declared sizes are
/// checked against `bytes.len()` before anything is copied, and leftover
/// bytes after the checksum are reported as [`CorruptionKind::SizeMismatch`].
pub fn decode(bytes: &[u8]) -> Result<Needle, CorruptionKind> {
    let mut reader = Reader::new(bytes);

    let magic_head = reader.u32()?;
    if magic_head != MAGIC_HEAD {
        return Err(CorruptionKind::BadMagic {
            field: MagicField::Head,
            found: magic_head,
        });
    }
    let flag = reader.u64()?;
    let key_size = reader.u32()? as usize;
    let key = reader.take(key_size)?;
    let data_size = reader.u32()? as usize;
    let data = reader.take(data_size)?;

    let magic_foot = reader.u32()?;
    if magic_foot != MAGIC_FOOT {
        return Err(CorruptionKind::BadMagic {
            field: MagicField::Foot,
            found: magic_foot,
        });
    }

    let stored = reader.u64()?;
    let computed = checksum(key, data);
    if stored != computed {
        return Err(CorruptionKind::ChecksumMismatch {
            expected: stored,
            computed,
        });
    }

    if reader.remaining() != 0 {
        return Err(CorruptionKind::SizeMismatch {
            record: reader.position() as u64,
            indexed: bytes.len() as u64,
        });
    }

    Ok(Needle {
        flag,
        key: key.to_vec(),
        data: data.to_vec(),
    })
}

/// Bounds-checked cursor over a needle's bytes
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, pos: 0 }
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CorruptionKind> {
        if n > self.remaining() {
            return Err(CorruptionKind::TruncatedRecord {
                needed: self.pos as u64 + n as u64,
                available: self.bytes.len() as u64,
            });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, CorruptionKind> {
        self.take(4).map(le_u32)
    }

    fn u64(&mut self) -> Result<u64, CorruptionKind> {
        self.take(8).map(le_u64)
    }
}

fn le_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

fn le_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}
