//! Sequential pile scanning
//!
//! Walks a pile from offset 0, decoding one needle at a time. Used by
//! verification and recovery to find where the valid prefix of a pile ends.
//!
//! The scanner trusts nothing it reads: declared sizes are checked against
//! the pile length before any payload is read. Scanning stops at the first
//! corrupt or incomplete record, since nothing after it can be framed.

use crate::format::needle::{decode, NeedleHeader, NEEDLE_HEADER_SIZE, NEEDLE_OVERHEAD};
use haystack_core::{CorruptionKind, FileHandle, PileId, Result};

/// One step of a pile scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanItem {
    /// A well-formed needle
    Needle {
        /// Offset of the needle within the pile
        offset: u64,
        /// Encoded length
        size: u64,
        /// Content key
        key: Vec<u8>,
        /// Opaque flag
        flag: u64,
    },
    /// The record starting at `offset` could not be decoded
    Corrupt {
        /// Offset of the bad record
        offset: u64,
        /// What was wrong with it
        kind: CorruptionKind,
    },
}

/// Iterator over the needles of one pile
///
/// Yields `Err` only for I/O failures. Corruption is reported as
/// [`ScanItem::Corrupt`] and ends the scan.
pub struct PileScanner<H: FileHandle> {
    pile: PileId,
    handle: H,
    offset: u64,
    end: u64,
    done: bool,
}

impl<H: FileHandle> PileScanner<H> {
    /// Scan `handle` from the start up to its current length
    pub fn new(pile: PileId, handle: H) -> Result<Self> {
        let end = handle.len()?;
        Ok(Self::with_end(pile, handle, end))
    }

    /// Scan `handle` from the start up to `end`
    pub fn with_end(pile: PileId, handle: H, end: u64) -> Self {
        PileScanner {
            pile,
            handle,
            offset: 0,
            end,
            done: false,
        }
    }

    /// Pile being scanned
    pub fn pile(&self) -> PileId {
        self.pile
    }

    /// Offset just past the last needle yielded so far
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn read_exact(&self, offset: u64, buf: &mut [u8]) -> Result<bool> {
        let n = self.handle.read_at(offset, buf)?;
        Ok(n == buf.len())
    }

    fn truncated(&self, needed: u64) -> ScanItem {
        ScanItem::Corrupt {
            offset: self.offset,
            kind: CorruptionKind::TruncatedRecord {
                needed,
                available: self.end - self.offset,
            },
        }
    }

    fn next_item(&mut self) -> Result<ScanItem> {
        let start = self.offset;
        let available = self.end - start;

        if available < NEEDLE_OVERHEAD as u64 {
            return Ok(self.truncated(NEEDLE_OVERHEAD as u64));
        }

        let mut header = [0u8; NEEDLE_HEADER_SIZE];
        if !self.read_exact(start, &mut header)? {
            return Ok(self.truncated(NEEDLE_HEADER_SIZE as u64));
        }
        let header = match NeedleHeader::from_bytes(&header) {
            Ok(h) => h,
            Err(kind) => return Ok(ScanItem::Corrupt { offset: start, kind }),
        };

        let data_size_at = header.data_size_offset();
        if data_size_at + 4 > available {
            return Ok(self.truncated(data_size_at + 4));
        }
        let mut size_buf = [0u8; 4];
        if !self.read_exact(start + data_size_at, &mut size_buf)? {
            return Ok(self.truncated(data_size_at + 4));
        }
        let data_size = u32::from_le_bytes(size_buf) as u64;

        let total = NEEDLE_OVERHEAD as u64 + header.key_size as u64 + data_size;
        if total > available {
            return Ok(self.truncated(total));
        }

        let mut record = vec![0u8; total as usize];
        if !self.read_exact(start, &mut record)? {
            return Ok(self.truncated(total));
        }
        match decode(&record) {
            Ok(needle) => {
                self.offset = start + total;
                Ok(ScanItem::Needle {
                    offset: start,
                    size: total,
                    key: needle.key,
                    flag: needle.flag,
                })
            }
            Err(kind) => Ok(ScanItem::Corrupt { offset: start, kind }),
        }
    }
}

impl<H: FileHandle> Iterator for PileScanner<H> {
    type Item = Result<ScanItem>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset >= self.end {
            return None;
        }
        let item = self.next_item();
        if !matches!(item, Ok(ScanItem::Needle { .. })) {
            self.done = true;
        }
        Some(item)
    }
}
