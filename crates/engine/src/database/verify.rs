//! Offline-style consistency check
//!
//! Walks every pile needle by needle and cross-references what it finds with
//! the index. Nothing is repaired; the report says what is there.

use super::Haystack;
use haystack_core::{CorruptionKind, FileStore, KeyValueStore, PileId, Result};
use haystack_durability::{PileScanner, ScanItem};
use rustc_hash::FxHashMap;
use tracing::{info, warn};

/// A record that could not be decoded during verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptNeedle {
    /// Pile holding the record
    pub pile: PileId,
    /// Offset where decoding failed
    pub offset: u64,
    /// What was wrong
    pub kind: CorruptionKind,
}

/// Result of [`Haystack::verify`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Piles scanned
    pub piles: usize,
    /// Well-formed needles found
    pub needles: u64,
    /// Needles the index currently points at
    pub live: u64,
    /// Needles superseded by a later put of the same key
    pub stale: u64,
    /// Records that failed to decode; each ends the scan of its pile
    pub corrupt: Vec<CorruptNeedle>,
    /// Keys whose index entry points at no well-formed needle
    pub dangling: Vec<Vec<u8>>,
}

impl VerifyReport {
    /// True if every needle decoded and every index entry resolved
    pub fn is_clean(&self) -> bool {
        self.corrupt.is_empty() && self.dangling.is_empty()
    }
}

impl<F: FileStore, K: KeyValueStore> Haystack<F, K> {
    /// Scan every pile and check it against the index
    pub fn verify(&self) -> Result<VerifyReport> {
        self.ensure_open()?;
        let active = *self.writer.lock();

        // (pile, offset) -> (key, size) for every live entry
        let mut live: FxHashMap<(PileId, u64), (Vec<u8>, u64)> = FxHashMap::default();
        for (key, entry) in self.index.entries()? {
            live.insert((entry.pile, entry.offset), (key, entry.size));
        }

        let mut report = VerifyReport::default();
        for pile in self.piles.list_piles()? {
            let handle = self.piles.reader(pile)?;
            // Bytes past the active cursor belong to an in-flight put
            let scanner = if pile == active.id {
                PileScanner::with_end(pile, handle, active.cursor)
            } else {
                PileScanner::new(pile, handle)?
            };
            report.piles += 1;

            for item in scanner {
                match item? {
                    ScanItem::Needle {
                        offset, size, key, ..
                    } => {
                        report.needles += 1;
                        let matches = live
                            .get(&(pile, offset))
                            .is_some_and(|(k, s)| *k == key && *s == size);
                        if matches {
                            live.remove(&(pile, offset));
                            report.live += 1;
                        } else {
                            report.stale += 1;
                        }
                    }
                    ScanItem::Corrupt { offset, kind } => {
                        warn!(target: "haystack::store", pile, offset, %kind, "Verification found corrupt record");
                        report.corrupt.push(CorruptNeedle { pile, offset, kind });
                    }
                }
            }
        }

        report.dangling = live.into_values().map(|(key, _)| key).collect();
        report.dangling.sort();

        info!(
            target: "haystack::store",
            piles = report.piles,
            needles = report.needles,
            live = report.live,
            stale = report.stale,
            corrupt = report.corrupt.len(),
            dangling = report.dangling.len(),
            "Verification complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use crate::database::{EphemeralHaystack, Haystack, HaystackConfig};
    use haystack_core::{CorruptionKind, FileHandle, FileStore, IndexEntry};

    fn store() -> EphemeralHaystack {
        Haystack::ephemeral(HaystackConfig::new().with_max_pile_size(1024)).unwrap()
    }

    #[test]
    fn test_empty_store_is_clean() {
        let report = store().verify().unwrap();
        assert!(report.is_clean());
        assert_eq!(report.needles, 0);
        assert_eq!(report.piles, 1);
    }

    #[test]
    fn test_live_and_stale() {
        let store = store();
        store.put(b"a", b"1", 0).unwrap();
        store.put(b"b", b"2", 0).unwrap();
        store.put(b"a", b"3", 0).unwrap();

        let report = store.verify().unwrap();
        assert!(report.is_clean());
        assert_eq!(report.needles, 3);
        assert_eq!(report.live, 2);
        assert_eq!(report.stale, 1);
    }

    #[test]
    fn test_spans_rotated_piles() {
        let store = store();
        let data = vec![9u8; 500];
        for key in [&b"a"[..], b"b", b"c", b"d"] {
            store.put(key, &data, 0).unwrap();
        }
        let report = store.verify().unwrap();
        assert!(report.piles >= 2);
        assert_eq!(report.live, 4);
        assert!(report.is_clean());
    }

    #[test]
    fn test_reports_corruption() {
        let store = store();
        store.put(b"a", b"payload", 0).unwrap();
        let entry = store.entry(b"a").unwrap().unwrap();

        // Overwrite the first payload byte in place
        let pile = store.piles.files().open("pile-000000.pile").unwrap().unwrap();
        let len = pile.len().unwrap();
        let mut bytes = vec![0u8; len as usize];
        pile.read_at(0, &mut bytes).unwrap();
        bytes[16 + 1 + 4] ^= 0xFF;
        pile.truncate(0).unwrap();
        pile.append(&bytes).unwrap();

        let report = store.verify().unwrap();
        assert_eq!(report.corrupt.len(), 1);
        assert_eq!(report.corrupt[0].offset, entry.offset);
        assert!(matches!(
            report.corrupt[0].kind,
            CorruptionKind::ChecksumMismatch { .. }
        ));
        assert_eq!(report.dangling, vec![b"a".to_vec()]);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_reports_dangling_entry() {
        let store = store();
        store.put(b"real", b"v", 0).unwrap();
        store
            .index
            .put(b"ghost", IndexEntry::new(0, 1000, 40, 0))
            .unwrap();
        let report = store.verify().unwrap();
        assert_eq!(report.dangling, vec![b"ghost".to_vec()]);
        assert_eq!(report.live, 1);
    }
}
