//! Active pile recovery
//!
//! The committed cursor is the authority over the active pile's length. A
//! crash between appending a needle and committing its index entry leaves
//! bytes past the cursor; they belong to no key and are cut off here.
//!
//! A pile shorter than its cursor is the opposite failure: bytes the index
//! already points at are gone. That cannot be repaired by trimming, so it is
//! reported as `Inconsistent`.

use super::Haystack;
use haystack_core::{FileStore, HaystackError, KeyValueStore, Result};
use tracing::{info, warn};

impl<F: FileStore, K: KeyValueStore> Haystack<F, K> {
    /// Truncate the active pile back to the committed cursor.
    ///
    /// Returns the number of bytes discarded.
    pub fn recover(&self) -> Result<u64> {
        let active = self.writer.lock();
        let len = self.piles.len(active.id)?;

        if len < active.cursor {
            return Err(HaystackError::inconsistent(format!(
                "pile {} is {} bytes but the committed cursor is {}",
                active.id, len, active.cursor
            )));
        }
        if len == active.cursor {
            return Ok(0);
        }

        let discarded = len - active.cursor;
        warn!(
            target: "haystack::recovery",
            pile = active.id,
            cursor = active.cursor,
            len,
            discarded,
            "Trimming uncommitted bytes from active pile"
        );
        self.piles.truncate(active.id, active.cursor)?;
        self.piles.sync(active.id)?;
        self.counters.record_recovery(discarded);

        info!(
            target: "haystack::recovery",
            pile = active.id,
            len = active.cursor,
            "Recovery complete"
        );
        Ok(discarded)
    }
}
