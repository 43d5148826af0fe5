//! Typed index over a [`KeyValueStore`]
//!
//! Two buckets:
//!
//! - `haystack_index`: content key → 32-byte [`IndexEntry`]
//! - `haystack_meta`: `current_pile_idx` and `current_pile_cur`, each a
//!   little-endian `u64`
//!
//! The metadata pair is always written together. Finding only one of the
//! two keys means the engine lost half a batch, which is reported as
//! `Inconsistent` rather than guessed around.

use haystack_core::{
    HaystackError, HaystackMeta, IndexEntry, KeyValueStore, Result, WriteBatch,
};

/// Bucket holding one entry per live key
pub const INDEX_BUCKET: &str = "haystack_index";

/// Bucket holding the active pile id and cursor
pub const META_BUCKET: &str = "haystack_meta";

/// Metadata key for the active pile id
pub const META_PILE_KEY: &[u8] = b"current_pile_idx";

/// Metadata key for the active pile cursor
pub const META_CURSOR_KEY: &[u8] = b"current_pile_cur";

/// Key → needle location index plus store metadata
#[derive(Debug)]
pub struct IndexStore<K: KeyValueStore> {
    kv: K,
}

impl<K: KeyValueStore> IndexStore<K> {
    /// Wrap an engine
    pub fn new(kv: K) -> Self {
        IndexStore { kv }
    }

    /// Underlying engine
    pub fn engine(&self) -> &K {
        &self.kv
    }

    /// Look up the entry for `key`
    pub fn get(&self, key: &[u8]) -> Result<Option<IndexEntry>> {
        match self.kv.get(INDEX_BUCKET, key)? {
            Some(bytes) => decode_entry(key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Insert or overwrite the entry for `key`
    pub fn put(&self, key: &[u8], entry: IndexEntry) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(INDEX_BUCKET, key.to_vec(), entry.to_bytes().to_vec());
        self.kv.commit(batch)
    }

    /// Read the store metadata; `None` before bootstrap
    pub fn get_metadata(&self) -> Result<Option<HaystackMeta>> {
        let pile = self.kv.get(META_BUCKET, META_PILE_KEY)?;
        let cursor = self.kv.get(META_BUCKET, META_CURSOR_KEY)?;
        match (pile, cursor) {
            (None, None) => Ok(None),
            (Some(pile), Some(cursor)) => Ok(Some(HaystackMeta::new(
                decode_u64(META_PILE_KEY, &pile)?,
                decode_u64(META_CURSOR_KEY, &cursor)?,
            ))),
            (Some(_), None) => Err(HaystackError::inconsistent(
                "metadata has an active pile id but no cursor",
            )),
            (None, Some(_)) => Err(HaystackError::inconsistent(
                "metadata has a cursor but no active pile id",
            )),
        }
    }

    /// Write the store metadata
    pub fn put_metadata(&self, meta: HaystackMeta) -> Result<()> {
        let mut batch = WriteBatch::new();
        push_metadata(&mut batch, meta);
        self.kv.commit(batch)
    }

    /// Write an entry and the metadata in one transaction
    pub fn commit_put(&self, key: &[u8], entry: IndexEntry, meta: HaystackMeta) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(INDEX_BUCKET, key.to_vec(), entry.to_bytes().to_vec());
        push_metadata(&mut batch, meta);
        self.kv.commit(batch)
    }

    /// Number of indexed keys
    pub fn len(&self) -> Result<usize> {
        self.kv.len(INDEX_BUCKET)
    }

    /// True if no key is indexed
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Every indexed key with its entry, in unspecified order
    pub fn entries(&self) -> Result<Vec<(Vec<u8>, IndexEntry)>> {
        self.kv
            .scan(INDEX_BUCKET)?
            .into_iter()
            .map(|(key, bytes)| {
                let entry = decode_entry(&key, &bytes)?;
                Ok((key, entry))
            })
            .collect()
    }

    /// Ask the engine to reclaim space
    pub fn compact(&self) -> Result<bool> {
        self.kv.compact()
    }
}

fn push_metadata(batch: &mut WriteBatch, meta: HaystackMeta) {
    batch.put(
        META_BUCKET,
        META_PILE_KEY.to_vec(),
        meta.active_pile_id.to_le_bytes().to_vec(),
    );
    batch.put(
        META_BUCKET,
        META_CURSOR_KEY.to_vec(),
        meta.active_pile_cursor.to_le_bytes().to_vec(),
    );
}

fn decode_entry(key: &[u8], bytes: &[u8]) -> Result<IndexEntry> {
    IndexEntry::from_bytes(bytes).ok_or_else(|| {
        HaystackError::inconsistent(format!(
            "index entry for key of {} bytes has length {}",
            key.len(),
            bytes.len()
        ))
    })
}

fn decode_u64(name: &[u8], bytes: &[u8]) -> Result<u64> {
    let arr: [u8; 8] = bytes.try_into().map_err(|_| {
        HaystackError::inconsistent(format!(
            "metadata value {} has length {}",
            String::from_utf8_lossy(name),
            bytes.len()
        ))
    })?;
    Ok(u64::from_le_bytes(arr))
}
