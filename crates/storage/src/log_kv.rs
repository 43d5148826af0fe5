//! Durable index engine backed by a batch log
//!
//! Every committed [`WriteBatch`] becomes one CRC-framed record appended to
//! `<dir>/index.log`. The full key space is held in memory and rebuilt by
//! replaying the log on open.
//!
//! # Recovery
//!
//! - Partial record at the tail: torn write, truncated with a warning.
//! - Checksum failure in the final record: torn write, truncated.
//! - Any damage with a valid record somewhere after it, including a broken
//!   length prefix: the log was damaged in place, so `open` fails rather
//!   than silently dropping committed batches.
//!
//! # Compaction
//!
//! Overwrites leave dead values in the log. `compact` writes the live state
//! to `index.log.compact`, fsyncs it and renames it over the log, so a crash
//! at any point leaves either the old log or the new one.

use crate::format::{LogRecord, LogRecordError};
use crate::{apply_batch, bucket_get, bucket_len, bucket_scan, Buckets};
use haystack_core::{BatchPut, DurabilityMode, HaystackError, KeyValueStore, Result, WriteBatch};
use parking_lot::{Mutex, RwLock};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File name of the batch log inside the index directory
pub const INDEX_LOG_FILE: &str = "index.log";

const COMPACT_FILE: &str = "index.log.compact";

/// Length prefix + version + count + CRC of an empty record
const MIN_FRAMED_RECORD: usize = 13;

/// Puts per record when rewriting the log
const COMPACT_CHUNK: usize = 4096;

/// Append side of the log
struct LogWriter {
    file: File,
    /// Length of the log up to the last committed record
    len: u64,
    /// Records in the log
    records: u64,
}

impl LogWriter {
    fn append(&mut self, bytes: &[u8], durability: DurabilityMode) -> std::io::Result<()> {
        self.file.write_all(bytes)?;
        if durability.requires_sync() {
            self.file.sync_data()?;
        }
        self.len += bytes.len() as u64;
        self.records += 1;
        Ok(())
    }

    /// Drop anything written past the last committed record
    fn rollback(&mut self) {
        let result = self
            .file
            .set_len(self.len)
            .and_then(|_| self.file.seek(SeekFrom::Start(self.len)).map(|_| ()));
        if let Err(e) = result {
            warn!(target: "haystack::index", error = %e, len = self.len, "Failed to roll back index log");
        }
    }
}

/// A `KeyValueStore` persisted as an append-only batch log
pub struct LogKvStore {
    dir: PathBuf,
    durability: DurabilityMode,
    writer: Mutex<LogWriter>,
    buckets: RwLock<Buckets>,
}

impl std::fmt::Debug for LogKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogKvStore")
            .field("dir", &self.dir)
            .field("durability", &self.durability)
            .finish()
    }
}

/// Outcome of replaying the log bytes
struct Replay {
    buckets: Buckets,
    valid_end: u64,
    records: u64,
}

fn replay(bytes: &[u8]) -> Result<Replay> {
    let mut buckets = Buckets::default();
    let mut offset = 0usize;
    let mut records = 0u64;

    while offset < bytes.len() {
        let remaining = &bytes[offset..];
        // Framing and checksum failures look like a torn write, but only if
        // no committed record follows them
        let damage = match LogRecord::framed_len(remaining) {
            Err(e) => e,
            Ok(_) => match LogRecord::from_bytes(remaining) {
                Ok((record, consumed)) => {
                    apply_batch(&mut buckets, record.puts);
                    offset += consumed;
                    records += 1;
                    continue;
                }
                Err(e @ LogRecordError::ChecksumMismatch { .. }) => e,
                Err(e) => {
                    return Err(HaystackError::inconsistent(format!(
                        "index log corrupt at offset {}: {}",
                        offset, e
                    )));
                }
            },
        };

        if let Some(next) = next_valid_record(bytes, offset + 1) {
            return Err(HaystackError::inconsistent(format!(
                "index log corrupt at offset {} ({}) with a valid record at offset {}",
                offset, damage, next
            )));
        }
        break;
    }

    Ok(Replay {
        buckets,
        valid_end: offset as u64,
        records,
    })
}

/// Offset of the first position at or after `from` holding a whole record
/// with a valid checksum
fn next_valid_record(bytes: &[u8], from: usize) -> Option<usize> {
    (from..bytes.len().saturating_sub(MIN_FRAMED_RECORD - 1))
        .find(|&pos| LogRecord::from_bytes(&bytes[pos..]).is_ok())
}

impl LogKvStore {
    /// Open the log in `dir`, creating the directory and an empty log if
    /// needed, and replay it into memory.
    pub fn open(dir: impl AsRef<Path>, durability: DurabilityMode) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let leftover = dir.join(COMPACT_FILE);
        if leftover.exists() {
            warn!(target: "haystack::index", path = %leftover.display(), "Removing unfinished compaction output");
            fs::remove_file(&leftover)?;
        }

        let path = dir.join(INDEX_LOG_FILE);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        let replay = replay(&bytes)?;

        let original_size = bytes.len() as u64;
        if replay.valid_end < original_size {
            warn!(
                target: "haystack::index",
                valid_end = replay.valid_end,
                discarded = original_size - replay.valid_end,
                "Truncating torn index log tail"
            );
            file.set_len(replay.valid_end)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::Start(replay.valid_end))?;

        info!(
            target: "haystack::index",
            records = replay.records,
            buckets = replay.buckets.len(),
            bytes = replay.valid_end,
            "Index log replayed"
        );

        Ok(LogKvStore {
            dir,
            durability,
            writer: Mutex::new(LogWriter {
                file,
                len: replay.valid_end,
                records: replay.records,
            }),
            buckets: RwLock::new(replay.buckets),
        })
    }

    /// Path of the batch log
    pub fn path(&self) -> PathBuf {
        self.dir.join(INDEX_LOG_FILE)
    }

    /// Number of records currently in the log
    pub fn records(&self) -> u64 {
        self.writer.lock().records
    }

    /// Size of the log in bytes
    pub fn log_len(&self) -> u64 {
        self.writer.lock().len
    }
}

impl KeyValueStore for LogKvStore {
    fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(bucket_get(&self.buckets.read(), bucket, key))
    }

    fn scan(&self, bucket: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(bucket_scan(&self.buckets.read(), bucket))
    }

    fn len(&self, bucket: &str) -> Result<usize> {
        Ok(bucket_len(&self.buckets.read(), bucket))
    }

    fn commit(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let record = LogRecord::from_batch(batch);
        let bytes = record
            .to_bytes()
            .map_err(|e| HaystackError::transaction(e.to_string()))?;

        let mut writer = self.writer.lock();
        if let Err(e) = writer.append(&bytes, self.durability) {
            writer.rollback();
            return Err(HaystackError::transaction(format!(
                "index log append failed: {}",
                e
            )));
        }
        debug!(target: "haystack::index", puts = record.puts.len(), bytes = bytes.len(), "Committed batch");

        // Applied while the writer lock is held so the in-memory state never
        // runs ahead of or behind the log order.
        apply_batch(&mut self.buckets.write(), record.puts);
        Ok(())
    }

    fn compact(&self) -> Result<bool> {
        let mut writer = self.writer.lock();
        if writer.records <= 1 {
            return Ok(false);
        }

        let live: Vec<BatchPut> = {
            let buckets = self.buckets.read();
            buckets
                .iter()
                .flat_map(|(bucket, entries)| {
                    entries.iter().map(move |(key, value)| BatchPut {
                        bucket: bucket.clone(),
                        key: key.clone(),
                        value: value.clone(),
                    })
                })
                .collect()
        };

        // The handle written here becomes the writer's handle once renamed,
        // so the swap never depends on reopening the log
        let tmp = self.dir.join(COMPACT_FILE);
        let mut out = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        let mut written = 0u64;
        let mut records = 0u64;
        for chunk in live.chunks(COMPACT_CHUNK) {
            let bytes = LogRecord {
                puts: chunk.to_vec(),
            }
            .to_bytes()
            .map_err(|e| HaystackError::transaction(e.to_string()))?;
            out.write_all(&bytes)?;
            written += bytes.len() as u64;
            records += 1;
        }
        out.sync_all()?;

        fs::rename(&tmp, self.path())?;
        let before = writer.len;
        *writer = LogWriter {
            file: out,
            len: written,
            records,
        };
        sync_dir(&self.dir)?;

        info!(
            target: "haystack::index",
            before,
            after = written,
            records,
            "Compacted index log"
        );
        Ok(true)
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn put(store: &LogKvStore, bucket: &str, key: &[u8], value: &[u8]) {
        let mut batch = WriteBatch::new();
        batch.put(bucket, key.to_vec(), value.to_vec());
        store.commit(batch).unwrap();
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = LogKvStore::open(dir.path(), DurabilityMode::Always).unwrap();
            put(&store, "a", b"k1", b"v1");
            put(&store, "b", b"k2", b"v2");
            put(&store, "a", b"k1", b"v3");
        }
        let store = LogKvStore::open(dir.path(), DurabilityMode::Always).unwrap();
        assert_eq!(store.get("a", b"k1").unwrap(), Some(b"v3".to_vec()));
        assert_eq!(store.get("b", b"k2").unwrap(), Some(b"v2".to_vec()));
        assert_eq!(store.records(), 3);
    }

    #[test]
    fn test_empty_batch_writes_nothing() {
        let dir = tempdir().unwrap();
        let store = LogKvStore::open(dir.path(), DurabilityMode::Always).unwrap();
        store.commit(WriteBatch::new()).unwrap();
        assert_eq!(store.log_len(), 0);
        assert_eq!(store.records(), 0);
    }

    #[test]
    fn test_partial_tail_is_truncated() {
        let dir = tempdir().unwrap();
        let good_len = {
            let store = LogKvStore::open(dir.path(), DurabilityMode::Always).unwrap();
            put(&store, "a", b"k1", b"v1");
            store.log_len()
        };
        {
            let mut file = OpenOptions::new()
                .append(true)
                .open(dir.path().join(INDEX_LOG_FILE))
                .unwrap();
            file.write_all(&[0x30, 0, 0, 0, 1, 2, 3]).unwrap();
        }

        let store = LogKvStore::open(dir.path(), DurabilityMode::Always).unwrap();
        assert_eq!(store.log_len(), good_len);
        assert_eq!(
            fs::metadata(dir.path().join(INDEX_LOG_FILE)).unwrap().len(),
            good_len
        );
        assert_eq!(store.get("a", b"k1").unwrap(), Some(b"v1".to_vec()));

        // New commits land right after the last good record
        put(&store, "a", b"k2", b"v2");
        drop(store);
        let store = LogKvStore::open(dir.path(), DurabilityMode::Always).unwrap();
        assert_eq!(store.get("a", b"k2").unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn test_bad_checksum_in_last_record_is_truncated() {
        let dir = tempdir().unwrap();
        let first_len = {
            let store = LogKvStore::open(dir.path(), DurabilityMode::Always).unwrap();
            put(&store, "a", b"k1", b"v1");
            let first_len = store.log_len();
            put(&store, "a", b"k2", b"v2");
            first_len
        };
        let path = dir.path().join(INDEX_LOG_FILE);
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 6;
        bytes[last] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let store = LogKvStore::open(dir.path(), DurabilityMode::Always).unwrap();
        assert_eq!(store.log_len(), first_len);
        assert_eq!(store.get("a", b"k1").unwrap(), Some(b"v1".to_vec()));
        assert_eq!(store.get("a", b"k2").unwrap(), None);
    }

    #[test]
    fn test_mid_log_corruption_fails_open() {
        let dir = tempdir().unwrap();
        {
            let store = LogKvStore::open(dir.path(), DurabilityMode::Always).unwrap();
            put(&store, "a", b"k1", b"v1");
            put(&store, "a", b"k2", b"v2");
        }
        let path = dir.path().join(INDEX_LOG_FILE);
        let mut bytes = fs::read(&path).unwrap();
        bytes[6] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let err = LogKvStore::open(dir.path(), DurabilityMode::Always).unwrap_err();
        assert!(matches!(err, HaystackError::Inconsistent(_)));
        // Nothing was truncated
        assert_eq!(fs::read(&path).unwrap(), bytes);
    }

    #[test]
    fn test_broken_length_prefix_mid_log_fails_open() {
        let dir = tempdir().unwrap();
        let first_len = {
            let store = LogKvStore::open(dir.path(), DurabilityMode::Always).unwrap();
            put(&store, "a", b"k1", b"v1");
            let first_len = store.log_len() as usize;
            put(&store, "a", b"k2", b"v2");
            put(&store, "a", b"k3", b"v3");
            put(&store, "a", b"k4", b"v4");
            first_len
        };
        let path = dir.path().join(INDEX_LOG_FILE);
        let mut bytes = fs::read(&path).unwrap();
        // High byte of the second record's length prefix
        bytes[first_len + 3] = 0xFF;
        fs::write(&path, &bytes).unwrap();

        let err = LogKvStore::open(dir.path(), DurabilityMode::Always).unwrap_err();
        assert!(matches!(err, HaystackError::Inconsistent(_)));
        assert_eq!(fs::read(&path).unwrap(), bytes);
    }

    #[test]
    fn test_short_length_prefix_mid_log_fails_open() {
        let dir = tempdir().unwrap();
        let first_len = {
            let store = LogKvStore::open(dir.path(), DurabilityMode::Always).unwrap();
            put(&store, "a", b"k1", b"v1");
            let first_len = store.log_len() as usize;
            put(&store, "a", b"k2", b"v2");
            put(&store, "a", b"k3", b"v3");
            first_len
        };
        let path = dir.path().join(INDEX_LOG_FILE);
        let mut bytes = fs::read(&path).unwrap();
        // Second record now claims to be the minimum length
        bytes[first_len..first_len + 4].copy_from_slice(&9u32.to_le_bytes());
        fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            LogKvStore::open(dir.path(), DurabilityMode::Always),
            Err(HaystackError::Inconsistent(_))
        ));
        assert_eq!(fs::read(&path).unwrap(), bytes);
    }

    #[test]
    fn test_compact_rewrites_live_state() {
        let dir = tempdir().unwrap();
        let store = LogKvStore::open(dir.path(), DurabilityMode::Always).unwrap();
        for i in 0u32..100 {
            put(&store, "a", b"hot", &i.to_le_bytes());
        }
        put(&store, "b", b"cold", b"x");
        let before = store.log_len();

        assert!(store.compact().unwrap());
        assert!(store.log_len() < before);
        assert_eq!(store.records(), 1);
        assert!(!dir.path().join(COMPACT_FILE).exists());

        put(&store, "b", b"after", b"y");
        drop(store);

        let store = LogKvStore::open(dir.path(), DurabilityMode::Always).unwrap();
        assert_eq!(store.get("a", b"hot").unwrap(), Some(99u32.to_le_bytes().to_vec()));
        assert_eq!(store.get("b", b"cold").unwrap(), Some(b"x".to_vec()));
        assert_eq!(store.get("b", b"after").unwrap(), Some(b"y".to_vec()));
        assert_eq!(store.records(), 2);
    }

    #[test]
    fn test_commits_after_compact_extend_the_live_log() {
        let dir = tempdir().unwrap();
        let store = LogKvStore::open(dir.path(), DurabilityMode::Always).unwrap();
        put(&store, "a", b"k", b"v1");
        put(&store, "a", b"k", b"v2");
        assert!(store.compact().unwrap());

        put(&store, "a", b"k", b"v3");
        put(&store, "a", b"other", b"x");
        let path = dir.path().join(INDEX_LOG_FILE);
        assert_eq!(fs::metadata(&path).unwrap().len(), store.log_len());
        assert_eq!(store.records(), 3);
    }

    #[test]
    fn test_compact_nothing_to_do() {
        let dir = tempdir().unwrap();
        let store = LogKvStore::open(dir.path(), DurabilityMode::Always).unwrap();
        assert!(!store.compact().unwrap());
        put(&store, "a", b"k", b"v");
        assert!(!store.compact().unwrap());
    }

    #[test]
    fn test_leftover_compaction_file_is_removed() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(COMPACT_FILE), b"partial").unwrap();
        let _store = LogKvStore::open(dir.path(), DurabilityMode::Always).unwrap();
        assert!(!dir.path().join(COMPACT_FILE).exists());
    }

    #[test]
    fn test_cache_mode_still_replays() {
        let dir = tempdir().unwrap();
        {
            let store = LogKvStore::open(dir.path(), DurabilityMode::Cache).unwrap();
            put(&store, "a", b"k", b"v");
        }
        let store = LogKvStore::open(dir.path(), DurabilityMode::Cache).unwrap();
        assert_eq!(store.get("a", b"k").unwrap(), Some(b"v".to_vec()));
    }
}
