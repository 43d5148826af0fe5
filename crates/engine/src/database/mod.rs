//! Haystack store: open/close, put and get
//!
//! `Haystack` ties the pile files and the index together:
//!
//! - Put: rotate if needed → encode → append → sync → commit entry + cursor
//! - Get: index lookup → positional read → decode → key check
//!
//! # Concurrency
//!
//! Puts are serialized by the writer mutex, which owns the active pile id and
//! cursor. Gets take no store-wide lock: they read a committed byte range,
//! and committed bytes are never rewritten.
//!
//! # Crash Consistency
//!
//! The index entry and the new cursor are committed in one batch, after the
//! needle bytes are appended (and synced when durability is `Always`). Bytes
//! past the committed cursor are garbage from an interrupted put and are
//! trimmed by [`Haystack::recover`] on open.

pub mod config;
pub mod paths;
mod recovery;
mod stats;
mod verify;

pub use config::{ConfigError, HaystackConfig, CONFIG_FILE_NAME};
pub use paths::DataDir;
pub use stats::HaystackStats;
pub use verify::{CorruptNeedle, VerifyReport};

use haystack_core::{
    CancelToken, CorruptionKind, FileStore, HaystackError, HaystackMeta, IndexEntry,
    KeyValueStore, Limits, PileId, Result,
};
use haystack_durability::{
    decode, encode, encoded_len, CachingFileStore, LocalFileStore, MemoryFileStore, PileStore,
};
use haystack_storage::{IndexStore, LogKvStore, MemoryKvStore};
use parking_lot::Mutex;
use stats::StoreCounters;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

/// Store backed by a data directory on local disk
pub type DiskHaystack = Haystack<LocalFileStore, LogKvStore>;

/// Disk store whose pile reads are served from an in-memory copy
pub type CachedDiskHaystack = Haystack<CachingFileStore<LocalFileStore>, LogKvStore>;

/// Store held entirely in memory
pub type EphemeralHaystack = Haystack<MemoryFileStore, MemoryKvStore>;

/// Lifecycle state of a store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    /// Accepting puts and gets
    Ready,
    /// Closed; every operation fails with `Closed`
    Closed,
}

/// Writer-owned position of the next append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ActivePile {
    id: PileId,
    cursor: u64,
}

impl ActivePile {
    fn meta(&self) -> HaystackMeta {
        HaystackMeta::new(self.id, self.cursor)
    }
}

/// Append-only blob store
///
/// Generic over where pile bytes live (`F`) and which engine holds the index
/// (`K`). See [`DiskHaystack`] and [`EphemeralHaystack`] for the two stock
/// combinations.
pub struct Haystack<F: FileStore, K: KeyValueStore> {
    config: HaystackConfig,
    limits: Limits,
    piles: PileStore<F>,
    index: IndexStore<K>,
    writer: Mutex<ActivePile>,
    closed: AtomicBool,
    counters: StoreCounters,
    data_dir: Option<PathBuf>,
    /// Held for the lifetime of the store; released on drop
    _lock_file: Option<std::fs::File>,
}

impl<F: FileStore, K: KeyValueStore> Haystack<F, K> {
    /// Open a store over the given index engine and file store.
    ///
    /// Bootstraps metadata on first open. If the active pile holds bytes past
    /// the committed cursor, they are trimmed. If it is shorter than the
    /// cursor, committed data is missing and the open fails.
    pub fn open(config: HaystackConfig, index: K, files: F) -> Result<Self> {
        let pile_config = config.pile_config()?;
        let piles = PileStore::new(files, pile_config)?;
        let index = IndexStore::new(index);

        let meta = match index.get_metadata()? {
            Some(meta) => meta,
            None => {
                for pile in piles.list_piles()? {
                    if piles.len(pile)? > 0 {
                        return Err(HaystackError::inconsistent(format!(
                            "index has no metadata but pile {} holds data",
                            pile
                        )));
                    }
                }
                let meta = HaystackMeta::bootstrap();
                index.put_metadata(meta)?;
                info!(target: "haystack::store", "Bootstrapped store metadata");
                meta
            }
        };

        piles.open_or_create(meta.active_pile_id)?;

        let store = Haystack {
            config,
            limits: Limits::default(),
            piles,
            index,
            writer: Mutex::new(ActivePile {
                id: meta.active_pile_id,
                cursor: meta.active_pile_cursor,
            }),
            closed: AtomicBool::new(false),
            counters: StoreCounters::default(),
            data_dir: None,
            _lock_file: None,
        };

        let recovered = store.recover()?;
        let keys = store.index.len()?;

        info!(
            target: "haystack::store",
            active_pile = meta.active_pile_id,
            cursor = meta.active_pile_cursor,
            keys,
            recovered,
            "Haystack opened"
        );
        Ok(store)
    }

    /// Replace the key/payload size limits
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Configuration in effect
    pub fn config(&self) -> &HaystackConfig {
        &self.config
    }

    /// Data directory, for stores opened with `open_dir`
    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// Current lifecycle state
    pub fn state(&self) -> StoreState {
        if self.closed.load(Ordering::Acquire) {
            StoreState::Closed
        } else {
            StoreState::Ready
        }
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state() {
            StoreState::Ready => Ok(()),
            StoreState::Closed => Err(HaystackError::Closed),
        }
    }

    /// Store `data` under `key`, replacing any previous value
    pub fn put(&self, key: &[u8], data: &[u8], flag: u64) -> Result<()> {
        self.put_with_token(key, data, flag, &CancelToken::new())
    }

    /// Store `data` under `key`, giving up if `token` is cancelled first
    ///
    /// A put that fails or is cancelled commits no index entry and trims any
    /// bytes it appended.
    pub fn put_with_token(
        &self,
        key: &[u8],
        data: &[u8],
        flag: u64,
        token: &CancelToken,
    ) -> Result<()> {
        self.limits.validate_key(key)?;
        self.limits.validate_data(data)?;

        let mut active = self.writer.lock();
        self.ensure_open()?;
        token.check()?;

        let size = encoded_len(key.len(), data.len()) as u64;
        if self.piles.should_rotate(active.id, size)? {
            self.rotate(&mut active)?;
        }

        match self.append_and_commit(&active, key, data, flag, token) {
            Ok(entry) => {
                active.cursor = entry.offset + entry.size;
                self.counters.record_put(entry.size);
                debug!(
                    target: "haystack::store",
                    key_len = key.len(),
                    pile = entry.pile,
                    offset = entry.offset,
                    size = entry.size,
                    "Put committed"
                );
                Ok(())
            }
            Err(e) => {
                self.discard_uncommitted(&active);
                Err(e)
            }
        }
    }

    fn append_and_commit(
        &self,
        active: &ActivePile,
        key: &[u8],
        data: &[u8],
        flag: u64,
        token: &CancelToken,
    ) -> Result<IndexEntry> {
        token.check()?;
        let bytes = encode(key, data, flag);
        let size = bytes.len() as u64;

        let offset = self.piles.append(active.id, &bytes)?;
        if offset != active.cursor {
            return Err(HaystackError::inconsistent(format!(
                "append to pile {} landed at {} but cursor is {}",
                active.id, offset, active.cursor
            )));
        }
        self.piles.sync_if_required(active.id)?;

        token.check()?;
        let entry = IndexEntry::new(active.id, offset, size, flag);
        let meta = HaystackMeta::new(active.id, offset + size);
        self.index.commit_put(key, entry, meta)?;
        Ok(entry)
    }

    /// Trim bytes a failed put left past the committed cursor
    fn discard_uncommitted(&self, active: &ActivePile) {
        match self.piles.len(active.id) {
            Ok(len) if len > active.cursor => {
                if let Err(e) = self.piles.truncate(active.id, active.cursor) {
                    warn!(
                        target: "haystack::store",
                        pile = active.id,
                        cursor = active.cursor,
                        error = %e,
                        "Failed to trim uncommitted bytes; recovery will trim them on next open"
                    );
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(target: "haystack::store", pile = active.id, error = %e, "Failed to read pile length");
            }
        }
    }

    /// Switch to a fresh pile and persist the switch before any needle lands in it
    fn rotate(&self, active: &mut ActivePile) -> Result<()> {
        let from = active.id;
        let next = from
            .checked_add(1)
            .ok_or_else(|| HaystackError::Rotation("pile ids exhausted".to_string()))?;

        let rotation_err =
            |e: HaystackError| HaystackError::Rotation(format!("pile {} -> {}: {}", from, next, e));

        // The sealed pile never sees another append
        self.piles.sync(from).map_err(rotation_err)?;

        self.piles.open_or_create(next).map_err(rotation_err)?;
        let stale = self.piles.len(next).map_err(rotation_err)?;
        if stale > 0 {
            // Never referenced by committed metadata, so nothing points into it
            warn!(target: "haystack::pile", pile = next, bytes = stale, "Discarding stale bytes in next pile");
            self.piles.truncate(next, 0).map_err(rotation_err)?;
        }

        let rotated = ActivePile { id: next, cursor: 0 };
        self.index.put_metadata(rotated.meta()).map_err(rotation_err)?;

        info!(
            target: "haystack::pile",
            from,
            to = next,
            sealed_len = active.cursor,
            "Rotated to new pile"
        );
        *active = rotated;
        self.counters.record_rotation();
        Ok(())
    }

    /// Fetch the payload stored under `key`
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.get_with_token(key, &CancelToken::new())
    }

    /// Fetch the payload stored under `key`, giving up if `token` is cancelled
    pub fn get_with_token(&self, key: &[u8], token: &CancelToken) -> Result<Vec<u8>> {
        self.ensure_open()?;
        token.check()?;

        let entry = self
            .index
            .get(key)?
            .ok_or_else(|| HaystackError::NotFound { key: key.to_vec() })?;

        if !self.piles.exists(entry.pile)? {
            return Err(HaystackError::inconsistent(format!(
                "index points at pile {} which does not exist",
                entry.pile
            )));
        }
        let end = entry.end().ok_or_else(|| {
            HaystackError::inconsistent(format!(
                "index entry offset {} + size {} overflows",
                entry.offset, entry.size
            ))
        })?;
        let pile_len = self.piles.len(entry.pile)?;
        if end > pile_len {
            return Err(HaystackError::inconsistent(format!(
                "index entry ends at {} past end of pile {} ({} bytes)",
                end, entry.pile, pile_len
            )));
        }

        token.check()?;
        let bytes = self.piles.read_at(entry.pile, entry.offset, entry.size)?;
        let needle = decode(&bytes).map_err(|kind| self.corrupt(key, &entry, kind))?;
        if needle.key != key {
            return Err(self.corrupt(key, &entry, CorruptionKind::KeyMismatch));
        }

        self.counters.record_get();
        Ok(needle.data)
    }

    fn corrupt(&self, key: &[u8], entry: &IndexEntry, kind: CorruptionKind) -> HaystackError {
        error!(
            target: "haystack::store",
            key_len = key.len(),
            pile = entry.pile,
            offset = entry.offset,
            size = entry.size,
            %kind,
            "Corrupt needle"
        );
        HaystackError::corruption(entry.pile, entry.offset, kind)
    }

    /// Raw index entry for `key`, including its flag
    pub fn entry(&self, key: &[u8]) -> Result<Option<IndexEntry>> {
        self.ensure_open()?;
        self.index.get(key)
    }

    /// True if `key` has been stored
    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        Ok(self.entry(key)?.is_some())
    }

    /// Counters plus the current write position
    pub fn stats(&self) -> Result<HaystackStats> {
        let active = *self.writer.lock();
        let keys = self.index.len()?;
        Ok(self.counters.snapshot(active.id, active.cursor, keys))
    }

    /// Ask the index engine to reclaim space held by overwritten entries
    ///
    /// Returns `false` if the engine had nothing to do.
    pub fn compact_index(&self) -> Result<bool> {
        self.ensure_open()?;
        // Held so no put commits while the engine rewrites its state
        let _active = self.writer.lock();
        let compacted = self.index.compact()?;
        if compacted {
            info!(target: "haystack::index", "Index compacted");
        }
        Ok(compacted)
    }

    /// Flush the active pile and refuse further operations
    pub fn close(&self) -> Result<()> {
        let active = self.writer.lock();
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        self.piles.sync(active.id)?;
        self.closed.store(true, Ordering::Release);
        info!(target: "haystack::store", active_pile = active.id, cursor = active.cursor, "Haystack closed");
        Ok(())
    }
}

impl<F: FileStore, K: KeyValueStore> Drop for Haystack<F, K> {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            let active = *self.writer.lock();
            if let Err(e) = self.piles.sync(active.id) {
                warn!(target: "haystack::store", pile = active.id, error = %e, "Failed to sync active pile on drop");
            }
        }
    }
}

impl Haystack<LocalFileStore, LogKvStore> {
    /// Open the store in a data directory.
    ///
    /// Creates the directory and a default `haystack.toml` on first use,
    /// then opens with whatever configuration the file holds.
    pub fn open_dir(path: impl AsRef<Path>) -> Result<Self> {
        let config = load_dir_config(path.as_ref())?;
        Self::open_dir_with_config(path, config)
    }

    /// Open the store in a data directory with an explicit configuration.
    ///
    /// The configuration is written to `haystack.toml` so later
    /// [`open_dir`](Self::open_dir) calls pick up the same settings.
    pub fn open_dir_with_config(path: impl AsRef<Path>, config: HaystackConfig) -> Result<Self> {
        open_in_dir(path.as_ref(), config, |files| files)
    }
}

impl Haystack<CachingFileStore<LocalFileStore>, LogKvStore> {
    /// Open the store in a data directory, serving pile reads from memory.
    ///
    /// Each pile is copied into memory on first read and reloaded from disk
    /// once the copy is older than `read_cache_ttl_secs`.
    pub fn open_dir_cached(path: impl AsRef<Path>) -> Result<Self> {
        let config = load_dir_config(path.as_ref())?;
        Self::open_dir_cached_with_config(path, config)
    }

    /// Cached open with an explicit configuration
    pub fn open_dir_cached_with_config(
        path: impl AsRef<Path>,
        config: HaystackConfig,
    ) -> Result<Self> {
        let ttl = config.read_cache_ttl();
        open_in_dir(path.as_ref(), config, |files| CachingFileStore::new(files, ttl))
    }
}

fn load_dir_config(path: &Path) -> Result<HaystackConfig> {
    let paths = DataDir::from_root(path);
    paths.create_directories()?;
    let config_path = paths.config_file();
    HaystackConfig::write_default_if_missing(&config_path)?;
    HaystackConfig::from_file(&config_path)
}

/// Lock the data directory, persist `config` and open the store over the
/// directory's index log and the pile store built by `wrap`
fn open_in_dir<F: FileStore>(
    path: &Path,
    config: HaystackConfig,
    wrap: impl FnOnce(LocalFileStore) -> F,
) -> Result<Haystack<F, LogKvStore>> {
    config.validate()?;
    let paths = DataDir::from_root(path);
    paths.create_directories()?;

    let lock_path = paths.lock_file();
    let lock_file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(&lock_path)?;
    fs2::FileExt::try_lock_exclusive(&lock_file).map_err(|_| {
        HaystackError::Locked(format!(
            "store at '{}' is already in use by another process",
            paths.root().display()
        ))
    })?;

    config.write_to_file(&paths.config_file())?;

    let index = LogKvStore::open(paths.index_dir(), config.durability_mode()?)?;
    let files = wrap(LocalFileStore::open(paths.piles_dir())?);

    let mut store = Haystack::open(config, index, files)?;
    store.data_dir = Some(paths.root().to_path_buf());
    store._lock_file = Some(lock_file);
    Ok(store)
}

impl Haystack<MemoryFileStore, MemoryKvStore> {
    /// A store held entirely in memory
    pub fn ephemeral(config: HaystackConfig) -> Result<Self> {
        Self::open(config, MemoryKvStore::new(), MemoryFileStore::new())
    }
}
