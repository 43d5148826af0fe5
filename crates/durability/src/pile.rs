//! Pile management
//!
//! A pile is one append-only file named `pile-NNNNNN.pile`. Exactly one pile
//! is active for writes at a time; older piles stay readable forever.
//!
//! `PileStore` keeps an open handle per pile so positional reads never pay
//! for a reopen. It does not track the write cursor: that lives in the
//! index metadata and is owned by the store orchestrator.

use dashmap::DashMap;
use haystack_core::{DurabilityMode, FileHandle, FileStore, HaystackError, PileId, Result};
use tracing::{debug, info};

const PILE_PREFIX: &str = "pile-";
const PILE_SUFFIX: &str = ".pile";

/// File name for pile `id`
pub fn pile_file_name(id: PileId) -> String {
    format!("{}{:06}{}", PILE_PREFIX, id, PILE_SUFFIX)
}

/// Parse a pile id back out of a file name
///
/// Returns `None` for anything that is not a pile file.
pub fn parse_pile_file_name(name: &str) -> Option<PileId> {
    let digits = name.strip_prefix(PILE_PREFIX)?.strip_suffix(PILE_SUFFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Pile configuration parameters.
#[derive(Debug, Clone)]
pub struct PileConfig {
    /// Rotation threshold in bytes (default: 256MB).
    ///
    /// A put that would push a non-empty pile past this size goes to a new
    /// pile instead.
    pub max_pile_size: u64,

    /// When appended bytes are fsynced
    pub durability: DurabilityMode,
}

impl Default for PileConfig {
    fn default() -> Self {
        PileConfig {
            max_pile_size: 256 * 1024 * 1024,
            durability: DurabilityMode::Always,
        }
    }
}

impl PileConfig {
    /// Smallest accepted rotation threshold
    pub const MIN_PILE_SIZE: u64 = 1024;

    /// Create a new pile configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the rotation threshold (builder pattern).
    pub fn with_max_pile_size(mut self, size: u64) -> Self {
        self.max_pile_size = size;
        self
    }

    /// Set the durability mode (builder pattern).
    pub fn with_durability(mut self, durability: DurabilityMode) -> Self {
        self.durability = durability;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> std::result::Result<(), PileConfigError> {
        if self.max_pile_size < Self::MIN_PILE_SIZE {
            return Err(PileConfigError::PileSizeTooSmall {
                actual: self.max_pile_size,
            });
        }
        Ok(())
    }

    /// Create a configuration optimized for testing (small piles).
    pub fn for_testing() -> Self {
        PileConfig {
            max_pile_size: 64 * 1024,
            durability: DurabilityMode::Always,
        }
    }
}

/// Pile configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PileConfigError {
    /// Rotation threshold is too small (minimum 1KB).
    #[error("max_pile_size must be at least 1KB, got {actual}")]
    PileSizeTooSmall {
        /// Configured value
        actual: u64,
    },
}

impl From<PileConfigError> for HaystackError {
    fn from(e: PileConfigError) -> Self {
        HaystackError::Config(e.to_string())
    }
}

/// The set of pile files in one file store
pub struct PileStore<F: FileStore> {
    files: F,
    config: PileConfig,
    handles: DashMap<PileId, F::Handle>,
}

impl<F: FileStore> PileStore<F> {
    /// Wrap a file store
    pub fn new(files: F, config: PileConfig) -> Result<Self> {
        config.validate()?;
        Ok(PileStore {
            files,
            config,
            handles: DashMap::new(),
        })
    }

    /// Configuration in effect
    pub fn config(&self) -> &PileConfig {
        &self.config
    }

    /// Underlying file store
    pub fn files(&self) -> &F {
        &self.files
    }

    /// Open pile `id` for writing, creating it if missing
    pub fn open_or_create(&self, id: PileId) -> Result<F::Handle> {
        if let Some(handle) = self.handles.get(&id) {
            return Ok(handle.clone());
        }
        let handle = self.files.open_or_create(&pile_file_name(id))?;
        debug!(target: "haystack::pile", pile = id, "Opened pile for writing");
        Ok(self.handles.entry(id).or_insert(handle).clone())
    }

    /// Open an existing pile for reading
    ///
    /// Never creates a file. A pile the index points at but the store does
    /// not hold means the two have diverged.
    pub fn reader(&self, id: PileId) -> Result<F::Handle> {
        if let Some(handle) = self.handles.get(&id) {
            return Ok(handle.clone());
        }
        match self.files.open(&pile_file_name(id))? {
            Some(handle) => Ok(self.handles.entry(id).or_insert(handle).clone()),
            None => Err(HaystackError::inconsistent(format!(
                "pile {} does not exist",
                id
            ))),
        }
    }

    /// True if pile `id` exists in the file store
    pub fn exists(&self, id: PileId) -> Result<bool> {
        if self.handles.contains_key(&id) {
            return Ok(true);
        }
        Ok(self.files.open(&pile_file_name(id))?.is_some())
    }

    /// Append `bytes` to pile `id`, returning the offset they were written at
    pub fn append(&self, id: PileId, bytes: &[u8]) -> Result<u64> {
        let handle = self.open_or_create(id)?;
        Ok(handle.append(bytes)?)
    }

    /// Read exactly `size` bytes at `offset` in pile `id`
    pub fn read_at(&self, id: PileId, offset: u64, size: u64) -> Result<Vec<u8>> {
        let handle = self.reader(id)?;
        let len = usize::try_from(size).map_err(|_| {
            HaystackError::inconsistent(format!("record size {} does not fit in memory", size))
        })?;
        let mut buf = vec![0u8; len];
        let actual = handle.read_at(offset, &mut buf)?;
        if actual < len {
            return Err(HaystackError::ShortRead {
                pile: id,
                offset,
                expected: size,
                actual: actual as u64,
            });
        }
        Ok(buf)
    }

    /// Current length of pile `id`; a missing pile has length 0
    pub fn len(&self, id: PileId) -> Result<u64> {
        if let Some(handle) = self.handles.get(&id) {
            return Ok(handle.len()?);
        }
        match self.files.open(&pile_file_name(id))? {
            Some(handle) => Ok(handle.len()?),
            None => Ok(0),
        }
    }

    /// Whether appending `next_len` bytes to pile `id` should go to a new pile
    ///
    /// An empty pile always takes the write, so a needle larger than the
    /// threshold still lands somewhere.
    pub fn should_rotate(&self, id: PileId, next_len: u64) -> Result<bool> {
        let len = self.len(id)?;
        if len == 0 {
            return Ok(false);
        }
        Ok(len.saturating_add(next_len) > self.config.max_pile_size)
    }

    /// Cut pile `id` back to `len` bytes
    pub fn truncate(&self, id: PileId, len: u64) -> Result<()> {
        let handle = self.open_or_create(id)?;
        handle.truncate(len)?;
        if self.config.durability.requires_sync() {
            handle.sync()?;
        }
        info!(target: "haystack::pile", pile = id, len, "Truncated pile");
        Ok(())
    }

    /// Force pile `id` to stable storage
    pub fn sync(&self, id: PileId) -> Result<()> {
        let handle = self.open_or_create(id)?;
        Ok(handle.sync()?)
    }

    /// Sync pile `id` if the durability mode asks for it
    pub fn sync_if_required(&self, id: PileId) -> Result<()> {
        if self.config.durability.requires_sync() {
            self.sync(id)?;
        }
        Ok(())
    }

    /// Ids of every pile in the file store, ascending
    pub fn list_piles(&self) -> Result<Vec<PileId>> {
        let mut ids: Vec<PileId> = self
            .files
            .list()?
            .iter()
            .filter_map(|name| parse_pile_file_name(name))
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}
