//! File stores backing pile files
//!
//! `LocalFileStore` maps names to files in one directory. `MemoryFileStore`
//! keeps everything in process memory and is used for ephemeral stores and
//! tests. `CachingFileStore` layers a `MemoryFileStore` over another store and
//! serves reads from a copy that is reloaded once it is older than a TTL.

use haystack_core::{FileHandle, FileStore};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

fn grow_rejected(current: u64, len: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("cannot truncate {} byte file to larger length {}", current, len),
    )
}

// ============================================================================
// Local disk
// ============================================================================

/// A directory of files on local disk
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    dir: PathBuf,
}

impl LocalFileStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub fn open(dir: impl AsRef<Path>) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(LocalFileStore { dir })
    }

    /// Directory holding the files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> io::Result<PathBuf> {
        if name.is_empty() || name.contains('/') || name.contains('\\') || name == "." || name == ".." {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid file name: {:?}", name),
            ));
        }
        Ok(self.dir.join(name))
    }
}

impl FileStore for LocalFileStore {
    type Handle = LocalFile;

    fn open_or_create(&self, name: &str) -> io::Result<LocalFile> {
        let path = self.path(name)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        Ok(LocalFile::new(file, path))
    }

    fn open(&self, name: &str) -> io::Result<Option<LocalFile>> {
        let path = self.path(name)?;
        match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => Ok(Some(LocalFile::new(file, path))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn list(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// A file on local disk
///
/// Reads use positional I/O and never move a shared cursor, so any number of
/// readers can run alongside the writer.
#[derive(Debug, Clone)]
pub struct LocalFile {
    inner: Arc<LocalFileInner>,
}

#[derive(Debug)]
struct LocalFileInner {
    file: File,
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl LocalFile {
    fn new(file: File, path: PathBuf) -> Self {
        LocalFile {
            inner: Arc::new(LocalFileInner {
                file,
                path,
                write_lock: Mutex::new(()),
            }),
        }
    }

    /// Path of the file on disk
    pub fn path(&self) -> &Path {
        &self.inner.path
    }
}

impl FileHandle for LocalFile {
    fn append(&self, bytes: &[u8]) -> io::Result<u64> {
        let _guard = self.inner.write_lock.lock();
        let offset = self.inner.file.metadata()?.len();
        write_all_at(&self.inner.file, bytes, offset)?;
        Ok(offset)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match read_at(&self.inner.file, &mut buf[filled..], offset + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.inner.file.metadata()?.len())
    }

    fn truncate(&self, len: u64) -> io::Result<()> {
        let _guard = self.inner.write_lock.lock();
        let current = self.inner.file.metadata()?.len();
        if len > current {
            return Err(grow_rejected(current, len));
        }
        self.inner.file.set_len(len)
    }

    fn sync(&self) -> io::Result<()> {
        self.inner.file.sync_all()
    }
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "failed to write whole buffer",
                ))
            }
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

// ============================================================================
// In memory
// ============================================================================

/// A set of files held in process memory
#[derive(Debug, Clone, Default)]
pub struct MemoryFileStore {
    files: Arc<RwLock<HashMap<String, MemoryFile>>>,
}

impl MemoryFileStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl FileStore for MemoryFileStore {
    type Handle = MemoryFile;

    fn open_or_create(&self, name: &str) -> io::Result<MemoryFile> {
        if let Some(file) = self.files.read().get(name) {
            return Ok(file.clone());
        }
        let mut files = self.files.write();
        Ok(files.entry(name.to_string()).or_default().clone())
    }

    fn open(&self, name: &str) -> io::Result<Option<MemoryFile>> {
        Ok(self.files.read().get(name).cloned())
    }

    fn list(&self) -> io::Result<Vec<String>> {
        let mut names: Vec<String> = self.files.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

/// A file held in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryFile {
    bytes: Arc<RwLock<Vec<u8>>>,
}

impl FileHandle for MemoryFile {
    fn append(&self, bytes: &[u8]) -> io::Result<u64> {
        let mut buf = self.bytes.write();
        let offset = buf.len() as u64;
        buf.extend_from_slice(bytes);
        Ok(offset)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let bytes = self.bytes.read();
        let len = bytes.len() as u64;
        if offset >= len {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(bytes.len() - start);
        buf[..n].copy_from_slice(&bytes[start..start + n]);
        Ok(n)
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.bytes.read().len() as u64)
    }

    fn truncate(&self, len: u64) -> io::Result<()> {
        let mut bytes = self.bytes.write();
        let current = bytes.len() as u64;
        if len > current {
            return Err(grow_rejected(current, len));
        }
        bytes.truncate(len as usize);
        Ok(())
    }

    fn sync(&self) -> io::Result<()> {
        Ok(())
    }
}

// ============================================================================
// Read cache
// ============================================================================

/// A store whose reads are served from an in-memory copy of each file
///
/// The first read of a file copies it from the backing store into a
/// `MemoryFileStore` layer. Later reads hit the layer until the copy is older
/// than `ttl`, then the file is copied again. Appends go to the backing store
/// first and are mirrored into a fresh copy, so a process never reads stale
/// bytes of its own writes. Bytes changed behind the store's back are seen
/// after at most `ttl`.
#[derive(Debug, Clone)]
pub struct CachingFileStore<F: FileStore> {
    base: F,
    layer: MemoryFileStore,
    ttl: Duration,
    loaded: Arc<Mutex<HashMap<String, Arc<RwLock<Option<Instant>>>>>>,
}

impl<F: FileStore> CachingFileStore<F> {
    /// Wrap `base`, keeping cached copies for `ttl`
    pub fn new(base: F, ttl: Duration) -> Self {
        CachingFileStore {
            base,
            layer: MemoryFileStore::new(),
            ttl,
            loaded: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Backing store
    pub fn base(&self) -> &F {
        &self.base
    }

    /// How long a cached copy is served
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn wrap(&self, name: &str, base: F::Handle) -> io::Result<CachingFile<F::Handle>> {
        let layer = self.layer.open_or_create(name)?;
        let loaded = Arc::clone(self.loaded.lock().entry(name.to_string()).or_default());
        Ok(CachingFile {
            base,
            layer,
            loaded,
            ttl: self.ttl,
        })
    }
}

impl<F: FileStore> FileStore for CachingFileStore<F> {
    type Handle = CachingFile<F::Handle>;

    fn open_or_create(&self, name: &str) -> io::Result<Self::Handle> {
        let base = self.base.open_or_create(name)?;
        self.wrap(name, base)
    }

    fn open(&self, name: &str) -> io::Result<Option<Self::Handle>> {
        match self.base.open(name)? {
            Some(base) => Ok(Some(self.wrap(name, base)?)),
            None => Ok(None),
        }
    }

    fn list(&self) -> io::Result<Vec<String>> {
        self.base.list()
    }
}

/// A file whose reads are served from an in-memory copy
///
/// `loaded` records when the copy was last filled from the backing file;
/// `None` means the copy must not be used. All handles to one name share it.
#[derive(Debug, Clone)]
pub struct CachingFile<H: FileHandle> {
    base: H,
    layer: MemoryFile,
    loaded: Arc<RwLock<Option<Instant>>>,
    ttl: Duration,
}

impl<H: FileHandle> CachingFile<H> {
    fn is_fresh(&self, loaded: Option<Instant>) -> bool {
        loaded.is_some_and(|at| at.elapsed() < self.ttl)
    }

    /// Replace the cached copy with the backing file's current bytes
    fn reload(&self) -> io::Result<()> {
        let len = self.base.len()?;
        let len = usize::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "file too large to cache"))?;
        let mut bytes = vec![0u8; len];
        let read = self.base.read_at(0, &mut bytes)?;
        bytes.truncate(read);
        *self.layer.bytes.write() = bytes;
        debug!(target: "haystack::pile", bytes = read, "Reloaded cached file");
        Ok(())
    }

    /// Drop the cached copy and its memory
    fn invalidate(&self, loaded: &mut Option<Instant>) {
        *loaded = None;
        self.layer.bytes.write().clear();
    }
}

impl<H: FileHandle> FileHandle for CachingFile<H> {
    fn append(&self, bytes: &[u8]) -> io::Result<u64> {
        let mut loaded = self.loaded.write();
        let offset = match self.base.append(bytes) {
            Ok(offset) => offset,
            Err(e) => {
                self.invalidate(&mut loaded);
                return Err(e);
            }
        };
        if self.is_fresh(*loaded) && self.layer.len()? == offset {
            self.layer.append(bytes)?;
        } else {
            self.invalidate(&mut loaded);
        }
        Ok(offset)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        {
            let loaded = self.loaded.read();
            if self.is_fresh(*loaded) {
                return self.layer.read_at(offset, buf);
            }
        }
        let mut loaded = self.loaded.write();
        if !self.is_fresh(*loaded) {
            if let Err(e) = self.reload() {
                self.invalidate(&mut loaded);
                return Err(e);
            }
            *loaded = Some(Instant::now());
        }
        self.layer.read_at(offset, buf)
    }

    fn len(&self) -> io::Result<u64> {
        self.base.len()
    }

    fn truncate(&self, len: u64) -> io::Result<()> {
        let mut loaded = self.loaded.write();
        let result = self.base.truncate(len);
        if result.is_ok() && self.is_fresh(*loaded) && self.layer.len()? >= len {
            self.layer.truncate(len)?;
        } else {
            self.invalidate(&mut loaded);
        }
        result
    }

    fn sync(&self) -> io::Result<()> {
        self.base.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn exercise<F: FileStore>(store: &F) {
        let file = store.open_or_create("a.pile").unwrap();
        assert!(file.is_empty().unwrap());

        assert_eq!(file.append(b"hello").unwrap(), 0);
        assert_eq!(file.append(b" world").unwrap(), 5);
        assert_eq!(file.len().unwrap(), 11);

        let mut buf = [0u8; 5];
        assert_eq!(file.read_at(6, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"world");

        // Short read at EOF
        let mut buf = [0u8; 8];
        assert_eq!(file.read_at(8, &mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"rld");
        assert_eq!(file.read_at(100, &mut buf).unwrap(), 0);

        file.truncate(5).unwrap();
        assert_eq!(file.len().unwrap(), 5);
        assert_eq!(file.append(b"!").unwrap(), 5);
        file.sync().unwrap();

        // Another handle sees the same bytes
        let again = store.open("a.pile").unwrap().unwrap();
        assert_eq!(again.len().unwrap(), 6);

        assert!(store.open("missing.pile").unwrap().is_none());
        store.open_or_create("b.pile").unwrap();
        assert_eq!(store.list().unwrap(), vec!["a.pile".to_string(), "b.pile".to_string()]);
    }

    #[test]
    fn test_local_file_store() {
        let dir = tempdir().unwrap();
        let store = LocalFileStore::open(dir.path().join("piles")).unwrap();
        exercise(&store);
    }

    #[test]
    fn test_memory_file_store() {
        exercise(&MemoryFileStore::new());
    }

    #[test]
    fn test_caching_file_store() {
        let dir = tempdir().unwrap();
        let base = LocalFileStore::open(dir.path().join("piles")).unwrap();
        exercise(&CachingFileStore::new(base, Duration::from_secs(60)));

        exercise(&CachingFileStore::new(MemoryFileStore::new(), Duration::ZERO));
    }

    #[test]
    fn test_cache_serves_copy_until_ttl() {
        let base = MemoryFileStore::new();
        let store = CachingFileStore::new(base.clone(), Duration::from_secs(3600));
        let file = store.open_or_create("p").unwrap();
        file.append(b"original").unwrap();

        let mut buf = [0u8; 8];
        file.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf, b"original");

        // Rewritten behind the cache: the copy still answers
        let raw = base.open("p").unwrap().unwrap();
        raw.truncate(0).unwrap();
        raw.append(b"replaced").unwrap();
        file.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf, b"original");

        // Writes through the cache are visible at once
        assert_eq!(file.append(b"+more").unwrap(), 8);
        let mut tail = [0u8; 5];
        assert_eq!(file.read_at(8, &mut tail).unwrap(), 5);
        assert_eq!(&tail, b"+more");
    }

    #[test]
    fn test_expired_copy_is_reloaded() {
        let base = MemoryFileStore::new();
        let store = CachingFileStore::new(base.clone(), Duration::ZERO);
        let file = store.open_or_create("p").unwrap();
        file.append(b"first").unwrap();

        let mut buf = [0u8; 5];
        file.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf, b"first");

        let raw = base.open("p").unwrap().unwrap();
        raw.truncate(0).unwrap();
        raw.append(b"again").unwrap();
        file.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf, b"again");
    }

    #[test]
    fn test_cache_handles_share_one_copy() {
        let store = CachingFileStore::new(MemoryFileStore::new(), Duration::from_secs(3600));
        let writer = store.open_or_create("p").unwrap();
        writer.append(b"abc").unwrap();
        let reader = store.open("p").unwrap().unwrap();

        let mut buf = [0u8; 3];
        reader.read_at(0, &mut buf).unwrap();
        writer.append(b"def").unwrap();
        writer.truncate(4).unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(reader.read_at(0, &mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"abcd");
        assert_eq!(reader.len().unwrap(), 4);
    }

    #[test]
    fn test_truncate_never_grows() {
        let file = MemoryFileStore::new().open_or_create("m").unwrap();
        file.append(b"abc").unwrap();
        let err = file.truncate(1 << 40).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert_eq!(file.len().unwrap(), 3);

        let dir = tempdir().unwrap();
        let local = LocalFileStore::open(dir.path()).unwrap().open_or_create("l").unwrap();
        local.append(b"abc").unwrap();
        assert_eq!(local.truncate(10).unwrap_err().kind(), io::ErrorKind::InvalidInput);
        assert_eq!(local.len().unwrap(), 3);
    }

    #[test]
    fn test_local_persists_across_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = LocalFileStore::open(dir.path()).unwrap();
            let file = store.open_or_create("x").unwrap();
            file.append(b"persisted").unwrap();
            file.sync().unwrap();
        }
        let store = LocalFileStore::open(dir.path()).unwrap();
        let file = store.open("x").unwrap().unwrap();
        let mut buf = vec![0u8; 9];
        file.read_at(0, &mut buf).unwrap();
        assert_eq!(buf, b"persisted");
    }

    #[test]
    fn test_local_rejects_path_components() {
        let dir = tempdir().unwrap();
        let store = LocalFileStore::open(dir.path()).unwrap();
        assert!(store.open_or_create("../escape").is_err());
        assert!(store.open_or_create("").is_err());
    }

    #[test]
    fn test_concurrent_appends_do_not_overlap() {
        let dir = tempdir().unwrap();
        let store = LocalFileStore::open(dir.path()).unwrap();
        let file = store.open_or_create("c").unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let file = file.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        file.append(&[0xAB; 16]).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(file.len().unwrap(), 4 * 50 * 16);
    }
}
