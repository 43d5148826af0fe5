//! Crash simulation tests
//!
//! Crashes are simulated by dropping the store and then damaging files the
//! way an interrupted write would:
//!
//! - Needle appended, index never committed: pile longer than cursor
//! - Index log record half written: torn log tail
//! - Index log damaged in the middle: open must fail
//! - Pile lost bytes the index points at: open must fail

use haystack_engine::{
    CancelToken, DiskHaystack, Haystack, HaystackConfig, HaystackError,
};
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn open(path: &Path) -> DiskHaystack {
    Haystack::open_dir_with_config(path, HaystackConfig::for_testing()).unwrap()
}

fn pile_path(root: &Path, id: u64) -> std::path::PathBuf {
    root.join("piles").join(format!("pile-{:06}.pile", id))
}

fn index_log(root: &Path) -> std::path::PathBuf {
    root.join("index").join("index.log")
}

fn append_bytes(path: &Path, bytes: &[u8]) {
    let mut file = OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(bytes).unwrap();
    file.sync_all().unwrap();
}

#[test]
fn test_needle_without_index_entry_is_trimmed() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("torn_pile");

    let cursor = {
        let store = open(&path);
        store.put(b"committed", b"safe", 0).unwrap();
        store.stats().unwrap().active_cursor
    };

    // A needle that made it to the pile but never to the index
    let orphan = haystack_durability::encode(b"orphan", b"lost on crash", 0);
    append_bytes(&pile_path(&path, 0), &orphan);

    let store = open(&path);
    assert_eq!(store.stats().unwrap().recovered_bytes, orphan.len() as u64);
    assert_eq!(
        std::fs::metadata(pile_path(&path, 0)).unwrap().len(),
        cursor
    );
    assert_eq!(store.get(b"committed").unwrap(), b"safe");
    assert!(store.get(b"orphan").unwrap_err().is_not_found());

    // The next put lands exactly where the orphan was
    store.put(b"next", b"value", 0).unwrap();
    assert_eq!(store.entry(b"next").unwrap().unwrap().offset, cursor);
}

#[test]
fn test_partial_needle_is_trimmed() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("partial_needle");
    {
        let store = open(&path);
        store.put(b"k", b"v", 0).unwrap();
    }
    let needle = haystack_durability::encode(b"half", b"written", 0);
    append_bytes(&pile_path(&path, 0), &needle[..needle.len() / 2]);

    let store = open(&path);
    assert!(store.verify().unwrap().is_clean());
    assert_eq!(store.get(b"k").unwrap(), b"v");
}

#[test]
fn test_torn_index_log_tail_is_truncated() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("torn_index");
    let log_len = {
        let store = open(&path);
        store.put(b"a", b"1", 0).unwrap();
        store.put(b"b", b"2", 0).unwrap();
        drop(store);
        std::fs::metadata(index_log(&path)).unwrap().len()
    };

    // Length prefix promises more bytes than were written
    append_bytes(&index_log(&path), &[0x40, 0, 0, 0, 1, 2, 0, 0, 0]);

    let store = open(&path);
    assert_eq!(std::fs::metadata(index_log(&path)).unwrap().len(), log_len);
    assert_eq!(store.get(b"a").unwrap(), b"1");
    assert_eq!(store.get(b"b").unwrap(), b"2");
}

#[test]
fn test_lost_final_commit_is_trimmed_from_pile() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("lost_commit");
    let (log_before, pile_before) = {
        let store = open(&path);
        store.put(b"a", b"1", 0).unwrap();
        let log_before = std::fs::metadata(index_log(&path)).unwrap().len();
        let pile_before = store.stats().unwrap().active_cursor;
        store.put(b"b", b"2", 0).unwrap();
        (log_before, pile_before)
    };

    // Tear the last index record: the needle for "b" is in the pile, but its
    // commit is gone.
    let log = index_log(&path);
    let len = std::fs::metadata(&log).unwrap().len();
    OpenOptions::new()
        .write(true)
        .open(&log)
        .unwrap()
        .set_len(len - 3)
        .unwrap();

    let store = open(&path);
    assert_eq!(std::fs::metadata(&log).unwrap().len(), log_before);
    assert_eq!(store.stats().unwrap().active_cursor, pile_before);
    assert!(store.stats().unwrap().recovered_bytes > 0);
    assert_eq!(store.get(b"a").unwrap(), b"1");
    assert!(store.get(b"b").unwrap_err().is_not_found());
}

#[test]
fn test_mid_log_corruption_fails_open() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("mid_log");
    {
        let store = open(&path);
        store.put(b"a", b"1", 0).unwrap();
        store.put(b"b", b"2", 0).unwrap();
    }

    // Damage the first record's payload; later records are intact
    let mut file = OpenOptions::new()
        .write(true)
        .open(index_log(&path))
        .unwrap();
    file.seek(SeekFrom::Start(6)).unwrap();
    file.write_all(&[0xFF]).unwrap();
    drop(file);

    assert!(matches!(
        Haystack::open_dir(&path),
        Err(HaystackError::Inconsistent(_))
    ));
}

#[test]
fn test_broken_index_length_prefix_keeps_piles_intact() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("broken_prefix");
    let (offset, pile_len) = {
        let store = open(&path);
        store.put(b"a", b"1", 0).unwrap();
        let offset = std::fs::metadata(index_log(&path)).unwrap().len();
        store.put(b"b", b"2", 0).unwrap();
        store.put(b"c", b"3", 0).unwrap();
        (offset, store.stats().unwrap().active_cursor)
    };

    // High byte of the length prefix of the record committing "b"
    let mut file = OpenOptions::new()
        .write(true)
        .open(index_log(&path))
        .unwrap();
    file.seek(SeekFrom::Start(offset + 3)).unwrap();
    file.write_all(&[0xFF]).unwrap();
    drop(file);

    assert!(matches!(
        Haystack::open_dir(&path),
        Err(HaystackError::Inconsistent(_))
    ));
    // Committed needles were not trimmed by recovery
    assert_eq!(
        std::fs::metadata(pile_path(&path, 0)).unwrap().len(),
        pile_len
    );
}

#[test]
fn test_pile_shorter_than_cursor_fails_open() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("short_pile");
    {
        let store = open(&path);
        store.put(b"a", b"some payload", 0).unwrap();
    }
    OpenOptions::new()
        .write(true)
        .open(pile_path(&path, 0))
        .unwrap()
        .set_len(10)
        .unwrap();

    assert!(matches!(
        Haystack::open_dir(&path),
        Err(HaystackError::Inconsistent(_))
    ));
}

#[test]
fn test_cancelled_put_leaves_no_trace() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("cancelled");
    let store = open(&path);
    store.put(b"kept", b"v", 0).unwrap();
    let pile_len = std::fs::metadata(pile_path(&path, 0)).unwrap().len();

    let token = CancelToken::new();
    token.cancel();
    assert!(matches!(
        store.put_with_token(b"dropped", b"v", 0, &token),
        Err(HaystackError::Cancelled)
    ));

    assert!(!store.contains(b"dropped").unwrap());
    assert_eq!(
        std::fs::metadata(pile_path(&path, 0)).unwrap().len(),
        pile_len
    );
    drop(store);

    let store = open(&path);
    assert_eq!(store.stats().unwrap().recovered_bytes, 0);
    assert!(!store.contains(b"dropped").unwrap());
}
