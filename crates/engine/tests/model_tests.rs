//! Property tests against a HashMap model
//!
//! Any sequence of puts must leave the store answering gets exactly like a
//! map that saw the same puts, before and after reopen.

use haystack_engine::{Haystack, HaystackConfig};
use proptest::prelude::*;
use std::collections::HashMap;
use tempfile::TempDir;

fn op_strategy() -> impl Strategy<Value = (u8, Vec<u8>, u64)> {
    (
        0u8..16,
        proptest::collection::vec(any::<u8>(), 0..700),
        any::<u64>(),
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_store_matches_model(ops in proptest::collection::vec(op_strategy(), 1..40)) {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("model");
        let config = HaystackConfig::new().with_max_pile_size(2048);
        let mut model: HashMap<Vec<u8>, (Vec<u8>, u64)> = HashMap::new();

        {
            let store = Haystack::open_dir_with_config(&path, config.clone()).unwrap();
            for (key, data, flag) in &ops {
                let key = vec![b'k', *key];
                store.put(&key, data, *flag).unwrap();
                model.insert(key, (data.clone(), *flag));
            }
            for (key, (data, flag)) in &model {
                prop_assert_eq!(&store.get(key).unwrap(), data);
                prop_assert_eq!(store.entry(key).unwrap().unwrap().flag, *flag);
            }
            prop_assert!(store.get(b"absent").unwrap_err().is_not_found());
        }

        let store = Haystack::open_dir_with_config(&path, config).unwrap();
        prop_assert_eq!(store.stats().unwrap().keys, model.len());
        for (key, (data, _)) in &model {
            prop_assert_eq!(&store.get(key).unwrap(), data);
        }

        let report = store.verify().unwrap();
        prop_assert!(report.is_clean());
        prop_assert_eq!(report.live as usize, model.len());
        prop_assert_eq!(report.needles as usize, ops.len());
    }
}

#[test]
fn test_compact_index_keeps_every_key() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("compact");
    {
        let store = Haystack::open_dir(&path).unwrap();
        for round in 0..20u32 {
            for key in 0..5u32 {
                store
                    .put(&key.to_le_bytes(), &round.to_le_bytes(), 0)
                    .unwrap();
            }
        }
        let log = path.join("index").join("index.log");
        let before = std::fs::metadata(&log).unwrap().len();
        assert!(store.compact_index().unwrap());
        assert!(std::fs::metadata(&log).unwrap().len() < before);

        store.put(b"post-compact", b"v", 0).unwrap();
    }

    let store = Haystack::open_dir(&path).unwrap();
    for key in 0..5u32 {
        assert_eq!(store.get(&key.to_le_bytes()).unwrap(), 19u32.to_le_bytes());
    }
    assert_eq!(store.get(b"post-compact").unwrap(), b"v");
    assert_eq!(store.stats().unwrap().active_cursor, {
        let entry = store.entry(b"post-compact").unwrap().unwrap();
        entry.offset + entry.size
    });
}

#[test]
fn test_ephemeral_compact_index_is_noop() {
    let store = Haystack::ephemeral(HaystackConfig::for_testing()).unwrap();
    store.put(b"k", b"v", 0).unwrap();
    assert!(!store.compact_index().unwrap());
}
