//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check the store and size estimator over generated inputs.

use proptest::prelude::*;
use std::collections::HashMap;
use std::time::Duration;

use crate::cache::{downcast_ref, estimate, Store};
use crate::error::CacheError;

// == Test Configuration ==
const TEST_TTL: Duration = Duration::from_secs(300);

// == Strategies ==
/// Generates cache keys from a small alphabet so sequences revisit keys
fn key_strategy() -> impl Strategy<Value = String> {
    "[a-e]{1,2}"
}

fn value_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 ]{0,256}"
}

#[derive(Debug, Clone)]
enum CacheOp {
    Set { key: String, value: String },
    Get { key: String },
    Delete { key: String },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        (key_strategy(), value_strategy()).prop_map(|(key, value)| CacheOp::Set { key, value }),
        key_strategy().prop_map(|key| CacheOp::Get { key }),
        key_strategy().prop_map(|key| CacheOp::Delete { key }),
    ]
}

fn get_string(store: &mut Store, key: &str) -> Option<String> {
    store
        .get(key)
        .and_then(|value| downcast_ref::<String>(&value).cloned())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // Every key maps to at most one entry, holding the most recently set value.
    #[test]
    fn prop_key_uniqueness(ops in prop::collection::vec(cache_op_strategy(), 1..60)) {
        let mut store = Store::new(0);
        let mut model: HashMap<String, String> = HashMap::new();

        for op in ops {
            match op {
                CacheOp::Set { key, value } => {
                    store.set(key.clone(), TEST_TTL, value.clone()).unwrap();
                    model.insert(key, value);
                }
                CacheOp::Get { key } => {
                    prop_assert_eq!(get_string(&mut store, &key), model.get(&key).cloned());
                }
                CacheOp::Delete { key } => {
                    prop_assert_eq!(store.delete(&key), model.remove(&key).is_some());
                }
            }

            let mut keys = store.keys();
            let total = keys.len();
            keys.sort();
            keys.dedup();
            prop_assert_eq!(keys.len(), total, "Duplicate key in store");
            prop_assert_eq!(store.count(), model.len());
        }
    }

    // Set followed by Get returns an equal value.
    #[test]
    fn prop_roundtrip_storage(key in key_strategy(), value in value_strategy()) {
        let mut store = Store::new(0);

        store.set(key.clone(), TEST_TTL, value.clone()).unwrap();

        prop_assert_eq!(get_string(&mut store, &key), Some(value));
    }

    // A rejected Set leaves count and size unchanged; an accepted one adds exactly one entry.
    #[test]
    fn prop_admission_control(
        max_bytes in 256usize..4096,
        values in prop::collection::vec(value_strategy(), 1..30)
    ) {
        let mut store = Store::new(max_bytes);

        for (i, value) in values.into_iter().enumerate() {
            let count_before = store.count();
            let size_before = store.size().unwrap();

            match store.set(format!("k{}", i), TEST_TTL, value) {
                Ok(()) => {
                    prop_assert_eq!(store.count(), count_before + 1);
                }
                Err(CacheError::OverBudget { .. }) => {
                    prop_assert_eq!(store.count(), count_before);
                    prop_assert_eq!(store.size().unwrap(), size_before);
                }
                Err(other) => prop_assert!(false, "unexpected error: {}", other),
            }
        }
    }

    // With no budget, Set never reports OverBudget.
    #[test]
    fn prop_unbounded_never_rejects(sizes in prop::collection::vec(0usize..65536, 1..20)) {
        let mut store = Store::new(0);

        for (i, size) in sizes.iter().enumerate() {
            let admitted = store.set(format!("k{}", i), TEST_TTL, vec![0u8; *size]).is_ok();
            prop_assert!(admitted);
        }
        prop_assert_eq!(store.count(), sizes.len());
    }

    // Estimating the same value twice gives the same answer.
    #[test]
    fn prop_estimate_deterministic(
        map in prop::collection::hash_map("[a-z]{1,8}", prop::collection::vec(any::<u32>(), 0..16), 0..16)
    ) {
        let first = estimate(&map);
        prop_assert!(first.is_some());
        prop_assert_eq!(first, estimate(&map));
    }
}
