//! Assertion helpers for stream pipeline tests.
//!
//! Shuffled results carry no ordering guarantee beyond "all records for a
//! key land in the same partition", so most tests compare multisets or sort
//! by key before asserting.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

/// Flatten per-partition results into one record sequence, partition order
/// preserved.
pub fn flatten<T>(parts: Vec<Vec<T>>) -> Vec<T> {
    parts.into_iter().flatten().collect()
}

/// Exact, order-dependent comparison.
pub fn assert_collections_equal<T: PartialEq + Debug>(actual: &[T], expected: &[T]) {
    assert_eq!(actual, expected, "collections differ");
}

/// Order-independent (multiset) comparison.
pub fn assert_unordered_equal<T: Eq + Hash + Debug>(actual: &[T], expected: &[T]) {
    fn count<T: Eq + Hash>(items: &[T]) -> HashMap<&T, usize> {
        let mut m: HashMap<&T, usize> = HashMap::new();
        for item in items {
            *m.entry(item).or_insert(0) += 1;
        }
        m
    }
    assert_eq!(
        count(actual),
        count(expected),
        "multisets differ: actual={actual:?} expected={expected:?}"
    );
}

/// Compare key/value pairs after sorting both sides by key.
pub fn assert_kv_equal<K, V>(actual: &[(K, V)], expected: &[(K, V)])
where
    K: Ord + Clone + Debug,
    V: PartialEq + Clone + Debug,
{
    let sorted = |items: &[(K, V)]| {
        let mut v = items.to_vec();
        v.sort_by(|a, b| a.0.cmp(&b.0));
        v
    };
    assert_eq!(sorted(actual), sorted(expected), "keyed collections differ");
}

/// Assert every record satisfies the predicate.
pub fn assert_all<T: Debug>(items: &[T], predicate: impl Fn(&T) -> bool) {
    for item in items {
        assert!(predicate(item), "record failed predicate: {item:?}");
    }
}
