//! Concurrent key→value map backends.
//!
//! The cache core never locks around its value storage; it relies on a map
//! whose `add` is an atomic insert-or-replace. That single primitive is the
//! admission gate: for a given key, exactly one of any number of concurrent
//! `add` callers observes "no prior value", and only that caller goes on to
//! register the key with the policy.
//!
//! ## Key Components
//!
//! - [`ConcurrentMap`]: the three-operation capability (`get`/`add`/`delete`).
//! - [`LockedMap`]: one read/write lock around a `HashMap`. The default.
//! - [`BucketedMap`]: independently-locked buckets indexed by `key mod n`,
//!   for integer keys.
//! - [`StripedMap`]: lock-striped generic alternative, stripes chosen by
//!   hashing; works for any `Hash` key.
//!
//! ## Ownership Model
//!
//! `get` hands back an owned clone because a reference could not outlive the
//! internal lock guard. The cache stores `Arc`-wrapped entries, so the clone
//! is a reference-count bump.
//!
//! ## When to Use
//!
//! - `LockedMap`: the default; fine until the lock becomes the hot spot.
//! - `BucketedMap`: integer-keyed workloads with high write contention.
//! - `StripedMap`: the same contention relief for non-integer keys.

use std::collections::HashMap;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};

use parking_lot::RwLock;

/// Concurrent map capability required by the cache core.
///
/// Implementations are internally synchronized; all methods take `&self`.
pub trait ConcurrentMap<K, V>: Send + Sync {
    /// Returns a clone of the value for `key`, if present.
    fn get(&self, key: &K) -> Option<V>;

    /// Inserts or replaces atomically, returning the prior value.
    ///
    /// For a given key, at most one concurrent caller observes `None`
    /// between the insert and the matching `delete`; the cache's admission
    /// protocol depends on this.
    fn add(&self, key: K, value: V) -> Option<V>;

    /// Removes `key`, returning its value if it was present.
    fn delete(&self, key: &K) -> Option<V>;
}

impl<K, V, M> ConcurrentMap<K, V> for Box<M>
where
    M: ConcurrentMap<K, V> + ?Sized,
{
    fn get(&self, key: &K) -> Option<V> {
        (**self).get(key)
    }

    fn add(&self, key: K, value: V) -> Option<V> {
        (**self).add(key, value)
    }

    fn delete(&self, key: &K) -> Option<V> {
        (**self).delete(key)
    }
}

/// Map backend guarded by a single read/write lock.
///
/// # Example
///
/// ```
/// use arckit::maps::{ConcurrentMap, LockedMap};
///
/// let map: LockedMap<&str, i32> = LockedMap::new();
/// assert_eq!(map.add("a", 1), None);
/// assert_eq!(map.add("a", 2), Some(1));
/// assert_eq!(map.get(&"a"), Some(2));
/// assert_eq!(map.delete(&"a"), Some(2));
/// assert_eq!(map.delete(&"a"), None);
/// ```
#[derive(Debug)]
pub struct LockedMap<K, V> {
    inner: RwLock<HashMap<K, V>>,
}

impl<K, V> LockedMap<K, V> {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for LockedMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ConcurrentMap<K, V> for LockedMap<K, V>
where
    K: Eq + Hash + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> Option<V> {
        self.inner.read().get(key).cloned()
    }

    fn add(&self, key: K, value: V) -> Option<V> {
        self.inner.write().insert(key, value)
    }

    fn delete(&self, key: &K) -> Option<V> {
        self.inner.write().remove(key)
    }
}

/// Integer view of a key, used by [`BucketedMap`] to pick a bucket.
pub trait BucketKey {
    /// Returns the integer used for `key mod n` bucket selection.
    fn bucket(&self) -> u64;
}

macro_rules! impl_bucket_key {
    ($($t:ty),* $(,)?) => {
        $(
            impl BucketKey for $t {
                #[inline]
                fn bucket(&self) -> u64 {
                    *self as u64
                }
            }
        )*
    };
}

impl_bucket_key!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize);

/// Map backend sharded into `n` independently-locked buckets by `key mod n`.
///
/// Restricted to integer keys (via [`BucketKey`]); sequential key ranges
/// spread evenly without hashing.
///
/// # Example
///
/// ```
/// use arckit::maps::{BucketedMap, ConcurrentMap};
///
/// let map: BucketedMap<u64, &str> = BucketedMap::new(16);
/// assert_eq!(map.add(7, "seven"), None);
/// assert_eq!(map.get(&7), Some("seven"));
/// ```
#[derive(Debug)]
pub struct BucketedMap<K, V> {
    buckets: Vec<LockedMap<K, V>>,
}

impl<K, V> BucketedMap<K, V> {
    /// Creates a map with `n` buckets; `n = 0` defaults to 256.
    pub fn new(n: usize) -> Self {
        let n = if n == 0 { 256 } else { n };
        Self {
            buckets: (0..n).map(|_| LockedMap::new()).collect(),
        }
    }
}

impl<K, V> BucketedMap<K, V>
where
    K: BucketKey,
{
    fn bucket(&self, key: &K) -> &LockedMap<K, V> {
        let idx = key.bucket() % self.buckets.len() as u64;
        &self.buckets[idx as usize]
    }
}

impl<K, V> ConcurrentMap<K, V> for BucketedMap<K, V>
where
    K: BucketKey + Eq + Hash + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> Option<V> {
        self.bucket(key).get(key)
    }

    fn add(&self, key: K, value: V) -> Option<V> {
        self.bucket(&key).add(key, value)
    }

    fn delete(&self, key: &K) -> Option<V> {
        self.bucket(key).delete(key)
    }
}

/// Map backend striped across `n` locks, with stripes chosen by hashing.
///
/// The generic alternative to [`BucketedMap`] for keys without a natural
/// integer form.
///
/// # Example
///
/// ```
/// use arckit::maps::{ConcurrentMap, StripedMap};
///
/// let map: StripedMap<String, i32> = StripedMap::new(8);
/// assert_eq!(map.add("a".to_string(), 1), None);
/// assert_eq!(map.get(&"a".to_string()), Some(1));
/// ```
#[derive(Debug)]
pub struct StripedMap<K, V> {
    stripes: Vec<RwLock<HashMap<K, V>>>,
    hasher: RandomState,
}

impl<K, V> StripedMap<K, V> {
    /// Creates a map with `n` stripes; `n = 0` defaults to 256.
    pub fn new(n: usize) -> Self {
        let n = if n == 0 { 256 } else { n };
        Self {
            stripes: (0..n).map(|_| RwLock::new(HashMap::new())).collect(),
            hasher: RandomState::new(),
        }
    }
}

impl<K, V> StripedMap<K, V>
where
    K: Hash,
{
    fn stripe(&self, key: &K) -> &RwLock<HashMap<K, V>> {
        let idx = self.hasher.hash_one(key) % self.stripes.len() as u64;
        &self.stripes[idx as usize]
    }
}

impl<K, V> ConcurrentMap<K, V> for StripedMap<K, V>
where
    K: Eq + Hash + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> Option<V> {
        self.stripe(key).read().get(key).cloned()
    }

    fn add(&self, key: K, value: V) -> Option<V> {
        self.stripe(&key).write().insert(key, value)
    }

    fn delete(&self, key: &K) -> Option<V> {
        self.stripe(key).write().remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn check_basic_ops(map: &impl ConcurrentMap<u64, String>) {
        assert_eq!(map.get(&1), None);
        assert_eq!(map.add(1, "one".to_string()), None);
        assert_eq!(map.get(&1), Some("one".to_string()));

        // add replaces and returns the prior value
        assert_eq!(map.add(1, "uno".to_string()), Some("one".to_string()));
        assert_eq!(map.get(&1), Some("uno".to_string()));

        assert_eq!(map.delete(&1), Some("uno".to_string()));
        assert_eq!(map.delete(&1), None);
        assert_eq!(map.get(&1), None);
    }

    #[test]
    fn locked_map_basic_ops() {
        check_basic_ops(&LockedMap::new());
    }

    #[test]
    fn bucketed_map_basic_ops() {
        check_basic_ops(&BucketedMap::new(4));
    }

    #[test]
    fn striped_map_basic_ops() {
        check_basic_ops(&StripedMap::new(4));
    }

    #[test]
    fn bucketed_map_zero_buckets_defaults() {
        let map: BucketedMap<u64, u64> = BucketedMap::new(0);
        assert_eq!(map.buckets.len(), 256);

        for k in 0..1000u64 {
            assert_eq!(map.add(k, k * 2), None);
        }
        for k in 0..1000u64 {
            assert_eq!(map.get(&k), Some(k * 2));
        }
    }

    #[test]
    fn bucketed_map_signed_keys() {
        let map: BucketedMap<i64, i64> = BucketedMap::new(7);
        assert_eq!(map.add(-42, 1), None);
        assert_eq!(map.get(&-42), Some(1));
        assert_eq!(map.delete(&-42), Some(1));
    }

    fn check_single_insert_winner(map: impl ConcurrentMap<u64, u64> + 'static) {
        let map = Arc::new(map);
        let inserted = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let map = map.clone();
                let inserted = inserted.clone();
                thread::spawn(move || {
                    if map.add(1, i).is_none() {
                        inserted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // One and only one concurrent caller may observe the insert.
        assert_eq!(inserted.load(Ordering::SeqCst), 1);
        assert!(map.get(&1).is_some());
    }

    #[test]
    fn add_has_a_single_insert_winner() {
        check_single_insert_winner(LockedMap::new());
        check_single_insert_winner(BucketedMap::new(8));
        check_single_insert_winner(StripedMap::new(8));
    }
}
