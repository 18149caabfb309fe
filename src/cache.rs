//! Concurrent, size-bounded cache coupling a policy to a concurrent map.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                             Cache<K, V>                                 │
//! │                                                                         │
//! │  ┌─────────────────────────┐        ┌─────────────────────────────┐     │
//! │  │ items: ConcurrentMap    │        │ policy: Policy (one lock)   │     │
//! │  │ K → Arc<CacheValue<V>>  │        │ eviction ordering only      │     │
//! │  │ internally synchronized │        │ Mutex or RwLock (`rlock`)   │     │
//! │  └─────────────────────────┘        └─────────────────────────────┘     │
//! │                                                                         │
//! │  atomics: length · size · capacity · evicting (single-evictor gate)     │
//! └─────────────────────────────────────────────────────────────────────────┘
//!
//! Set Flow (insertion)
//! ────────────────────
//!
//!   set(k, v):
//!     1. items.add(k, cv)    ── atomic admission gate
//!        replacement? adjust size, fire evict callback, done
//!     2. eviction pass       ── only if this caller won the evictor CAS
//!     3. length += 1, size += cv.size
//!     4. policy.add(k)       ── under the policy lock; must succeed
//!
//!   The map-first ordering keeps the policy a subset of the map at all
//!   times: an evictor that observes a key in the policy can safely
//!   items.delete(k).
//!
//! Get Flow
//! ────────
//!
//!   get(k):
//!     1. items.get(k), expiry filter
//!     2. try-lock promote ── contended lock skips the promotion, trading
//!        strict ARC fidelity for read throughput; set() never skips
//! ```
//!
//! ## Key Components
//!
//! - [`Cache`]: the concurrent cache.
//! - [`CacheValue`]: immutable entry wrapper (value, size, expiry stamp).
//! - [`CacheBuilder`]: options (capacity, expiration, callbacks, backends).
//!
//! ## Expiration
//!
//! A per-cache epoch (`Instant` at construction) plus a `u32` second count:
//! `expire = secs_since_epoch + expiration_secs` at set time, 0 meaning
//! never. Durations over `u32::MAX` seconds coerce to forever; non-zero
//! durations clamp up to at least one second. Expired entries are filtered
//! on read and otherwise age out through normal eviction.
//!
//! ## Thread Safety
//!
//! All operations take `&self`; share the cache between threads with
//! `Arc<Cache<K, V>>`. Counters are atomics, the map synchronizes itself,
//! and the policy is the only locked structure. Only a single eviction pass
//! runs at a time (CAS-gated), so policy-lock contention stays bounded.

use std::hash::Hash;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::maps::{ConcurrentMap, LockedMap};
use crate::policy::{ArcPolicy, Policy};

const DEFAULT_CAPACITY: i64 = 100;

/// Eviction callback. Receives the departing key and value; may be invoked
/// concurrently.
pub type EvictFn<K, V> = dyn Fn(&K, &V) + Send + Sync;

/// Eviction skip predicate. Victims for which it returns `true` are passed
/// over by the eviction pass.
pub type EvictSkipFn<K, V> = dyn Fn(&K, &V) -> bool + Send + Sync;

type PolicyBox<K> = Box<dyn Policy<K> + Send + Sync>;
type MapBox<K, V> = Box<dyn ConcurrentMap<K, Arc<CacheValue<V>>>>;

/// An entry as stored in the map: the user value, its cached size, and its
/// expiry stamp.
///
/// A `CacheValue`'s size never changes; replacing a key creates a new
/// `CacheValue` so that concurrent size accounting stays exact.
#[derive(Debug)]
pub struct CacheValue<V> {
    /// Seconds since the cache epoch; 0 means never.
    expire: u32,
    /// Caller-supplied size, in whatever unit capacity is measured in.
    size: u32,
    value: V,
}

impl<V> CacheValue<V> {
    /// Returns the stored value.
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Returns the entry's size as given at set time.
    pub fn size(&self) -> u32 {
        self.size
    }
}

// ---------------------------------------------------------------------------
// Policy lock
// ---------------------------------------------------------------------------

// The `rlock` option decides whether iteration may share the lock. With a
// plain mutex a "read" acquisition is exclusive.
enum PolicyLock<K> {
    Exclusive(Mutex<PolicyBox<K>>),
    Shared(RwLock<PolicyBox<K>>),
}

enum PolicyReadGuard<'a, K> {
    Exclusive(MutexGuard<'a, PolicyBox<K>>),
    Shared(RwLockReadGuard<'a, PolicyBox<K>>),
}

enum PolicyWriteGuard<'a, K> {
    Exclusive(MutexGuard<'a, PolicyBox<K>>),
    Shared(RwLockWriteGuard<'a, PolicyBox<K>>),
}

impl<K> PolicyLock<K> {
    fn read(&self) -> PolicyReadGuard<'_, K> {
        match self {
            Self::Exclusive(mutex) => PolicyReadGuard::Exclusive(mutex.lock()),
            Self::Shared(rwlock) => PolicyReadGuard::Shared(rwlock.read()),
        }
    }

    fn write(&self) -> PolicyWriteGuard<'_, K> {
        match self {
            Self::Exclusive(mutex) => PolicyWriteGuard::Exclusive(mutex.lock()),
            Self::Shared(rwlock) => PolicyWriteGuard::Shared(rwlock.write()),
        }
    }

    fn try_write(&self) -> Option<PolicyWriteGuard<'_, K>> {
        match self {
            Self::Exclusive(mutex) => mutex.try_lock().map(PolicyWriteGuard::Exclusive),
            Self::Shared(rwlock) => rwlock.try_write().map(PolicyWriteGuard::Shared),
        }
    }
}

impl<K> Deref for PolicyReadGuard<'_, K> {
    type Target = PolicyBox<K>;

    fn deref(&self) -> &Self::Target {
        match self {
            Self::Exclusive(guard) => guard,
            Self::Shared(guard) => guard,
        }
    }
}

impl<K> Deref for PolicyWriteGuard<'_, K> {
    type Target = PolicyBox<K>;

    fn deref(&self) -> &Self::Target {
        match self {
            Self::Exclusive(guard) => guard,
            Self::Shared(guard) => guard,
        }
    }
}

impl<K> DerefMut for PolicyWriteGuard<'_, K> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self {
            Self::Exclusive(guard) => guard,
            Self::Shared(guard) => guard,
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for [`Cache`] instances.
///
/// # Example
///
/// ```
/// use arckit::cache::CacheBuilder;
///
/// let cache = CacheBuilder::<u64, String>::new()
///     .capacity(1000)
///     .expiration(std::time::Duration::from_secs(60))
///     .build();
///
/// cache.set(1, "one".to_string());
/// assert_eq!(cache.get(&1), Some("one".to_string()));
/// ```
pub struct CacheBuilder<K, V> {
    capacity: i64,
    expiration: Duration,
    on_evict: Option<Box<EvictFn<K, V>>>,
    evict_skip: Option<Box<EvictSkipFn<K, V>>>,
    rlock: bool,
    map: Option<MapBox<K, V>>,
    policy: Option<PolicyBox<K>>,
}

impl<K, V> CacheBuilder<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a builder with defaults: capacity 100, no expiration, no
    /// callbacks, exclusive policy lock, [`LockedMap`] backend,
    /// [`ArcPolicy`].
    pub fn new() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            expiration: Duration::ZERO,
            on_evict: None,
            evict_skip: None,
            rlock: false,
            map: None,
            policy: None,
        }
    }

    /// Sets the capacity, in the units passed to
    /// [`set_sized`](Cache::set_sized). Non-positive values coerce to the
    /// default of 100.
    pub fn capacity(mut self, capacity: i64) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the entry expiration. Zero (the default) means entries never
    /// expire.
    pub fn expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }

    /// Sets the eviction callback, invoked for every value leaving the
    /// cache (eviction, replacement, clear). May be called concurrently.
    pub fn on_evict(mut self, on_evict: impl Fn(&K, &V) + Send + Sync + 'static) -> Self {
        self.on_evict = Some(Box::new(on_evict));
        self
    }

    /// Sets a predicate that exempts entries from eviction while it returns
    /// `true`.
    pub fn evict_skip(
        mut self,
        evict_skip: impl Fn(&K, &V) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.evict_skip = Some(Box::new(evict_skip));
        self
    }

    /// Backs the policy lock with an `RwLock` so iteration can share it.
    /// Defaults to `false` (plain mutex).
    pub fn rlock(mut self, rlock: bool) -> Self {
        self.rlock = rlock;
        self
    }

    /// Replaces the map backend. Defaults to [`LockedMap`].
    pub fn map(mut self, map: impl ConcurrentMap<K, Arc<CacheValue<V>>> + 'static) -> Self {
        self.map = Some(Box::new(map));
        self
    }

    /// Replaces the eviction policy. Defaults to [`ArcPolicy`].
    pub fn policy(mut self, policy: impl Policy<K> + Send + Sync + 'static) -> Self {
        self.policy = Some(Box::new(policy));
        self
    }

    /// Builds the cache.
    pub fn build(self) -> Cache<K, V> {
        let capacity = if self.capacity <= 0 {
            DEFAULT_CAPACITY
        } else {
            self.capacity
        };

        let expiration = if self.expiration.is_zero() {
            0 // forever
        } else {
            let secs = self.expiration.as_secs();
            if secs > u64::from(u32::MAX) {
                0 // forever
            } else {
                (secs as u32).max(1)
            }
        };

        let policy = self.policy.unwrap_or_else(|| Box::new(ArcPolicy::new()));
        let policy = if self.rlock {
            PolicyLock::Shared(RwLock::new(policy))
        } else {
            PolicyLock::Exclusive(Mutex::new(policy))
        };

        Cache {
            items: self.map.unwrap_or_else(|| Box::new(LockedMap::new())),
            policy,
            on_evict: self.on_evict.unwrap_or_else(|| Box::new(|_, _| {})),
            evict_skip: self.evict_skip,
            expiration,
            epoch: Instant::now(),
            evicting: AtomicBool::new(false),
            capacity: AtomicI64::new(capacity),
            size: AtomicI64::new(0),
            length: AtomicI64::new(0),
        }
    }
}

impl<K, V> Default for CacheBuilder<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Concurrent, size-bounded cache.
///
/// Values are stored behind an `Arc` internally and cloned out of reads, so
/// `V` should be cheap to clone (wrap heavyweight payloads in an `Arc`).
///
/// # Example
///
/// ```
/// use arckit::cache::CacheBuilder;
///
/// let cache = CacheBuilder::<&str, i32>::new().capacity(2).build();
///
/// cache.set("a", 1);
/// cache.set_sized("b", 2, 1);
///
/// assert_eq!(cache.get(&"a"), Some(1));
/// assert_eq!(cache.len(), 2);
/// assert_eq!(cache.size(), 2);
/// ```
pub struct Cache<K, V> {
    items: MapBox<K, V>,
    policy: PolicyLock<K>,
    on_evict: Box<EvictFn<K, V>>,
    evict_skip: Option<Box<EvictSkipFn<K, V>>>,

    expiration: u32,
    epoch: Instant,

    evicting: AtomicBool,
    capacity: AtomicI64,
    size: AtomicI64,
    length: AtomicI64,
}

// Resets the single-evictor gate even if an eviction callback panics.
struct EvictingReset<'a>(&'a AtomicBool);

impl Drop for EvictingReset<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a cache with default options.
    pub fn new() -> Self {
        CacheBuilder::new().build()
    }

    /// Returns the value for `key` without promoting it.
    pub fn peek(&self, key: &K) -> Option<V> {
        self.lookup(key).map(|cv| cv.value.clone())
    }

    /// Returns the value for `key`, promoting it on a hit.
    pub fn get(&self, key: &K) -> Option<V> {
        let cv = self.lookup(key)?;
        self.promote(key);
        Some(cv.value.clone())
    }

    /// Re-ranks `key` toward the hot end of the policy.
    ///
    /// Uses a try-lock: under contention the promotion is skipped rather
    /// than waited for.
    pub fn promote(&self, key: &K) {
        if let Some(mut policy) = self.policy.try_write() {
            policy.promote(key);
        }
    }

    /// Inserts `key → value` with size 1. See [`set_sized`](Cache::set_sized).
    pub fn set(&self, key: K, value: V) {
        self.set_sized(key, value, 1);
    }

    /// Inserts `key → value`, accounting `size` units against capacity.
    ///
    /// Replaces any existing value, which is handed to the eviction
    /// callback. A minimum size of 1 is applied.
    pub fn set_sized(&self, key: K, value: V, size: u32) {
        // items.add replaces, and we return on replacement. That ensures
        // only one caller gets past items.add until the matching
        // items.delete after eviction, keeping the key sets of the policy
        // and the map consistent.
        let size = size.max(1);
        let cv = Arc::new(CacheValue {
            expire: self.expire_stamp(),
            size,
            value,
        });

        if let Some(prior) = self.items.add(key.clone(), cv) {
            // remove + add
            self.size
                .fetch_add(i64::from(size) - i64::from(prior.size), Ordering::SeqCst);
            (self.on_evict)(&key, &prior.value);
            return;
        }

        self.run_evictions();

        self.length.fetch_add(1, Ordering::SeqCst);
        self.size.fetch_add(i64::from(size), Ordering::SeqCst);

        let mut policy = self.policy.write();
        if !policy.add(key) {
            panic!("cache invariant violated: inserted key already present in policy");
        }
    }

    /// Runs an eviction pass explicitly.
    ///
    /// Returns `true` when the pass could not bring `size` under
    /// `capacity` (every candidate was skipped or the policy ran dry).
    pub fn evict(&self) -> bool {
        self.run_evictions();
        self.size.load(Ordering::SeqCst) >= self.capacity.load(Ordering::SeqCst)
    }

    /// Iterates live entries hottest to coldest, skipping expired ones.
    ///
    /// Holds the policy read lock for the iterator's lifetime, so writers
    /// that need the policy will block until it is dropped.
    pub fn iter(&self) -> Iter<'_, K, V> {
        let guard = self.policy.read();
        let keys: Vec<K> = guard.values().cloned().collect();
        Iter {
            cache: self,
            _guard: guard,
            keys: keys.into_iter(),
        }
    }

    /// Returns the number of live entries.
    pub fn len(&self) -> usize {
        self.length.load(Ordering::SeqCst).max(0) as usize
    }

    /// Returns `true` if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the summed size of live entries.
    pub fn size(&self) -> i64 {
        self.size.load(Ordering::SeqCst)
    }

    /// Evicts everything and resets the policy. Capacity is unchanged.
    /// Blocks on the policy lock for the duration.
    pub fn clear(&self) {
        let mut policy = self.policy.write();
        for key in policy.values() {
            let Some(cv) = self.items.delete(key) else {
                panic!("cache invariant violated: policy key missing from the map");
            };
            self.length.fetch_sub(1, Ordering::SeqCst);
            self.size.fetch_sub(i64::from(cv.size), Ordering::SeqCst);
            (self.on_evict)(key, &cv.value);
        }
        policy.clear();
    }

    /// Returns the current capacity.
    pub fn capacity(&self) -> i64 {
        self.capacity.load(Ordering::SeqCst)
    }

    /// Sets the capacity (clamped to at least 1) and returns the old value.
    pub fn set_capacity(&self, new: i64) -> i64 {
        self.capacity.swap(new.max(1), Ordering::SeqCst)
    }

    /// Compare-and-swaps the capacity; returns whether the swap happened.
    pub fn swap_capacity(&self, old: i64, new: i64) -> bool {
        self.capacity
            .compare_exchange(old, new, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Grows capacity to `min(size, capacity) + available`, bounded by
    /// `max`; a no-op when the result would not exceed the current
    /// capacity. `available` should not count space already taken by the
    /// cache.
    ///
    /// Prefer [`set_available_capacity`](Cache::set_available_capacity).
    pub fn set_larger_capacity(&self, available: i64, max: i64) {
        loop {
            let cap = self.capacity.load(Ordering::SeqCst);
            let size = self.size.load(Ordering::SeqCst);

            // If size is over capacity, use capacity as the base so
            // repeated calls with a zero delta cannot ratchet upward.
            let base = size.min(cap);
            let new = (base + available).min(max);
            if new <= cap {
                return;
            }
            if self
                .capacity
                .compare_exchange(cap, new, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Sets capacity to `size + available`, clamped to `[1, max]`.
    /// `available` should not count space already taken by the cache.
    pub fn set_available_capacity(&self, available: i64, max: i64) {
        let new = (self.size.load(Ordering::SeqCst) + available).min(max).max(1);
        self.capacity.store(new, Ordering::SeqCst);
    }

    fn lookup(&self, key: &K) -> Option<Arc<CacheValue<V>>> {
        let cv = self.items.get(key)?;
        if self.is_expired(cv.expire) {
            return None;
        }
        Some(cv)
    }

    fn run_evictions(&self) {
        if self
            .evicting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return; // another caller owns the pass; never block
        }
        let _reset = EvictingReset(&self.evicting);

        while self.size.load(Ordering::SeqCst) >= self.capacity.load(Ordering::SeqCst) {
            let Some(key) = self.policy_evict() else {
                break;
            };
            let Some(cv) = self.items.delete(&key) else {
                panic!("cache invariant violated: policy victim missing from the map");
            };

            self.length.fetch_sub(1, Ordering::SeqCst);
            self.size.fetch_sub(i64::from(cv.size), Ordering::SeqCst);
            (self.on_evict)(&key, &cv.value);
        }
    }

    fn policy_evict(&self) -> Option<K> {
        let mut policy = self.policy.write();
        match &self.evict_skip {
            Some(skip) => policy.evict_skip(&mut |key| {
                self.items
                    .get(key)
                    .is_some_and(|cv| skip(key, &cv.value))
            }),
            None => policy.evict(),
        }
    }

    fn secs_after_epoch(&self) -> u32 {
        self.epoch.elapsed().as_secs().min(u64::from(u32::MAX)) as u32
    }

    fn expire_stamp(&self) -> u32 {
        if self.expiration == 0 {
            return 0;
        }
        self.secs_after_epoch().saturating_add(self.expiration)
    }

    fn is_expired(&self, stamp: u32) -> bool {
        stamp != 0 && self.secs_after_epoch() >= stamp
    }
}

impl<K, V> Default for Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> std::fmt::Debug for Cache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("length", &self.length.load(Ordering::SeqCst))
            .field("size", &self.size.load(Ordering::SeqCst))
            .field("capacity", &self.capacity.load(Ordering::SeqCst))
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// Hottest-to-coldest entry iterator returned by [`Cache::iter`].
///
/// Holds the policy read lock while alive. The key order is a consistent
/// snapshot; the values are read from the map as iteration proceeds and may
/// reflect writes newer than the snapshot.
pub struct Iter<'a, K, V> {
    cache: &'a Cache<K, V>,
    _guard: PolicyReadGuard<'a, K>,
    keys: std::vec::IntoIter<K>,
}

impl<K, V> Iterator for Iter<'_, K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let key = self.keys.next()?;
            let Some(cv) = self.cache.items.get(&key) else {
                panic!("cache invariant violated: policy key missing from the map");
            };
            if self.cache.is_expired(cv.expire) {
                continue;
            }
            return Some((key, cv.value.clone()));
        }
    }
}
