//! Reference-counted cache values with deferred release.
//!
//! A [`CountingCache`] behaves like [`Cache`](crate::cache::Cache) except
//! that values implement [`Release`] and are only released once *every*
//! outstanding borrower is done with them: eviction alone does not free a
//! value that a reader is still holding through a [`Handle`].
//!
//! ## Node lifecycle
//!
//! ```text
//!   handles:  one per minted handle, plus an implicit sentinel for the
//!             node itself. The decrement that takes the count to -1 is
//!             the last borrower out.
//!
//!   released: 0 (open) ──node.release()──► 1 (node released)
//!                                              │ CAS by the decrement
//!                                              │ that reaches -1
//!                                              ▼
//!                                          2 (value released)
//!
//!   value.release() fires exactly once, only after BOTH
//!     (a) the node has been released (evicted or replaced), and
//!     (b) handles has reached -1.
//! ```
//!
//! The two-phase `released` state is what makes the order irrelevant: if
//! all handles finish before the node is released, the node's own
//! decrement performs the final transition; if the node is released first,
//! the last handle's decrement does.
//!
//! ## Key Components
//!
//! - [`Release`]: idempotent release hook implemented by cached values.
//! - [`Node`]: a value plus its atomic handle count and release state.
//! - [`Handle`]: an idempotent borrow token (released explicitly or on
//!   drop).
//! - [`OnceHandle`]: a leaner borrow token whose single release is
//!   enforced by ownership instead of a flag.
//! - [`CountingCache`] / [`CountingCacheBuilder`]: the cache wrapper.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use arckit::counting::{CountingCacheBuilder, Release};
//!
//! #[derive(Debug, Default)]
//! struct Buffer {
//!     returns: AtomicUsize,
//! }
//!
//! impl Release for Buffer {
//!     fn release(&self) {
//!         // return the buffer to its pool
//!         self.returns.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let cache = CountingCacheBuilder::new().capacity(10).build();
//!
//! let buf = Arc::new(Buffer::default());
//! let handle = cache.set(1, buf.clone());
//!
//! // The value stays alive while any handle is out.
//! assert_eq!(handle.value().returns.load(Ordering::SeqCst), 0);
//! handle.release();
//!
//! cache.clear();
//! assert_eq!(buf.returns.load(Ordering::SeqCst), 1);
//! ```

use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::time::Duration;

use crate::cache::{Cache, CacheBuilder, CacheValue};
use crate::maps::ConcurrentMap;
use crate::policy::Policy;

/// A resource that can be released back to its owner.
///
/// `release` must be idempotent; the counting layer guarantees at most one
/// call per node, but values may also be released by other owners.
pub trait Release {
    /// Releases the resource.
    fn release(&self);
}

impl<T: Release + ?Sized> Release for Arc<T> {
    fn release(&self) {
        (**self).release()
    }
}

/// Deferred node release passed to the eviction callback. Call it (at most
/// once) when the evicted value may actually be let go.
pub type DeferredRelease = Box<dyn FnOnce() + Send>;

/// Eviction callback for [`CountingCache`]: receives the key, the value,
/// and the deferred release. The caller owns the release; the value's own
/// `release` must not be called directly.
pub type CountingEvictFn<K, V> = dyn Fn(&K, &V, DeferredRelease) + Send + Sync;

const OPEN: i32 = 0;
const NODE_RELEASED: i32 = 1;
const VALUE_RELEASED: i32 = 2;

/// A cached value plus the atomics that defer its release.
///
/// The node itself counts as one implicit borrower; its value is released
/// only after [`Node::release`] has been called *and* every minted handle
/// has been released, whichever happens last.
#[derive(Debug)]
pub struct Node<T: Release> {
    value: T,

    // First decrement to reach -1 runs value.release().
    handles: AtomicI32,

    // 0 not released, 1 node released, 2 value released.
    released: AtomicI32,
}

impl<T: Release> Node<T> {
    /// Wraps `value` in an open node with no outstanding handles.
    pub fn new(value: T) -> Self {
        Self {
            value,
            handles: AtomicI32::new(0),
            released: AtomicI32::new(OPEN),
        }
    }

    /// Releases the node's own claim on the value. Idempotent.
    pub fn release(&self) {
        if self
            .released
            .compare_exchange(OPEN, NODE_RELEASED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.dec();
        }
    }

    /// Mints a borrow of the node's value, `Arc`-style:
    /// `Node::handle(&node)`.
    ///
    /// Returns `None` when the node has already been released.
    pub fn handle(node: &Arc<Self>) -> Option<Handle<T>> {
        node.try_retain().then(|| Handle {
            node: Arc::clone(node),
            released: AtomicBool::new(false),
        })
    }

    /// Mints a borrow that is released exactly once, on drop.
    ///
    /// Returns `None` when the node has already been released.
    pub fn once_handle(node: &Arc<Self>) -> Option<OnceHandle<T>> {
        node.try_retain().then(|| OnceHandle {
            node: Arc::clone(node),
        })
    }

    /// Returns the outstanding handle count. Intended for metrics; -1
    /// means fully released.
    pub fn handles(&self) -> i32 {
        self.handles.load(Ordering::SeqCst)
    }

    /// Returns the wrapped value.
    pub fn value(&self) -> &T {
        &self.value
    }

    fn try_retain(&self) -> bool {
        loop {
            let old = self.handles.load(Ordering::SeqCst);
            if old < 0 {
                return false; // node fully released
            }
            if old >= i32::MAX - 2 {
                std::hint::spin_loop(); // at max handles, wait for a release
                continue;
            }
            if self
                .handles
                .compare_exchange(old, old + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }

    fn dec(&self) {
        let post = self.handles.fetch_sub(1, Ordering::SeqCst) - 1;
        if post < 0
            && self
                .released
                .compare_exchange(
                    NODE_RELEASED,
                    VALUE_RELEASED,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
        {
            self.value.release();
        }
    }
}

/// Borrow token over a [`Node`] with idempotent release.
///
/// Dropping an unreleased handle releases it, so a handle can neither leak
/// its claim nor double-decrement.
#[derive(Debug)]
pub struct Handle<T: Release> {
    node: Arc<Node<T>>,
    released: AtomicBool,
}

impl<T: Release> Handle<T> {
    /// Returns the borrowed value.
    pub fn value(&self) -> &T {
        self.node.value()
    }

    /// Releases the borrow. Safe to call any number of times.
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.node.dec();
        }
    }
}

impl<T: Release> Drop for Handle<T> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Borrow token released exactly once, when dropped.
///
/// Skips [`Handle`]'s released flag; ownership makes a second release
/// unrepresentable.
#[derive(Debug)]
pub struct OnceHandle<T: Release> {
    node: Arc<Node<T>>,
}

impl<T: Release> OnceHandle<T> {
    /// Returns the borrowed value.
    pub fn value(&self) -> &T {
        self.node.value()
    }

    /// Releases the borrow by consuming the handle.
    pub fn release(self) {
        drop(self);
    }
}

impl<T: Release> Drop for OnceHandle<T> {
    fn drop(&mut self) {
        self.node.dec();
    }
}

type StoredNode<V> = Arc<Node<V>>;
type NodeMapBox<K, V> = Box<dyn ConcurrentMap<K, Arc<CacheValue<StoredNode<V>>>>>;

/// Builder for [`CountingCache`] instances.
pub struct CountingCacheBuilder<K, V: Release> {
    capacity: i64,
    expiration: Duration,
    on_evict: Option<Box<CountingEvictFn<K, V>>>,
    evict_skip: bool,
    map: Option<NodeMapBox<K, V>>,
    policy: Option<Box<dyn Policy<K> + Send + Sync>>,
}

impl<K, V> CountingCacheBuilder<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Release + Send + Sync + 'static,
{
    /// Creates a builder with the same defaults as
    /// [`CacheBuilder`](crate::cache::CacheBuilder).
    pub fn new() -> Self {
        Self {
            capacity: 0,
            expiration: Duration::ZERO,
            on_evict: None,
            evict_skip: false,
            map: None,
            policy: None,
        }
    }

    /// Sets the capacity; non-positive values coerce to the default of 100.
    pub fn capacity(mut self, capacity: i64) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the entry expiration. Zero (the default) means forever.
    pub fn expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }

    /// Sets the eviction callback. The callback receives the deferred node
    /// release and decides when it fires; without a callback, eviction
    /// releases the node immediately.
    pub fn on_evict(
        mut self,
        on_evict: impl Fn(&K, &V, DeferredRelease) + Send + Sync + 'static,
    ) -> Self {
        self.on_evict = Some(Box::new(on_evict));
        self
    }

    /// When `true`, eviction passes over nodes with outstanding handles.
    pub fn evict_skip(mut self, evict_skip: bool) -> Self {
        self.evict_skip = evict_skip;
        self
    }

    /// Replaces the map backend.
    pub fn map(
        mut self,
        map: impl ConcurrentMap<K, Arc<CacheValue<StoredNode<V>>>> + 'static,
    ) -> Self {
        self.map = Some(Box::new(map));
        self
    }

    /// Replaces the eviction policy.
    pub fn policy(mut self, policy: impl Policy<K> + Send + Sync + 'static) -> Self {
        self.policy = Some(Box::new(policy));
        self
    }

    /// Builds the cache.
    pub fn build(self) -> CountingCache<K, V> {
        let mut builder = CacheBuilder::new()
            .capacity(self.capacity)
            .expiration(self.expiration);

        builder = match self.on_evict {
            Some(user) => builder.on_evict(move |key: &K, node: &StoredNode<V>| {
                let deferred = Arc::clone(node);
                user(key, node.value(), Box::new(move || deferred.release()));
            }),
            None => builder.on_evict(|_key: &K, node: &StoredNode<V>| node.release()),
        };

        if self.evict_skip {
            builder = builder.evict_skip(|_key: &K, node: &StoredNode<V>| node.handles() > 0);
        }
        if let Some(map) = self.map {
            builder = builder.map(map);
        }
        if let Some(policy) = self.policy {
            builder = builder.policy(policy);
        }

        CountingCache {
            inner: builder.build(),
        }
    }
}

impl<K, V> Default for CountingCacheBuilder<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Release + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Cache whose values are released only after eviction *and* the release
/// of every handle minted for them.
///
/// Useful when a value fronts a reusable resource (a pooled buffer, a file
/// slot) and the owner must know that all readers are done before
/// reclaiming it. See the [module docs](self) for the lifecycle.
pub struct CountingCache<K, V: Release> {
    inner: Cache<K, StoredNode<V>>,
}

impl<K, V> CountingCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Release + Send + Sync + 'static,
{
    /// Creates a counting cache with default options.
    pub fn new() -> Self {
        CountingCacheBuilder::new().build()
    }

    /// Returns a handle for `key` without promoting it.
    ///
    /// Retries when it observes a value whose node a concurrent evictor
    /// already released, until it finds a live node or a miss.
    pub fn peek(&self, key: &K) -> Option<Handle<V>> {
        loop {
            let node = self.inner.peek(key)?;
            if let Some(handle) = Node::handle(&node) {
                return Some(handle);
            }
            // already released, read again
        }
    }

    /// [`peek`](Self::peek) minting a [`OnceHandle`].
    pub fn once_peek(&self, key: &K) -> Option<OnceHandle<V>> {
        loop {
            let node = self.inner.peek(key)?;
            if let Some(handle) = Node::once_handle(&node) {
                return Some(handle);
            }
            // already released, read again
        }
    }

    /// Returns a handle for `key`, promoting it on a hit.
    pub fn get(&self, key: &K) -> Option<Handle<V>> {
        let handle = self.peek(key)?;
        self.inner.promote(key);
        Some(handle)
    }

    /// [`get`](Self::get) minting a [`OnceHandle`].
    pub fn once_get(&self, key: &K) -> Option<OnceHandle<V>> {
        let handle = self.once_peek(key)?;
        self.inner.promote(key);
        Some(handle)
    }

    /// Re-ranks `key` toward the hot end of the policy (best effort).
    pub fn promote(&self, key: &K) {
        self.inner.promote(key);
    }

    /// Inserts `key → value` with size 1 and returns the caller's handle.
    pub fn set(&self, key: K, value: V) -> Handle<V> {
        self.set_sized(key, value, 1)
    }

    /// Inserts `key → value` accounting `size` units, returning the
    /// caller's handle. Replaced values are evicted (and eventually
    /// released). A minimum size of 1 is applied.
    pub fn set_sized(&self, key: K, value: V, size: u32) -> Handle<V> {
        let node = Arc::new(Node::new(value));
        let handle = Node::handle(&node).expect("freshly created node cannot be released");
        self.inner.set_sized(key, node, size);
        handle
    }

    /// [`set`](Self::set) returning a [`OnceHandle`].
    pub fn once_set(&self, key: K, value: V) -> OnceHandle<V> {
        self.once_set_sized(key, value, 1)
    }

    /// [`set_sized`](Self::set_sized) returning a [`OnceHandle`].
    pub fn once_set_sized(&self, key: K, value: V, size: u32) -> OnceHandle<V> {
        let node = Arc::new(Node::new(value));
        let handle = Node::once_handle(&node).expect("freshly created node cannot be released");
        self.inner.set_sized(key, node, size);
        handle
    }

    /// Runs an eviction pass; returns `true` when no space could be
    /// reclaimed.
    pub fn evict(&self) -> bool {
        self.inner.evict()
    }

    /// Iterates live entries hottest to coldest, yielding a fresh handle
    /// per entry and silently skipping already-released nodes. Holds the
    /// policy read lock while alive.
    pub fn iter(&self) -> impl Iterator<Item = (K, Handle<V>)> + '_ {
        self.inner
            .iter()
            .filter_map(|(key, node)| Node::handle(&node).map(|handle| (key, handle)))
    }

    /// Returns the number of live entries.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns the summed size of live entries.
    pub fn size(&self) -> i64 {
        self.inner.size()
    }

    /// Evicts everything and resets the policy. Capacity is unchanged.
    pub fn clear(&self) {
        self.inner.clear();
    }

    /// Sums outstanding handles across live entries. Intended for metrics.
    pub fn handles(&self) -> i64 {
        let mut count = 0i64;
        for (_key, node) in self.inner.iter() {
            let handles = node.handles();
            if handles > 0 {
                count += i64::from(handles);
            }
        }
        count
    }

    /// Returns the current capacity.
    pub fn capacity(&self) -> i64 {
        self.inner.capacity()
    }

    /// Sets the capacity (clamped to at least 1) and returns the old value.
    pub fn set_capacity(&self, new: i64) -> i64 {
        self.inner.set_capacity(new)
    }

    /// Compare-and-swaps the capacity; returns whether the swap happened.
    pub fn swap_capacity(&self, old: i64, new: i64) -> bool {
        self.inner.swap_capacity(old, new)
    }

    /// Sets capacity to `size + available`, clamped to `[1, max]`.
    pub fn set_available_capacity(&self, available: i64, max: i64) {
        self.inner.set_available_capacity(available, max);
    }
}

impl<K, V> Default for CountingCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Release + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V: Release> std::fmt::Debug for CountingCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CountingCache")
            .field("inner", &self.inner)
            .finish()
    }
}
