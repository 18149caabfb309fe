//! Cache eviction policies.
//!
//! A policy owns eviction *ordering* only: it tracks keys, never values or
//! sizes. The cache layer couples a policy to a concurrent map and drives it
//! under a single lock.

pub mod arc;

pub use arc::{ArcParams, ArcPolicy};

/// Eviction-ordering policy over a set of live keys.
///
/// Policies are not concurrency-safe; the owning cache serializes access
/// through its policy lock. Methods taking `&self` ([`values`](Policy::values))
/// are safe under a shared (read) lock.
pub trait Policy<K> {
    /// Empties the policy and resets any adaptive state.
    fn clear(&mut self);

    /// Records an access to `key`, re-ranking it toward the hot end.
    ///
    /// Returns `false` (a silent no-op) when the key is not live.
    fn promote(&mut self, key: &K) -> bool;

    /// Admits `key` into the live set.
    ///
    /// Returns `false` without mutating state when the key is already live.
    fn add(&mut self, key: K) -> bool;

    /// Selects a victim, demotes it to ghost tracking, and returns it.
    ///
    /// Returns `None` when the live set is empty.
    fn evict(&mut self) -> Option<K> {
        self.evict_skip(&mut |_| false)
    }

    /// Like [`evict`](Policy::evict), but passes over keys for which `skip`
    /// returns `true`. Returns `None` when every candidate was skipped.
    fn evict_skip(&mut self, skip: &mut dyn FnMut(&K) -> bool) -> Option<K>;

    /// Iterates live keys hottest to coldest.
    fn values(&self) -> Box<dyn Iterator<Item = &K> + '_>;
}

impl<K, P> Policy<K> for Box<P>
where
    P: Policy<K> + ?Sized,
{
    fn clear(&mut self) {
        (**self).clear()
    }

    fn promote(&mut self, key: &K) -> bool {
        (**self).promote(key)
    }

    fn add(&mut self, key: K) -> bool {
        (**self).add(key)
    }

    fn evict(&mut self) -> Option<K> {
        (**self).evict()
    }

    fn evict_skip(&mut self, skip: &mut dyn FnMut(&K) -> bool) -> Option<K> {
        (**self).evict_skip(skip)
    }

    fn values(&self) -> Box<dyn Iterator<Item = &K> + '_> {
        (**self).values()
    }
}
