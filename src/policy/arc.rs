//! Adaptive Replacement Cache (ARC) eviction policy.
//!
//! Balances recency and frequency by keeping two live lists and two ghost
//! lists, and tuning a fractional target for the recency list online from
//! ghost-list hits.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          ArcPolicy<K> Layout                            │
//! │                                                                         │
//! │   Live keys (values held by the cache, not the policy)                  │
//! │   ┌──────────────────────────┐    ┌──────────────────────────┐          │
//! │   │ t1: seen once recently   │    │ t2: seen more than once  │          │
//! │   │ MRU ──────────► LRU      │    │ MRU ──────────► LRU      │          │
//! │   └──────────────────────────┘    └──────────────────────────┘          │
//! │              │ evict                          │ evict                   │
//! │              ▼                                ▼                         │
//! │   ┌──────────────────────────┐    ┌──────────────────────────┐          │
//! │   │ b1: ghosts of t1         │    │ b2: ghosts of t2         │          │
//! │   │ (keys only)              │    │ (keys only)              │          │
//! │   └──────────────────────────┘    └──────────────────────────┘          │
//! │              │ hit on add                     │ hit on add              │
//! │              ▼                                ▼                         │
//! │   t1_target_fraction += Δ          t1_target_fraction -= Δ              │
//! │   (favor recency)                  (favor frequency)                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//!
//! Add Flow
//! ────────
//!
//!   add(k):
//!     live (t1 ∪ t2)          → false, untouched
//!     ghost hit (b2, then b1) → adapt fraction, move k to t2 head
//!     pure miss               → trim ghost tails, push k to t1 head
//!
//! Evict Flow
//! ──────────
//!
//!   evict():
//!     if |t1| > 0 and (|t1| > target(t1) or |t2| = 0):
//!       pop t1 tail → push b1 head
//!     else:
//!       pop t2 tail → push b2 head
//! ```
//!
//! ## Key Components
//!
//! - [`ArcPolicy`]: the policy itself, four [`KeyedList`]s plus the target
//!   fraction.
//! - [`ArcParams`]: point-in-time parameter readout for observability.
//!
//! Unlike capacity-owning ARC formulations, this policy never counts bytes
//! or entries against a limit: the cache decides *when* to evict, the policy
//! only decides *what*. The target is therefore a fraction of `|t1|+|t2|`
//! rather than an absolute length.
//!
//! ## Algorithm Properties
//!
//! - **Adaptive**: ghost hits steer the recency/frequency balance with no
//!   manual tuning.
//! - **Scan resistant**: one-time scans drain through `t1` without touching
//!   the frequent set.
//! - **O(1)**: all operations except iteration.
//!
//! ## Thread Safety
//!
//! Not thread-safe. The cache wraps the policy in its policy lock;
//! [`values`](Policy::values) takes `&self` so it can run under a shared
//! read lock.
//!
//! ## References
//!
//! - Megiddo & Modha, "ARC: A Self-Tuning, Low Overhead Replacement Cache",
//!   FAST 2003.

use std::hash::Hash;

use crate::ds::KeyedList;
use crate::ds::keyed_list;
#[cfg(any(test, debug_assertions))]
use crate::error::InvariantError;
use crate::policy::Policy;

/// Point-in-time readout of ARC's internal parameters.
///
/// # Example
///
/// ```
/// use arckit::policy::{ArcParams, ArcPolicy, Policy};
///
/// let mut policy = ArcPolicy::new();
/// policy.add(1);
/// policy.add(2);
///
/// let params = policy.arc_params();
/// assert_eq!(params.t1_len, 2);
/// assert_eq!(params.t1_target_fraction, 0.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ArcParams {
    /// Number of live keys seen once recently.
    pub t1_len: usize,
    /// Number of live keys seen more than once.
    pub t2_len: usize,
    /// Number of ghost keys evicted from `t1`.
    pub b1_len: usize,
    /// Number of ghost keys evicted from `t2`.
    pub b2_len: usize,
    /// Target share of `t1` within the live set, in `[0, 1]`.
    pub t1_target_fraction: f64,
}

/// Adaptive Replacement Cache policy over keys of type `K`.
///
/// Tracks the live set in `t1` (recent-once) and `t2` (frequent), and the
/// identities of recently evicted keys in the ghost lists `b1`/`b2`. A ghost
/// hit on [`add`](Policy::add) re-admits the key directly into `t2` and
/// shifts `t1_target_fraction` toward the side that would have kept it.
///
/// # Example
///
/// ```
/// use arckit::policy::{ArcPolicy, Policy};
///
/// let mut policy = ArcPolicy::new();
/// assert!(policy.add("page1"));
/// assert!(policy.add("page2"));
/// assert!(!policy.add("page1")); // already live
///
/// // A promote moves the key from the recency to the frequency list.
/// assert!(policy.promote(&"page1"));
///
/// // Eviction prefers the recency list's tail.
/// assert_eq!(policy.evict(), Some("page2"));
/// ```
pub struct ArcPolicy<K> {
    t1: KeyedList<K>,
    t2: KeyedList<K>,
    b1: KeyedList<K>,
    b2: KeyedList<K>,

    /// Target share of t1 within t1+t2, in [0, 1].
    t1_target_fraction: f64,
}

impl<K> ArcPolicy<K>
where
    K: Eq + Hash + Clone,
{
    /// Creates an empty policy with a zero target fraction.
    pub fn new() -> Self {
        Self {
            t1: KeyedList::new(),
            t2: KeyedList::new(),
            b1: KeyedList::new(),
            b2: KeyedList::new(),
            t1_target_fraction: 0.0,
        }
    }

    /// Returns the current parameter readout.
    pub fn arc_params(&self) -> ArcParams {
        ArcParams {
            t1_len: self.t1.len(),
            t2_len: self.t2.len(),
            b1_len: self.b1.len(),
            b2_len: self.b2.len(),
            t1_target_fraction: self.t1_target_fraction,
        }
    }

    // b1 must not be empty.
    fn b1_hit(&mut self) {
        let (b1, b2) = (self.b1.len(), self.b2.len());
        let delta = if b2 > b1 { b2 as f64 / b1 as f64 } else { 1.0 };
        self.adjust_target_fraction(delta);
    }

    // b2 must not be empty.
    fn b2_hit(&mut self) {
        let (b1, b2) = (self.b1.len(), self.b2.len());
        let delta = if b1 > b2 { b1 as f64 / b2 as f64 } else { 1.0 };
        self.adjust_target_fraction(-delta);
    }

    // delta must not be zero.
    fn adjust_target_fraction(&mut self, delta: f64) {
        // t1_target_len = fraction * t_len, so shifting the target by delta
        // entries shifts the fraction by delta / t_len. With an empty live
        // set the quotient is infinite and the clamp saturates to the bound;
        // delta is never zero, so the quotient is never NaN.
        let t_len = self.t_len() as f64;
        let v = self.t1_target_fraction + delta / t_len;
        self.t1_target_fraction = v.clamp(0.0, 1.0);
    }

    fn t1_target_len(&self) -> usize {
        let t = self.t1_target_fraction * self.t_len() as f64;
        t.round_ties_even() as usize
    }

    fn t_len(&self) -> usize {
        self.t1.len() + self.t2.len()
    }

    /// Validates internal invariants, returning a description of the first
    /// violation found.
    #[cfg(any(test, debug_assertions))]
    pub fn check_invariants(&self) -> Result<(), InvariantError>
    where
        K: std::fmt::Debug,
    {
        use rustc_hash::FxHashMap;

        let lists = [
            (&self.t1, "t1"),
            (&self.t2, "t2"),
            (&self.b1, "b1"),
            (&self.b2, "b2"),
        ];

        let mut seen: FxHashMap<&K, &str> = FxHashMap::default();
        for (list, name) in lists {
            list.debug_validate_invariants();
            for key in list.iter() {
                if let Some(other) = seen.insert(key, name) {
                    return Err(InvariantError::new(format!(
                        "key {key:?} present in both {other} and {name}"
                    )));
                }
            }
        }

        if !(0.0..=1.0).contains(&self.t1_target_fraction) {
            return Err(InvariantError::new(format!(
                "t1_target_fraction {} out of [0, 1]",
                self.t1_target_fraction
            )));
        }
        Ok(())
    }
}

impl<K> Default for ArcPolicy<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> std::fmt::Debug for ArcPolicy<K>
where
    K: Eq + Hash + Clone,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArcPolicy")
            .field("t1_len", &self.t1.len())
            .field("t2_len", &self.t2.len())
            .field("b1_len", &self.b1.len())
            .field("b2_len", &self.b2.len())
            .field("t1_target_fraction", &self.t1_target_fraction)
            .finish()
    }
}

impl<K> Policy<K> for ArcPolicy<K>
where
    K: Eq + Hash + Clone,
{
    fn clear(&mut self) {
        self.t1.clear();
        self.t2.clear();
        self.b1.clear();
        self.b2.clear();
        self.t1_target_fraction = 0.0;
    }

    fn promote(&mut self, key: &K) -> bool {
        // t2 first, frequent by definition so more likely.
        if self.t2.move_to_front(key) {
            return true;
        }
        if self.t1.remove(key) {
            self.t2.push_front(key.clone());
            return true;
        }
        false
    }

    fn add(&mut self, key: K) -> bool {
        // t2/b2 first, frequent by definition so more likely.
        if self.t2.contains(&key) || self.t1.contains(&key) {
            return false;
        }

        // Ghost hits re-admit straight into t2 and adapt the target.
        if self.b2.contains(&key) {
            self.b2_hit();
            self.b2.remove(&key);
            self.t2.push_front(key);
            return true;
        }
        if self.b1.contains(&key) {
            self.b1_hit();
            self.b1.remove(&key);
            self.t2.push_front(key);
            return true;
        }

        // Pure miss: b+t only grows between evictions, so trim the ghost
        // tails here. t1 slides within t1+b1, so b1 shrinks as t1 grows.
        let target = self.t1_target_len();
        while self.b1.len() > self.t_len().saturating_sub(target) && !self.b1.is_empty() {
            self.b1.remove_tail();
        }
        while self.b2.len() > target && !self.b2.is_empty() {
            self.b2.remove_tail();
        }

        self.t1.push_front(key);
        true
    }

    fn evict_skip(&mut self, skip: &mut dyn FnMut(&K) -> bool) -> Option<K> {
        let target = self.t1_target_len();
        if !self.t1.is_empty() && (self.t1.len() > target || self.t2.is_empty()) {
            if let Some(victim) = demote_first_unskipped(&mut self.t1, &mut self.b1, skip) {
                return Some(victim);
            }
        }
        demote_first_unskipped(&mut self.t2, &mut self.b2, skip)
    }

    fn values(&self) -> Box<dyn Iterator<Item = &K> + '_> {
        // Ping-pong between the recent and frequent heads, draining whichever
        // list runs longer.
        Box::new(ValuesIter {
            t1: self.t1.iter(),
            t2: self.t2.iter(),
            take_t1: true,
            t1_done: false,
            t2_done: false,
        })
    }
}

/// Scans `live` from its tail, demotes the first non-skipped key onto
/// `ghost`'s head, and returns it.
fn demote_first_unskipped<K>(
    live: &mut KeyedList<K>,
    ghost: &mut KeyedList<K>,
    skip: &mut dyn FnMut(&K) -> bool,
) -> Option<K>
where
    K: Eq + Hash + Clone,
{
    let victim = live.iter_rev().find(|&key| !skip(key)).cloned()?;
    live.remove(&victim);
    ghost.push_front(victim.clone());
    Some(victim)
}

struct ValuesIter<'a, K> {
    t1: keyed_list::Iter<'a, K>,
    t2: keyed_list::Iter<'a, K>,
    take_t1: bool,
    t1_done: bool,
    t2_done: bool,
}

impl<'a, K> Iterator for ValuesIter<'a, K> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.t1_done && self.t2_done {
                return None;
            }
            if self.take_t1 {
                self.take_t1 = false;
                if !self.t1_done {
                    match self.t1.next() {
                        Some(key) => return Some(key),
                        None => self.t1_done = true,
                    }
                }
            } else {
                self.take_t1 = true;
                if !self.t2_done {
                    match self.t2.next() {
                        Some(key) => return Some(key),
                        None => self.t2_done = true,
                    }
                }
            }
        }
    }
}
