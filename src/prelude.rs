pub use crate::cache::{Cache, CacheBuilder, CacheValue};
pub use crate::counting::{
    CountingCache, CountingCacheBuilder, DeferredRelease, Handle, Node, OnceHandle, Release,
};
pub use crate::ds::{KeyedList, SlotArena, SlotId};
pub use crate::maps::{BucketedMap, ConcurrentMap, LockedMap, StripedMap};
pub use crate::policy::{ArcParams, ArcPolicy, Policy};
