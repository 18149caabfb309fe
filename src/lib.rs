//! arckit: adaptive replacement caching primitives.
//!
//! Three layers: an ARC eviction policy over keyed recency lists, a
//! concurrent size-bounded cache coupling that policy to a pluggable
//! concurrent map, and a counting layer that defers value release until
//! every borrower is done.
//!
//! See `DESIGN.md` for internal architecture and invariants.

pub mod ds;
pub mod maps;
pub mod policy;

pub mod cache;
pub mod counting;

pub mod error;
pub mod prelude;
