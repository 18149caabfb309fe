//! Error types for the arckit library.
//!
//! Runtime operations never return errors: absent keys are `None`, invalid
//! configuration values are coerced, and genuine internal inconsistencies
//! panic (they indicate a bug, never an expected runtime condition). The one
//! typed error lives in the debug-only validation layer.
//!
//! ## Key Components
//!
//! - [`InvariantError`]: Returned by debug/test-only `check_invariants`
//!   methods when an internal data-structure invariant does not hold.

use std::fmt;

/// Error returned when an internal cache invariant is violated.
///
/// Produced by debug-only `check_invariants` methods (e.g.
/// [`ArcPolicy::check_invariants`](crate::policy::arc::ArcPolicy::check_invariants)).
/// Carries a human-readable description of which invariant failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantError(String);

impl InvariantError {
    /// Creates a new `InvariantError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InvariantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for InvariantError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_shows_message() {
        let err = InvariantError::new("t1/t2 overlap");
        assert_eq!(err.to_string(), "t1/t2 overlap");
    }

    #[test]
    fn debug_includes_message() {
        let err = InvariantError::new("dangling index entry");
        assert!(format!("{:?}", err).contains("dangling index entry"));
    }

    #[test]
    fn message_accessor() {
        let err = InvariantError::new("test");
        assert_eq!(err.message(), "test");
    }

    #[test]
    fn implements_std_error() {
        fn assert_error<T: std::error::Error>() {}
        assert_error::<InvariantError>();
    }
}
