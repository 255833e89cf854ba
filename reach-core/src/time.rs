// reach-core/src/time.rs
// ============================================================================
// Module: Timestamps
// Description: Wall-clock timestamp newtype shared across pack lifecycle types.
// Purpose: Give manifests, lockfiles, baselines, and reports a single,
//          serializable notion of "when".
// Dependencies: serde
// ============================================================================

//! ## Overview
//! `Timestamp` wraps a Unix epoch millisecond count. Construction from "now"
//! is deliberately kept out of library code paths that need to be
//! deterministic (hashing, lockfile generation) — callers supply the instant
//! explicitly so the same inputs always produce the same output.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// A point in time expressed as milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Constructs a timestamp from a Unix epoch millisecond count.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as Unix epoch milliseconds.
    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// Returns the number of whole milliseconds elapsed from `self` to `other`.
    ///
    /// Negative when `other` precedes `self`.
    #[must_use]
    pub const fn millis_until(self, other: Self) -> i64 {
        other.0 - self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]
mod tests {
    use super::Timestamp;

    #[test]
    fn orders_by_millis() {
        let a = Timestamp::from_millis(100);
        let b = Timestamp::from_millis(200);
        assert!(a < b);
        assert_eq!(a.millis_until(b), 100);
    }

    #[test]
    fn round_trips_millis() {
        let t = Timestamp::from_millis(1_700_000_000_000);
        assert_eq!(t.as_millis(), 1_700_000_000_000);
    }
}
