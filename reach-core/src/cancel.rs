// reach-core/src/cancel.rs
// ============================================================================
// Module: Cancellation
// Description: Cooperative cancellation token checked at suspension points.
// Purpose: Let a caller abort pack discovery, run indexing, or hook
//          invocation between steps without tearing down the call stack.
// Dependencies: none (std only)
// ============================================================================

//! ## Overview
//! Reach has no async executor in `reach-core`; long-running operations are
//! synchronous functions that poll a [`CancellationToken`] at well-defined
//! suspension points (pack discovery between packs, hook invocation between
//! hooks, lineage indexing between runs) and return
//! [`crate::compat::CompatError::Cancelled`] as soon as cancellation is
//! observed.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

/// A cooperative, cloneable cancellation flag.
///
/// Cloning shares the same underlying flag; setting it from any clone is
/// visible to all others.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a fresh, not-yet-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks this token (and all of its clones) as cancelled.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true if [`Self::cancel`] has been called on this token or a
    /// clone of it.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
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
    use super::CancellationToken;

    #[test]
    fn starts_uncancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn cancel_is_visible_through_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
