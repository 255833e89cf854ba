// reach-historical/src/db.rs
// ============================================================================
// Module: Database helpers
// Description: Shared SQLite connection setup: WAL mode, busy timeout,
//              synchronous pragma.
// Purpose: Give every historical manager the same concurrency posture
//          without repeating pragma boilerplate.
// Dependencies: rusqlite
// ============================================================================

//! ## Overview
//! Every historical manager opens its own SQLite file but configures it
//! identically: WAL journaling so readers never block writers, a
//! five-second busy timeout so transient lock contention does not surface
//! as an error, and `synchronous = NORMAL` (safe under WAL, faster than
//! `FULL`).

use std::path::Path;

use rusqlite::Connection;
use thiserror::Error;

/// Busy timeout applied to every opened connection, in milliseconds.
pub const BUSY_TIMEOUT_MS: u32 = 5_000;

/// Errors raised while opening or configuring a historical store's database.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying SQLite operation failed.
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    /// The requested record does not exist.
    #[error("record not found: {0}")]
    NotFound(String),
}

/// Opens `path`, applying the shared WAL/busy-timeout/synchronous posture.
///
/// # Errors
///
/// Returns [`StoreError::Sqlite`] if the connection cannot be opened or a
/// pragma fails to apply.
pub fn open_with_pragmas(path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.busy_timeout(std::time::Duration::from_millis(u64::from(BUSY_TIMEOUT_MS)))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(conn)
}

/// Applies a default limit when the caller passes zero or a negative value.
///
/// Every `search_*`/`list_*` query in this crate accepts a limit; this
/// function is how each one enforces "no implicit unbounded query".
#[must_use]
pub fn effective_limit(requested: i64, default: usize) -> usize {
    if requested <= 0 { default } else { usize::try_from(requested).unwrap_or(default) }
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
    use super::effective_limit;

    #[test]
    fn non_positive_limit_falls_back_to_default() {
        assert_eq!(effective_limit(0, 50), 50);
        assert_eq!(effective_limit(-5, 50), 50);
    }

    #[test]
    fn positive_limit_is_used_as_is() {
        assert_eq!(effective_limit(7, 50), 7);
    }
}
