// reach-core/src/identifiers.rs
// ============================================================================
// Module: Pack Lifecycle Identifiers
// Description: Canonical opaque identifiers for packs, tools, and permissions.
// Purpose: Provide strongly typed, serializable IDs with stable string forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! This module defines the string-based identifiers used throughout the pack
//! lifecycle. Identifiers are opaque wrappers; format validation (the pack id
//! regex, the tool-name regex, etc.) is performed at manifest validation time,
//! not within these simple newtypes.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Macro
// ============================================================================

/// Declares a transparent string-backed identifier newtype with the standard
/// constructor/accessor/conversion impls used across this crate.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

string_id!(
    /// Pack identifier (`[a-z][a-z0-9._-]{2,127}`, enforced at manifest
    /// validation time).
    PackId
);

string_id!(
    /// Declared tool name a pack may invoke through the sandbox.
    ToolName
);

string_id!(
    /// Permission scope string (`scope:action`).
    PermissionScope
);

string_id!(
    /// DAG node identifier within a pack's execution graph.
    DagNodeId
);

string_id!(
    /// Named export key a pack publishes into its namespace.
    ExportKey
);

string_id!(
    /// Named lifecycle hook point (`before_execute`, `after_execute`,
    /// `on_error`, `on_load`, `on_unload`).
    HookName
);

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
    use super::PackId;

    #[test]
    fn round_trips_through_display_and_as_str() {
        let id = PackId::new("com.example.pack");
        assert_eq!(id.as_str(), "com.example.pack");
        assert_eq!(id.to_string(), "com.example.pack");
    }

    #[test]
    fn ordering_is_lexicographic() {
        let a = PackId::from("alpha");
        let b = PackId::from("beta");
        assert!(a < b);
    }
}
