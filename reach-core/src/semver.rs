// reach-core/src/semver.rs
// ============================================================================
// Module: Version Resolver
// Description: Semver parsing, comparison, constraints, and resolution.
// Purpose: Deterministically pick the highest version satisfying a constraint.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! Dependency constraints are resolved by always picking the *highest*
//! satisfying version from the candidate set. This is the determinism
//! guarantee for dependency resolution: the same candidate set and the same
//! constraint always yield the same chosen version, regardless of input
//! ordering or implementation.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::cmp::Ordering;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while parsing or resolving semantic versions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SemverError {
    /// The version string did not match `X.Y.Z[-prerelease]`.
    #[error("invalid semver string: {0}")]
    InvalidVersion(String),
    /// The constraint string was not recognized.
    #[error("invalid version constraint: {0}")]
    InvalidConstraint(String),
    /// No candidate version satisfied the constraint.
    #[error("no version of {pack_id} satisfies constraint {constraint}")]
    Unsatisfiable {
        /// Pack identifier the constraint was evaluated for.
        pack_id: String,
        /// The constraint's original string form.
        constraint: String,
    },
}

// ============================================================================
// SECTION: Version
// ============================================================================

/// Parsed semantic version (`major.minor.patch[-prerelease]`).
///
/// # Invariants
/// - A version with a non-empty `prerelease` orders *below* the same
///   `major.minor.patch` release without a prerelease tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    /// Major version component.
    pub major: u64,
    /// Minor version component.
    pub minor: u64,
    /// Patch version component.
    pub patch: u64,
    /// Optional prerelease tag (e.g. `rc.1`).
    pub prerelease: Option<String>,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.prerelease {
            write!(f, "-{pre}")?;
        }
        Ok(())
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        compare(self, other)
    }
}

/// Parses a semver string into a [`Version`].
///
/// # Errors
///
/// Returns [`SemverError::InvalidVersion`] when the string is not
/// `major.minor.patch[-prerelease]` with numeric components.
pub fn parse(input: &str) -> Result<Version, SemverError> {
    let (core, prerelease) = match input.split_once('-') {
        Some((core, pre)) => (core, Some(pre.to_string())),
        None => (input, None),
    };
    let mut parts = core.split('.');
    let (Some(major), Some(minor), Some(patch), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(SemverError::InvalidVersion(input.to_string()));
    };
    let parse_component = |value: &str| -> Result<u64, SemverError> {
        if value.is_empty() || (value.len() > 1 && value.starts_with('0')) {
            return Err(SemverError::InvalidVersion(input.to_string()));
        }
        value.parse::<u64>().map_err(|_| SemverError::InvalidVersion(input.to_string()))
    };
    if let Some(pre) = &prerelease
        && pre.is_empty()
    {
        return Err(SemverError::InvalidVersion(input.to_string()));
    }
    Ok(Version {
        major: parse_component(major)?,
        minor: parse_component(minor)?,
        patch: parse_component(patch)?,
        prerelease,
    })
}

/// Compares two versions: `-1` if `a < b`, `0` if equal, `1` if `a > b`.
///
/// A prerelease version is ordered below its corresponding release version.
#[must_use]
pub fn compare(a: &Version, b: &Version) -> Ordering {
    (a.major, a.minor, a.patch)
        .cmp(&(b.major, b.minor, b.patch))
        .then_with(|| match (&a.prerelease, &b.prerelease) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(x), Some(y)) => x.cmp(y),
        })
}

// ============================================================================
// SECTION: Constraints
// ============================================================================

/// A version constraint parsed from a dependency declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConstraint {
    /// Inclusive minimum version, if any.
    pub min: Option<Version>,
    /// Exclusive maximum version, if any (used by `^` constraints).
    pub max_exclusive: Option<Version>,
    /// Exact version required, if the constraint is a bare version string.
    pub exact: Option<Version>,
}

impl VersionConstraint {
    /// Returns true when `version` satisfies this constraint.
    #[must_use]
    pub fn satisfies(&self, version: &Version) -> bool {
        if let Some(exact) = &self.exact {
            return version == exact;
        }
        if let Some(min) = &self.min
            && version < min
        {
            return false;
        }
        if let Some(max_exclusive) = &self.max_exclusive
            && version >= max_exclusive
        {
            return false;
        }
        true
    }
}

/// Parses a dependency version constraint string.
///
/// Supported forms:
/// - `X.Y.Z` — exact version match.
/// - `^X.Y.Z` — `min = X.Y.Z`, `max_exclusive = (X+1).0.0`.
/// - `>=X.Y.Z` — `min = X.Y.Z` only.
///
/// # Errors
///
/// Returns [`SemverError::InvalidConstraint`] for unrecognized forms and
/// propagates [`SemverError::InvalidVersion`] from the embedded version.
pub fn parse_constraint(input: &str) -> Result<VersionConstraint, SemverError> {
    let trimmed = input.trim();
    if let Some(rest) = trimmed.strip_prefix("^") {
        let min = parse(rest)?;
        let max_exclusive = Version { major: min.major + 1, minor: 0, patch: 0, prerelease: None };
        return Ok(VersionConstraint { min: Some(min), max_exclusive: Some(max_exclusive), exact: None });
    }
    if let Some(rest) = trimmed.strip_prefix(">=") {
        let min = parse(rest)?;
        return Ok(VersionConstraint { min: Some(min), max_exclusive: None, exact: None });
    }
    if trimmed.starts_with(['^', '>', '<', '~']) {
        return Err(SemverError::InvalidConstraint(input.to_string()));
    }
    let exact = parse(trimmed)?;
    Ok(VersionConstraint { min: Some(exact.clone()), max_exclusive: None, exact: Some(exact) })
}

// ============================================================================
// SECTION: Resolution
// ============================================================================

/// Resolves the highest version in `candidates` that satisfies `constraint`.
///
/// Picking the highest satisfying version (rather than e.g. the first match)
/// is what makes resolution deterministic regardless of candidate ordering.
///
/// # Errors
///
/// Returns [`SemverError::Unsatisfiable`] when no candidate matches.
pub fn resolve<'a>(
    pack_id: &str,
    constraint: &VersionConstraint,
    candidates: impl IntoIterator<Item = &'a Version>,
) -> Result<Version, SemverError> {
    candidates
        .into_iter()
        .filter(|candidate| constraint.satisfies(candidate))
        .max()
        .cloned()
        .ok_or_else(|| SemverError::Unsatisfiable {
            pack_id: pack_id.to_string(),
            constraint: format!("{constraint:?}"),
        })
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
    use super::*;

    #[test]
    fn parses_basic_version() {
        let v = parse("1.2.3").unwrap();
        assert_eq!(v, Version { major: 1, minor: 2, patch: 3, prerelease: None });
    }

    #[test]
    fn parses_prerelease() {
        let v = parse("1.2.3-rc.1").unwrap();
        assert_eq!(v.prerelease.as_deref(), Some("rc.1"));
    }

    #[test]
    fn rejects_malformed_versions() {
        assert!(parse("1.2").is_err());
        assert!(parse("1.2.3.4").is_err());
        assert!(parse("a.b.c").is_err());
        assert!(parse("01.2.3").is_err());
    }

    #[test]
    fn prerelease_orders_below_release() {
        let release = parse("1.0.0").unwrap();
        let pre = parse("1.0.0-rc.1").unwrap();
        assert!(pre < release);
    }

    #[test]
    fn caret_constraint_bounds_to_next_major() {
        let constraint = parse_constraint("^1.2.0").unwrap();
        assert!(constraint.satisfies(&parse("1.2.0").unwrap()));
        assert!(constraint.satisfies(&parse("1.9.9").unwrap()));
        assert!(!constraint.satisfies(&parse("2.0.0").unwrap()));
        assert!(!constraint.satisfies(&parse("1.1.9").unwrap()));
    }

    #[test]
    fn gte_constraint_has_no_upper_bound() {
        let constraint = parse_constraint(">=1.0.0").unwrap();
        assert!(constraint.satisfies(&parse("99.0.0").unwrap()));
        assert!(!constraint.satisfies(&parse("0.9.0").unwrap()));
    }

    #[test]
    fn exact_constraint_matches_only_itself() {
        let constraint = parse_constraint("1.2.3").unwrap();
        assert!(constraint.satisfies(&parse("1.2.3").unwrap()));
        assert!(!constraint.satisfies(&parse("1.2.4").unwrap()));
    }

    #[test]
    fn resolve_picks_highest_satisfying_version_regardless_of_order() {
        let candidates = [parse("1.0.0").unwrap(), parse("1.5.0").unwrap(), parse("2.0.0").unwrap()];
        let constraint = parse_constraint("^1.0.0").unwrap();
        let resolved = resolve("pack-a", &constraint, &candidates).unwrap();
        assert_eq!(resolved, parse("1.5.0").unwrap());

        let reversed: Vec<Version> = candidates.iter().rev().cloned().collect();
        let resolved_reversed = resolve("pack-a", &constraint, &reversed).unwrap();
        assert_eq!(resolved_reversed, resolved);
    }

    #[test]
    fn resolve_fails_when_unsatisfiable() {
        let candidates = [parse("0.9.0").unwrap()];
        let constraint = parse_constraint(">=1.0.0").unwrap();
        assert!(resolve("pack-a", &constraint, &candidates).is_err());
    }
}
