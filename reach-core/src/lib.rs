// reach-core/src/lib.rs
// ============================================================================
// Crate: reach-core
// Description: Pack Lifecycle Core — manifest validation, dependency
//              resolution, capability sandboxing, and failure containment.
// ============================================================================

//! ## Overview
//! `reach-core` is the self-contained, backend-agnostic half of Reach's
//! pack lifecycle. It depends on nothing beyond `serde`, `serde_json`,
//! `serde_jcs`, `sha2`, and `thiserror` — no async runtime, no storage
//! engine — so it can be embedded by any host (CLI, web API, batch runner)
//! without pulling in that host's own execution model.
//!
//! Modules are listed in dependency order: each only depends on modules
//! above it in this list.

pub mod hashing;
pub mod identifiers;
pub mod time;
pub mod semver;
pub mod manifest;
pub mod depgraph;
pub mod loader;
pub mod lockfile;
pub mod sandbox;
pub mod injector;
pub mod containment;
pub mod cancel;
pub mod compat;

pub use cancel::CancellationToken;
pub use compat::BootstrapResult;
pub use compat::CompatConfig;
pub use compat::CompatError;
pub use compat::Environment;
pub use compat::bootstrap;
pub use containment::Containment;
pub use containment::ContainmentPolicy;
pub use containment::HealthStatus;
pub use containment::PackHealth;
pub use depgraph::DependencyError;
pub use depgraph::resolve_order;
pub use hashing::HashAlgorithm;
pub use hashing::HashDigest;
pub use hashing::HashError;
pub use hashing::hash_canonical;
pub use identifiers::DagNodeId;
pub use identifiers::ExportKey;
pub use identifiers::HookName;
pub use identifiers::PackId;
pub use identifiers::PermissionScope;
pub use identifiers::ToolName;
pub use injector::Injector;
pub use injector::InjectorError;
pub use injector::PackCapability;
pub use loader::LoadedPack;
pub use loader::LoaderError;
pub use loader::load_all;
pub use lockfile::LockEntry;
pub use lockfile::LockMismatch;
pub use lockfile::Lockfile;
pub use lockfile::LockfileError;
pub use manifest::ManifestError;
pub use manifest::PackManifest;
pub use manifest::ValidationResult;
pub use manifest::validate;
pub use sandbox::AuditEntry;
pub use sandbox::PackNamespace;
pub use sandbox::Sandbox;
pub use sandbox::SandboxError;
pub use semver::SemverError;
pub use semver::Version;
pub use semver::VersionConstraint;
pub use time::Timestamp;
