// reach-core/src/sandbox.rs
// ============================================================================
// Module: Capability Sandbox
// Description: Per-pack namespaces, tool/permission enforcement, cross-pack
//              export reads, append-only audit log.
// Purpose: Isolate packs from each other without OS-level sandboxing.
// Dependencies: serde_json, thiserror
// ============================================================================

//! ## Overview
//! Each registered pack owns exactly one [`PackNamespace`]: a writable state
//! map, a writable exports map, and a `sealed` flag. Sealing is one-way and
//! forbids inserting *new* keys into either map, but updates to existing
//! keys remain allowed — this is what lets a pack do a two-phase
//! initialization (populate, seal, then keep refreshing values).
//!
//! Every access decision — tool check, permission check, export read — is
//! recorded in an append-only audit log, capped to a fixed size so a
//! long-running process cannot grow it without bound. An optional callback
//! sink receives each entry as it is appended, for streaming to external
//! storage.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::RwLock;

use thiserror::Error;

use crate::identifiers::ExportKey;
use crate::identifiers::PackId;
use crate::identifiers::PermissionScope;
use crate::identifiers::ToolName;

/// Default cap on the number of retained audit log entries.
pub const DEFAULT_AUDIT_LOG_CAPACITY: usize = 10_000;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by sandbox namespace and enforcement operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SandboxError {
    /// No pack is registered under the given id.
    #[error("pack not registered: {0}")]
    NotFound(PackId),
    /// Insertion of a new key was attempted after the namespace was sealed.
    #[error("namespace for {pack_id} is sealed; cannot insert new key {key}")]
    NamespaceSealed {
        /// The sealed pack's id.
        pack_id: PackId,
        /// The key whose insertion was rejected.
        key: String,
    },
    /// A tool invocation, permission check, or export read was denied.
    #[error("access denied for {pack_id}: {reason}")]
    Denied {
        /// The pack whose access was denied.
        pack_id: PackId,
        /// Human-readable denial reason.
        reason: String,
    },
}

// ============================================================================
// SECTION: Namespace
// ============================================================================

/// A single pack's isolated key-value state and exports.
#[derive(Debug, Clone, Default)]
pub struct PackNamespace {
    /// Owner-writable key/value state.
    state: BTreeMap<String, serde_json::Value>,
    /// Owner-writable, sandbox-readable export values.
    exports: BTreeMap<String, serde_json::Value>,
    /// Once true, new keys may no longer be inserted into either map.
    sealed: bool,
}

impl PackNamespace {
    /// Returns true once this namespace has been sealed.
    #[must_use]
    pub const fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Reads a state value, if present.
    #[must_use]
    pub fn get_state(&self, key: &str) -> Option<&serde_json::Value> {
        self.state.get(key)
    }

    /// Reads an export value, if present.
    #[must_use]
    pub fn get_export(&self, key: &str) -> Option<&serde_json::Value> {
        self.exports.get(key)
    }

    /// Inserts into `map`, rejecting a new key once `sealed` is true.
    fn insert(
        map: &mut BTreeMap<String, serde_json::Value>,
        sealed: bool,
        pack_id: &PackId,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), SandboxError> {
        if sealed && !map.contains_key(key) {
            return Err(SandboxError::NamespaceSealed {
                pack_id: pack_id.clone(),
                key: key.to_string(),
            });
        }
        map.insert(key.to_string(), value);
        Ok(())
    }
}

/// Declared capabilities a pack registered with, used to enforce access.
#[derive(Debug, Clone)]
struct Registration {
    /// Tools this pack is allowed to invoke.
    declared_tools: BTreeSet<ToolName>,
    /// Permission scopes this pack holds.
    declared_permissions: BTreeSet<PermissionScope>,
    /// Export keys this pack's manifest declares.
    exports: BTreeSet<ExportKey>,
    /// This pack's owned namespace.
    namespace: PackNamespace,
}

// ============================================================================
// SECTION: Audit log
// ============================================================================

/// One recorded access decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    /// Pack the decision was made on behalf of.
    pub pack_id: PackId,
    /// Action attempted (e.g. `"check_tool_access"`, `"read_export"`).
    pub action: String,
    /// Target pack, for cross-pack operations like export reads.
    pub target: Option<PackId>,
    /// Whether the action was allowed.
    pub allowed: bool,
    /// Human-readable reason, present mainly for denials.
    pub reason: Option<String>,
}

type AuditSink = Arc<dyn Fn(&AuditEntry) + Send + Sync>;

// ============================================================================
// SECTION: Sandbox
// ============================================================================

struct SandboxState {
    /// Every currently registered pack, keyed by id.
    registrations: BTreeMap<PackId, Registration>,
    /// Append-only, capacity-bounded decision history.
    audit_log: VecDeque<AuditEntry>,
}

/// Capability sandbox holding every registered pack's namespace and audit
/// history behind a single reader/writer lock.
pub struct Sandbox {
    /// Registrations and audit history, behind one lock.
    state: RwLock<SandboxState>,
    /// Maximum number of retained audit log entries.
    audit_capacity: usize,
    /// Optional callback notified with every newly appended audit entry.
    sink: Option<AuditSink>,
}

impl Sandbox {
    /// Creates an empty sandbox with the given audit log capacity.
    #[must_use]
    pub fn new(audit_capacity: usize) -> Self {
        Self {
            state: RwLock::new(SandboxState {
                registrations: BTreeMap::new(),
                audit_log: VecDeque::new(),
            }),
            audit_capacity,
            sink: None,
        }
    }

    /// Attaches a streaming sink invoked with every newly appended audit entry.
    #[must_use]
    pub fn with_sink(mut self, sink: AuditSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Registers a pack's declared capabilities and creates its namespace.
    ///
    /// Re-registering an id replaces its prior registration and namespace.
    pub fn register(
        &self,
        pack_id: PackId,
        declared_tools: BTreeSet<ToolName>,
        declared_permissions: BTreeSet<PermissionScope>,
        exports: BTreeSet<ExportKey>,
    ) {
        let mut state = self.state.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.registrations.insert(
            pack_id,
            Registration {
                declared_tools,
                declared_permissions,
                exports,
                namespace: PackNamespace::default(),
            },
        );
    }

    /// Removes a pack's registration and drops its namespace.
    pub fn unregister(&self, pack_id: &PackId) {
        let mut state = self.state.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.registrations.remove(pack_id);
    }

    /// Seals a pack's namespace, after which new keys may no longer be
    /// inserted into its state or exports maps.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::NotFound`] if `pack_id` is not registered.
    pub fn seal(&self, pack_id: &PackId) -> Result<(), SandboxError> {
        let mut state = self.state.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let registration = state
            .registrations
            .get_mut(pack_id)
            .ok_or_else(|| SandboxError::NotFound(pack_id.clone()))?;
        registration.namespace.sealed = true;
        Ok(())
    }

    /// Writes a state key for `pack_id`'s own namespace.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::NotFound`] if unregistered, or
    /// [`SandboxError::NamespaceSealed`] inserting a new key after sealing.
    pub fn set_state(
        &self,
        pack_id: &PackId,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), SandboxError> {
        let mut state = self.state.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let registration = state
            .registrations
            .get_mut(pack_id)
            .ok_or_else(|| SandboxError::NotFound(pack_id.clone()))?;
        let sealed = registration.namespace.sealed;
        PackNamespace::insert(&mut registration.namespace.state, sealed, pack_id, key, value)
    }

    /// Writes an export key for `pack_id`'s own namespace.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::NotFound`] if unregistered, or
    /// [`SandboxError::NamespaceSealed`] inserting a new key after sealing.
    pub fn set_export(
        &self,
        pack_id: &PackId,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), SandboxError> {
        let mut state = self.state.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let registration = state
            .registrations
            .get_mut(pack_id)
            .ok_or_else(|| SandboxError::NotFound(pack_id.clone()))?;
        let sealed = registration.namespace.sealed;
        PackNamespace::insert(&mut registration.namespace.exports, sealed, pack_id, key, value)
    }

    /// Appends an entry to the audit log, evicting the oldest entry once the
    /// configured capacity is exceeded, and notifying the sink if attached.
    fn append_audit(&self, state: &mut SandboxState, entry: AuditEntry) {
        if let Some(sink) = &self.sink {
            sink(&entry);
        }
        state.audit_log.push_back(entry);
        while state.audit_log.len() > self.audit_capacity {
            state.audit_log.pop_front();
        }
    }

    /// Returns a snapshot of the current audit log, oldest entry first.
    #[must_use]
    pub fn audit_log(&self) -> Vec<AuditEntry> {
        let state = self.state.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.audit_log.iter().cloned().collect()
    }

    /// Checks whether `pack_id` may invoke `tool`, recording the decision.
    #[must_use]
    pub fn check_tool_access(&self, pack_id: &PackId, tool: &ToolName) -> bool {
        let mut state = self.state.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let allowed = state
            .registrations
            .get(pack_id)
            .is_some_and(|registration| registration.declared_tools.contains(tool));
        let reason = if allowed { None } else { Some("tool not declared".to_string()) };
        self.append_audit(
            &mut state,
            AuditEntry {
                pack_id: pack_id.clone(),
                action: "check_tool_access".to_string(),
                target: None,
                allowed,
                reason,
            },
        );
        allowed
    }

    /// Checks whether `pack_id` holds `permission`, recording the decision.
    #[must_use]
    pub fn check_permission(&self, pack_id: &PackId, permission: &PermissionScope) -> bool {
        let mut state = self.state.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let allowed = state
            .registrations
            .get(pack_id)
            .is_some_and(|registration| registration.declared_permissions.contains(permission));
        let reason = if allowed { None } else { Some("permission not declared".to_string()) };
        self.append_audit(
            &mut state,
            AuditEntry {
                pack_id: pack_id.clone(),
                action: "check_permission".to_string(),
                target: None,
                allowed,
                reason,
            },
        );
        allowed
    }

    /// Reads an export published by `target_id`, on behalf of `reader_id`.
    ///
    /// Denied unless `target_id`'s manifest lists `key` among its exports
    /// *and* its namespace currently holds a value for it.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Denied`] if the target is unregistered, does
    /// not declare the export, or has no value stored for it.
    pub fn read_export(
        &self,
        reader_id: &PackId,
        target_id: &PackId,
        key: &ExportKey,
    ) -> Result<serde_json::Value, SandboxError> {
        let mut state = self.state.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let outcome = state.registrations.get(target_id).and_then(|registration| {
            if registration.exports.contains(key) {
                registration.namespace.get_export(key.as_str()).cloned()
            } else {
                None
            }
        });
        let allowed = outcome.is_some();
        let reason = if allowed { None } else { Some("export not declared or not set".to_string()) };
        self.append_audit(
            &mut state,
            AuditEntry {
                pack_id: reader_id.clone(),
                action: "read_export".to_string(),
                target: Some(target_id.clone()),
                allowed,
                reason: reason.clone(),
            },
        );
        outcome.ok_or_else(|| SandboxError::Denied {
            pack_id: reader_id.clone(),
            reason: reason.unwrap_or_default(),
        })
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
    use super::*;

    #[test]
    fn sealing_blocks_new_keys_but_allows_updates() {
        let sandbox = Sandbox::new(DEFAULT_AUDIT_LOG_CAPACITY);
        let pack_id = PackId::new("pack-a");
        sandbox.register(pack_id.clone(), BTreeSet::new(), BTreeSet::new(), BTreeSet::new());
        sandbox.set_state(&pack_id, "k", serde_json::json!(1)).unwrap();
        sandbox.seal(&pack_id).unwrap();
        assert!(sandbox.set_state(&pack_id, "k", serde_json::json!(2)).is_ok());
        assert!(matches!(
            sandbox.set_state(&pack_id, "new_key", serde_json::json!(3)),
            Err(SandboxError::NamespaceSealed { .. })
        ));
    }

    #[test]
    fn tool_access_denied_records_audit_entry() {
        let sandbox = Sandbox::new(DEFAULT_AUDIT_LOG_CAPACITY);
        let pack_id = PackId::new("pack-a");
        let mut tools = BTreeSet::new();
        tools.insert(ToolName::new("read_file"));
        sandbox.register(pack_id.clone(), tools, BTreeSet::new(), BTreeSet::new());

        let allowed = sandbox.check_tool_access(&pack_id, &ToolName::new("exec_command"));
        assert!(!allowed);

        let log = sandbox.audit_log();
        assert_eq!(log.len(), 1);
        assert!(!log[0].allowed);
        assert_eq!(log[0].reason.as_deref(), Some("tool not declared"));
    }

    #[test]
    fn export_read_requires_declaration_and_value() {
        let sandbox = Sandbox::new(DEFAULT_AUDIT_LOG_CAPACITY);
        let reader = PackId::new("reader");
        let target = PackId::new("target");
        let mut exports = BTreeSet::new();
        exports.insert(ExportKey::new("summary"));
        sandbox.register(target.clone(), BTreeSet::new(), BTreeSet::new(), exports);
        sandbox.register(reader.clone(), BTreeSet::new(), BTreeSet::new(), BTreeSet::new());

        assert!(sandbox.read_export(&reader, &target, &ExportKey::new("summary")).is_err());

        sandbox.set_export(&target, "summary", serde_json::json!("ok")).unwrap();
        let value = sandbox.read_export(&reader, &target, &ExportKey::new("summary")).unwrap();
        assert_eq!(value, serde_json::json!("ok"));
    }

    #[test]
    fn audit_log_is_capped() {
        let sandbox = Sandbox::new(2);
        let pack_id = PackId::new("pack-a");
        sandbox.register(pack_id.clone(), BTreeSet::new(), BTreeSet::new(), BTreeSet::new());
        for _ in 0..5 {
            sandbox.check_tool_access(&pack_id, &ToolName::new("anything"));
        }
        assert_eq!(sandbox.audit_log().len(), 2);
    }
}
