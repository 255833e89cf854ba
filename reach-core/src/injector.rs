// reach-core/src/injector.rs
// ============================================================================
// Module: Runtime Injector
// Description: Publish pack capabilities into a tool -> providers map; run
//              named lifecycle hooks; gate execution through the sandbox.
// Purpose: The single sanctioned path through which a pack's tools run.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! The injector is a publish/subscribe table for two things: tool
//! providers, and lifecycle hooks. Multiple packs may provide the same
//! tool; lookups return every provider in the order they were injected, and
//! it is the caller's responsibility to pick one. Hooks fire in registration
//! order regardless of whether an earlier hook in the same run failed —
//! failures are collected, not propagated eagerly, so one misbehaving pack's
//! hook cannot suppress another's.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::RwLock;

use thiserror::Error;

use crate::identifiers::HookName;
use crate::identifiers::PackId;
use crate::identifiers::PermissionScope;
use crate::identifiers::ToolName;
use crate::sandbox::Sandbox;
use crate::sandbox::SandboxError;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by the runtime injector.
#[derive(Debug, Error)]
pub enum InjectorError {
    /// `execute_with_pack` was denied by the sandbox.
    #[error(transparent)]
    Denied(#[from] SandboxError),
}

/// The outcome of firing every hook registered at a lifecycle point.
#[derive(Debug, Default)]
pub struct HookFireResult {
    /// Hooks that ran without error, in firing order.
    pub succeeded: Vec<PackId>,
    /// Hooks that returned an error, paired with their message, in firing order.
    pub errors: Vec<(PackId, String)>,
}

// ============================================================================
// SECTION: Capability
// ============================================================================

/// A pack's published tool and permission set.
#[derive(Debug, Clone)]
pub struct PackCapability {
    /// Owning pack.
    pub pack_id: PackId,
    /// Tools this pack publishes as a provider for.
    pub tools: BTreeSet<ToolName>,
    /// Permissions this pack holds.
    pub permissions: BTreeSet<PermissionScope>,
}

/// A registered lifecycle hook.
type Hook = Arc<dyn Fn() -> Result<(), String> + Send + Sync>;

// ============================================================================
// SECTION: Injector
// ============================================================================

struct InjectorState {
    /// tool -> providing pack ids, in injection order.
    providers: BTreeMap<ToolName, Vec<PackId>>,
    /// Published capability records keyed by pack id.
    capabilities: BTreeMap<PackId, PackCapability>,
    /// hook name -> (pack id, hook), in registration order.
    hooks: BTreeMap<HookName, Vec<(PackId, Hook)>>,
}

/// Publishes pack capabilities and lifecycle hooks behind a single
/// reader/writer lock.
pub struct Injector {
    /// Providers, capabilities, and hooks, behind one lock.
    state: RwLock<InjectorState>,
}

impl Default for Injector {
    fn default() -> Self {
        Self::new()
    }
}

impl Injector {
    /// Creates an empty injector.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(InjectorState {
                providers: BTreeMap::new(),
                capabilities: BTreeMap::new(),
                hooks: BTreeMap::new(),
            }),
        }
    }

    /// Publishes `pack_id`'s tools and permissions.
    ///
    /// Injecting a pack that already publishes a tool appends it to that
    /// tool's provider list again only if it is not already present.
    pub fn inject(&self, pack_id: PackId, tools: BTreeSet<ToolName>, permissions: BTreeSet<PermissionScope>) {
        let mut state = self.state.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        for tool in &tools {
            let providers = state.providers.entry(tool.clone()).or_default();
            if !providers.contains(&pack_id) {
                providers.push(pack_id.clone());
            }
        }
        state.capabilities.insert(pack_id.clone(), PackCapability { pack_id, tools, permissions });
    }

    /// Registers a hook at the given lifecycle point, appended after any
    /// hooks already registered there.
    pub fn register_hook(
        &self,
        hook_name: HookName,
        pack_id: PackId,
        hook: impl Fn() -> Result<(), String> + Send + Sync + 'static,
    ) {
        let mut state = self.state.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.hooks.entry(hook_name).or_default().push((pack_id, Arc::new(hook)));
    }

    /// Returns the providers currently published for `tool`, in injection order.
    #[must_use]
    pub fn providers_for(&self, tool: &ToolName) -> Vec<PackId> {
        let state = self.state.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.providers.get(tool).cloned().unwrap_or_default()
    }

    /// Returns the published capability record for `pack_id`, if injected.
    #[must_use]
    pub fn capability_for(&self, pack_id: &PackId) -> Option<PackCapability> {
        let state = self.state.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.capabilities.get(pack_id).cloned()
    }

    /// Fires every hook registered at `hook_name`, in registration order.
    ///
    /// A failing hook does not prevent later hooks at the same point from
    /// running; every failure is collected into the returned result.
    pub fn fire_hooks(&self, hook_name: &HookName) -> HookFireResult {
        let hooks = {
            let state = self.state.read().unwrap_or_else(std::sync::PoisonError::into_inner);
            state.hooks.get(hook_name).cloned().unwrap_or_default()
        };
        let mut result = HookFireResult::default();
        for (pack_id, hook) in hooks {
            match hook() {
                Ok(()) => result.succeeded.push(pack_id),
                Err(message) => result.errors.push((pack_id, message)),
            }
        }
        result
    }

    /// The only sanctioned execution entry point: checks tool access via the
    /// sandbox, then runs `f` on success.
    ///
    /// # Errors
    ///
    /// Returns [`InjectorError::Denied`] if the sandbox denies `tool` to
    /// `pack_id`.
    pub fn execute_with_pack<F, R>(
        &self,
        sandbox: &Sandbox,
        pack_id: &PackId,
        tool: &ToolName,
        f: F,
    ) -> Result<R, InjectorError>
    where
        F: FnOnce() -> R,
    {
        if sandbox.check_tool_access(pack_id, tool) {
            Ok(f())
        } else {
            Err(InjectorError::Denied(SandboxError::Denied {
                pack_id: pack_id.clone(),
                reason: "tool not declared".to_string(),
            }))
        }
    }

    /// Removes `pack_id`'s capabilities and hooks in a single atomic step.
    pub fn eject(&self, pack_id: &PackId) {
        let mut state = self.state.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.capabilities.remove(pack_id);
        for providers in state.providers.values_mut() {
            providers.retain(|id| id != pack_id);
        }
        state.providers.retain(|_, providers| !providers.is_empty());
        for hooks in state.hooks.values_mut() {
            hooks.retain(|(id, _)| id != pack_id);
        }
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
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    #[test]
    fn multiple_providers_are_returned_in_injection_order() {
        let injector = Injector::new();
        let mut tools = BTreeSet::new();
        tools.insert(ToolName::new("read_file"));
        injector.inject(PackId::new("pack-a"), tools.clone(), BTreeSet::new());
        injector.inject(PackId::new("pack-b"), tools, BTreeSet::new());

        let providers = injector.providers_for(&ToolName::new("read_file"));
        assert_eq!(providers, vec![PackId::new("pack-a"), PackId::new("pack-b")]);
    }

    #[test]
    fn hooks_fire_in_registration_order_and_collect_errors() {
        let injector = Injector::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let order_a = Arc::clone(&order);
        injector.register_hook(HookName::new("before_execute"), PackId::new("pack-a"), move || {
            order_a.lock().unwrap().push("a");
            Err("boom".to_string())
        });
        let order_b = Arc::clone(&order);
        injector.register_hook(HookName::new("before_execute"), PackId::new("pack-b"), move || {
            order_b.lock().unwrap().push("b");
            Ok(())
        });

        let result = injector.fire_hooks(&HookName::new("before_execute"));
        assert_eq!(*order.lock().unwrap(), vec!["a", "b"]);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.succeeded.len(), 1);
    }

    #[test]
    fn eject_removes_capabilities_and_hooks_together() {
        let injector = Injector::new();
        let pack_id = PackId::new("pack-a");
        let mut tools = BTreeSet::new();
        tools.insert(ToolName::new("read_file"));
        injector.inject(pack_id.clone(), tools, BTreeSet::new());

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        injector.register_hook(HookName::new("on_load"), pack_id.clone(), move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        injector.eject(&pack_id);

        assert!(injector.providers_for(&ToolName::new("read_file")).is_empty());
        let result = injector.fire_hooks(&HookName::new("on_load"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(result.succeeded.is_empty() && result.errors.is_empty());
    }

    #[test]
    fn execute_with_pack_denies_undeclared_tools() {
        let sandbox = Sandbox::new(100);
        let injector = Injector::new();
        let pack_id = PackId::new("pack-a");
        sandbox.register(pack_id.clone(), BTreeSet::new(), BTreeSet::new(), BTreeSet::new());

        let result = injector.execute_with_pack(&sandbox, &pack_id, &ToolName::new("exec_command"), || 1);
        assert!(result.is_err());
    }
}
