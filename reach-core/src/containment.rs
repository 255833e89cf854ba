// reach-core/src/containment.rs
// ============================================================================
// Module: Failure Containment
// Description: Per-pack health state machine with sliding-window failure
//              counting, auto-disable, and time-based auto-recovery.
// Purpose: Stop one misbehaving pack from being retried forever, and bring
//          it back automatically once its disable window has elapsed.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! Every pack has a [`PackHealth`] record: a status, a failure count, and a
//! sliding window of recent failure timestamps. Each call to
//! [`Containment::record_failure`] prunes timestamps older than the policy's
//! window before counting, so the failure count always reflects only recent
//! history. Crossing half the threshold degrades a pack; crossing the full
//! threshold disables it and fires the `on_disable` callback exactly once.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::RwLock;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::identifiers::PackId;
use crate::time::Timestamp;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by the failure containment system.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContainmentError {
    /// No health record exists for the given pack.
    #[error("pack not registered with containment: {0}")]
    NotFound(PackId),
}

// ============================================================================
// SECTION: Policy
// ============================================================================

/// Containment policy, independent of any one pack's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainmentPolicy {
    /// Failures within `failure_window` that trigger auto-disable.
    pub max_failures: usize,
    /// Width of the sliding failure window, in milliseconds.
    pub failure_window_ms: i64,
    /// Whether time-based auto-recovery is enabled.
    pub auto_recover: bool,
    /// How long a pack must stay disabled before auto-recovery applies.
    pub recover_after_ms: i64,
}

impl Default for ContainmentPolicy {
    fn default() -> Self {
        Self {
            max_failures: 5,
            failure_window_ms: 5 * 60 * 1000,
            auto_recover: true,
            recover_after_ms: 10 * 60 * 1000,
        }
    }
}

// ============================================================================
// SECTION: Health
// ============================================================================

/// A pack's current containment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Operating normally.
    Active,
    /// Recent failures exceed half the threshold; still callable.
    Degraded,
    /// Failures reached the threshold; calls should be refused upstream.
    Disabled,
    /// A structural, unrecoverable failure, set via [`Containment::mark_failed`].
    /// Unlike `Disabled`, never cleared by [`Containment::check_auto_recover`].
    Failed,
}

/// Per-pack health record.
#[derive(Debug, Clone)]
pub struct PackHealth {
    /// Current status.
    pub status: HealthStatus,
    /// Number of failures currently inside the sliding window.
    pub failure_count: usize,
    /// Timestamp and message of the most recent failure, if any.
    pub last_error: Option<(Timestamp, String)>,
    /// When this pack was disabled, if it currently is.
    pub disabled_at: Option<Timestamp>,
    /// Why this pack was disabled, if it currently is.
    pub disabled_reason: Option<String>,
    /// Timestamps of failures still inside the sliding window.
    window: Vec<Timestamp>,
}

impl PackHealth {
    /// Creates an active, empty-history health record.
    fn new() -> Self {
        Self {
            status: HealthStatus::Active,
            failure_count: 0,
            last_error: None,
            disabled_at: None,
            disabled_reason: None,
            window: Vec::new(),
        }
    }
}

type DisableCallback = Arc<dyn Fn(&PackId, &str) + Send + Sync>;

// ============================================================================
// SECTION: Containment
// ============================================================================

struct ContainmentState {
    /// Health records keyed by pack id.
    health: BTreeMap<PackId, PackHealth>,
}

/// Tracks failure history and health status for every registered pack.
pub struct Containment {
    /// Every registered pack's health record, behind one lock.
    state: RwLock<ContainmentState>,
    /// Policy applied uniformly to every registered pack.
    policy: ContainmentPolicy,
    /// Optional callback fired when a pack transitions to disabled.
    on_disable: Option<DisableCallback>,
}

impl Containment {
    /// Creates a containment tracker under the given policy.
    #[must_use]
    pub fn new(policy: ContainmentPolicy) -> Self {
        Self { state: RwLock::new(ContainmentState { health: BTreeMap::new() }), policy, on_disable: None }
    }

    /// Attaches a callback invoked whenever a pack transitions to disabled.
    ///
    /// The callback is invoked out of band (after the containment lock is
    /// released) so it cannot reenter and deadlock on this tracker.
    #[must_use]
    pub fn with_on_disable(mut self, callback: DisableCallback) -> Self {
        self.on_disable = Some(callback);
        self
    }

    /// Registers a pack as active with a clean history, if not already known.
    pub fn register(&self, pack_id: PackId) {
        let mut state = self.state.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.health.entry(pack_id).or_insert_with(PackHealth::new);
    }

    /// Returns a copy of `pack_id`'s current health record.
    #[must_use]
    pub fn health(&self, pack_id: &PackId) -> Option<PackHealth> {
        let state = self.state.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.health.get(pack_id).cloned()
    }

    /// Records a failure at `now`, pruning the sliding window and updating
    /// status. Returns the resulting health record.
    ///
    /// # Errors
    ///
    /// Returns [`ContainmentError::NotFound`] if `pack_id` was never
    /// registered.
    pub fn record_failure(
        &self,
        pack_id: &PackId,
        now: Timestamp,
        message: &str,
    ) -> Result<PackHealth, ContainmentError> {
        let mut just_disabled = false;
        let snapshot = {
            let mut state = self.state.write().unwrap_or_else(std::sync::PoisonError::into_inner);
            let health = state
                .health
                .get_mut(pack_id)
                .ok_or_else(|| ContainmentError::NotFound(pack_id.clone()))?;

            health.window.retain(|ts| ts.millis_until(now) <= self.policy.failure_window_ms);
            health.window.push(now);
            health.failure_count = health.window.len();
            health.last_error = Some((now, message.to_string()));

            if health.failure_count >= self.policy.max_failures {
                if !matches!(health.status, HealthStatus::Disabled) {
                    just_disabled = true;
                }
                health.status = HealthStatus::Disabled;
                health.disabled_at = Some(now);
                health.disabled_reason = Some(format!("{} failures within window", health.failure_count));
            } else if health.failure_count * 2 >= self.policy.max_failures {
                health.status = HealthStatus::Degraded;
            }
            health.clone()
        };

        if just_disabled
            && let Some(callback) = &self.on_disable
        {
            callback(pack_id, snapshot.disabled_reason.as_deref().unwrap_or_default());
        }

        Ok(snapshot)
    }

    /// Records a success, clearing degraded status back to active.
    ///
    /// Has no effect on a pack that is currently disabled; disabled packs
    /// only return to active via [`Self::enable`] or
    /// [`Self::check_auto_recover`].
    ///
    /// # Errors
    ///
    /// Returns [`ContainmentError::NotFound`] if `pack_id` was never
    /// registered.
    pub fn record_success(&self, pack_id: &PackId) -> Result<PackHealth, ContainmentError> {
        let mut state = self.state.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let health = state
            .health
            .get_mut(pack_id)
            .ok_or_else(|| ContainmentError::NotFound(pack_id.clone()))?;
        if matches!(health.status, HealthStatus::Degraded) {
            health.status = HealthStatus::Active;
            health.window.clear();
            health.failure_count = 0;
        }
        Ok(health.clone())
    }

    /// Forcibly moves a pack to active with a cleared history.
    ///
    /// # Errors
    ///
    /// Returns [`ContainmentError::NotFound`] if `pack_id` was never
    /// registered.
    pub fn enable(&self, pack_id: &PackId) -> Result<(), ContainmentError> {
        let mut state = self.state.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let health = state
            .health
            .get_mut(pack_id)
            .ok_or_else(|| ContainmentError::NotFound(pack_id.clone()))?;
        health.status = HealthStatus::Active;
        health.window.clear();
        health.failure_count = 0;
        health.disabled_at = None;
        health.disabled_reason = None;
        Ok(())
    }

    /// Forcibly disables a pack, firing `on_disable` if this is a new
    /// transition.
    ///
    /// # Errors
    ///
    /// Returns [`ContainmentError::NotFound`] if `pack_id` was never
    /// registered.
    pub fn disable(&self, pack_id: &PackId, now: Timestamp, reason: &str) -> Result<(), ContainmentError> {
        let was_disabled = {
            let mut state = self.state.write().unwrap_or_else(std::sync::PoisonError::into_inner);
            let health = state
                .health
                .get_mut(pack_id)
                .ok_or_else(|| ContainmentError::NotFound(pack_id.clone()))?;
            let was_disabled = matches!(health.status, HealthStatus::Disabled);
            health.status = HealthStatus::Disabled;
            health.disabled_at = Some(now);
            health.disabled_reason = Some(reason.to_string());
            was_disabled
        };
        if !was_disabled
            && let Some(callback) = &self.on_disable
        {
            callback(pack_id, reason);
        }
        Ok(())
    }

    /// Marks a pack as structurally, unrecoverably failed.
    ///
    /// Unlike [`Self::disable`], a failed pack is never returned by
    /// [`Self::check_auto_recover`] — only [`Self::enable`] brings it back.
    /// The `on_disable` callback is not fired for this transition; it is
    /// reserved for threshold-based disablement.
    ///
    /// # Errors
    ///
    /// Returns [`ContainmentError::NotFound`] if `pack_id` was never
    /// registered.
    pub fn mark_failed(&self, pack_id: &PackId, now: Timestamp, reason: &str) -> Result<(), ContainmentError> {
        let mut state = self.state.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let health = state
            .health
            .get_mut(pack_id)
            .ok_or_else(|| ContainmentError::NotFound(pack_id.clone()))?;
        health.status = HealthStatus::Failed;
        health.disabled_at = Some(now);
        health.disabled_reason = Some(reason.to_string());
        Ok(())
    }

    /// Returns the ids of every pack that has been disabled longer than the
    /// policy's recovery interval, and moves each of them to active with a
    /// cleared history.
    ///
    /// Returns an empty list if auto-recovery is disabled by policy.
    pub fn check_auto_recover(&self, now: Timestamp) -> Vec<PackId> {
        if !self.policy.auto_recover {
            return Vec::new();
        }
        let mut state = self.state.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut recovered = Vec::new();
        for (pack_id, health) in &mut state.health {
            if let (HealthStatus::Disabled, Some(disabled_at)) = (health.status, health.disabled_at)
                && disabled_at.millis_until(now) >= self.policy.recover_after_ms
            {
                health.status = HealthStatus::Active;
                health.window.clear();
                health.failure_count = 0;
                health.disabled_at = None;
                health.disabled_reason = None;
                recovered.push(pack_id.clone());
            }
        }
        recovered
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
    use std::sync::Mutex;

    fn policy() -> ContainmentPolicy {
        ContainmentPolicy { max_failures: 4, failure_window_ms: 60_000, auto_recover: true, recover_after_ms: 100_000 }
    }

    #[test]
    fn degrades_at_half_threshold() {
        let containment = Containment::new(policy());
        let pack_id = PackId::new("pack-a");
        containment.register(pack_id.clone());
        for i in 0..2 {
            containment.record_failure(&pack_id, Timestamp::from_millis(i * 1000), "err").unwrap();
        }
        let health = containment.health(&pack_id).unwrap();
        assert!(matches!(health.status, HealthStatus::Degraded));
    }

    #[test]
    fn disables_at_full_threshold_and_fires_callback_once() {
        let calls = Arc::new(Mutex::new(0));
        let calls_clone = Arc::clone(&calls);
        let containment = Containment::new(policy()).with_on_disable(Arc::new(move |_, _| {
            *calls_clone.lock().unwrap() += 1;
        }));
        let pack_id = PackId::new("pack-a");
        containment.register(pack_id.clone());
        for i in 0..6 {
            containment.record_failure(&pack_id, Timestamp::from_millis(i * 1000), "err").unwrap();
        }
        let health = containment.health(&pack_id).unwrap();
        assert!(matches!(health.status, HealthStatus::Disabled));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn auto_recovery_after_interval_clears_history() {
        let containment = Containment::new(policy());
        let pack_id = PackId::new("pack-a");
        containment.register(pack_id.clone());
        for i in 0..4 {
            containment.record_failure(&pack_id, Timestamp::from_millis(i * 1000), "err").unwrap();
        }
        assert!(containment.check_auto_recover(Timestamp::from_millis(50_000)).is_empty());
        let recovered = containment.check_auto_recover(Timestamp::from_millis(200_000));
        assert_eq!(recovered, vec![pack_id.clone()]);
        let health = containment.health(&pack_id).unwrap();
        assert!(matches!(health.status, HealthStatus::Active));
        assert_eq!(health.failure_count, 0);
    }

    #[test]
    fn old_failures_are_pruned_from_the_window() {
        let containment = Containment::new(policy());
        let pack_id = PackId::new("pack-a");
        containment.register(pack_id.clone());
        containment.record_failure(&pack_id, Timestamp::from_millis(0), "err").unwrap();
        containment.record_failure(&pack_id, Timestamp::from_millis(1000), "err").unwrap();
        let health = containment.record_failure(&pack_id, Timestamp::from_millis(200_000), "err").unwrap();
        assert_eq!(health.failure_count, 1);
    }

    #[test]
    fn mark_failed_is_not_cleared_by_auto_recovery() {
        let containment = Containment::new(policy());
        let pack_id = PackId::new("pack-a");
        containment.register(pack_id.clone());
        containment.mark_failed(&pack_id, Timestamp::from_millis(0), "manifest signature invalid").unwrap();

        let health = containment.health(&pack_id).unwrap();
        assert!(matches!(health.status, HealthStatus::Failed));

        let recovered = containment.check_auto_recover(Timestamp::from_millis(1_000_000));
        assert!(recovered.is_empty());
        let health = containment.health(&pack_id).unwrap();
        assert!(matches!(health.status, HealthStatus::Failed));

        containment.enable(&pack_id).unwrap();
        let health = containment.health(&pack_id).unwrap();
        assert!(matches!(health.status, HealthStatus::Active));
    }
}
