//! Limit store: per-package minute caps, block bookkeeping, daily reset.
//!
//! Absent policy means unlimited. `original_minutes` preserves the
//! user-configured cap across extensions so the daily reset can restore it.

use chrono::NaiveDate;
use std::collections::HashMap;

/// Re-trigger suppression after a block fires for a package.
pub const BREACH_COOLDOWN_MS: i64 = 10_000;
/// Breach checks are suppressed this long after a grant, giving the OS usage
/// stats time to catch up with the raised limit.
pub const EXTENSION_GRACE_MS: i64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitPolicy {
    pub limit_minutes: u32,
    pub original_minutes: u32,
}

/// Ephemeral per-package block bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BlockState {
    pub overlay_active: bool,
    pub last_blocked_at: Option<i64>,
    pub grace_until: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GrantOutcome {
    pub granted_minutes: u32,
    pub new_limit_minutes: u32,
}

#[derive(Debug, Default)]
pub struct LimitStore {
    policies: HashMap<String, LimitPolicy>,
    blocks: HashMap<String, BlockState>,
    last_reset_day: Option<NaiveDate>,
}

impl LimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// User configuration: sets both the current and the original limit.
    pub fn set_limit(&mut self, package: &str, minutes: u32) {
        self.policies.insert(
            package.to_string(),
            LimitPolicy {
                limit_minutes: minutes,
                original_minutes: minutes,
            },
        );
    }

    /// Back to unlimited.
    pub fn remove_limit(&mut self, package: &str) {
        self.policies.remove(package);
    }

    /// Restore a policy from persisted state, current and original apart.
    pub fn restore_policy(&mut self, package: &str, limit_minutes: u32, original_minutes: u32) {
        self.policies.insert(
            package.to_string(),
            LimitPolicy {
                limit_minutes,
                original_minutes,
            },
        );
    }

    pub fn restore_last_reset_day(&mut self, day: Option<NaiveDate>) {
        self.last_reset_day = day;
    }

    /// `None` means unlimited.
    pub fn limit_minutes(&self, package: &str) -> Option<u32> {
        self.policies.get(package).map(|p| p.limit_minutes)
    }

    pub fn policy(&self, package: &str) -> Option<LimitPolicy> {
        self.policies.get(package).copied()
    }

    pub fn policies(&self) -> impl Iterator<Item = (&str, LimitPolicy)> {
        self.policies.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn block_state(&self, package: &str) -> BlockState {
        self.blocks.get(package).copied().unwrap_or_default()
    }

    pub fn overlay_active(&self, package: &str) -> bool {
        self.block_state(package).overlay_active
    }

    /// At most one overlay may exist system-wide.
    pub fn any_overlay_active(&self) -> bool {
        self.blocks.values().any(|b| b.overlay_active)
    }

    /// Record that a block fired: overlay up, cool-down stamped.
    pub fn mark_blocked(&mut self, package: &str, now_ms: i64) {
        let state = self.blocks.entry(package.to_string()).or_default();
        state.overlay_active = true;
        state.last_blocked_at = Some(now_ms);
    }

    pub fn mark_overlay_dismissed(&mut self, package: &str) {
        if let Some(state) = self.blocks.get_mut(package) {
            state.overlay_active = false;
        }
    }

    /// Apply a validated extension. The new cap is additive to *actual usage*
    /// (accumulated minutes + grant), so runway is exactly the granted
    /// minutes no matter how far past the original limit the user is.
    ///
    /// No-ops when the package is unlimited or no overlay is active for it
    /// (a stale validation callback after an independent dismissal).
    pub fn grant_extension(
        &mut self,
        package: &str,
        granted_minutes: u32,
        accumulated_ms: i64,
        now_ms: i64,
    ) -> Option<GrantOutcome> {
        if !self.overlay_active(package) {
            return None;
        }
        let policy = self.policies.get_mut(package)?;

        let granted_minutes = granted_minutes.max(1);
        let accumulated_minutes = (accumulated_ms / 60_000).max(0) as u32;
        let new_limit = accumulated_minutes + granted_minutes;
        policy.limit_minutes = new_limit;

        let state = self.blocks.entry(package.to_string()).or_default();
        state.grace_until = Some(now_ms + EXTENSION_GRACE_MS);

        Some(GrantOutcome {
            granted_minutes,
            new_limit_minutes: new_limit,
        })
    }

    /// Daily rollover: restore every current limit from its original and
    /// clear block timestamps. Idempotent per calendar day. Returns whether
    /// a reset was actually performed.
    pub fn reset_for_day(&mut self, today: NaiveDate) -> bool {
        if self.last_reset_day == Some(today) {
            return false;
        }
        for policy in self.policies.values_mut() {
            policy.limit_minutes = policy.original_minutes;
        }
        for state in self.blocks.values_mut() {
            state.last_blocked_at = None;
            state.grace_until = None;
        }
        self.last_reset_day = Some(today);
        true
    }

    pub fn last_reset_day(&self) -> Option<NaiveDate> {
        self.last_reset_day
    }
}
