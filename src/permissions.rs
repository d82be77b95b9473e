//! Host permission gating.
//!
//! Usage access is load-bearing: without it the oracle reads nothing and
//! monitoring must refuse to start. The overlay permission only degrades
//! the experience (in-app lock instead of draw-over-apps).

use thiserror::Error;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PermissionSnapshot {
    /// Can query the usage oracle (app usage stats access).
    pub usage_access: bool,
    /// Can draw the system overlay over other apps.
    pub system_overlay: bool,
    /// Host delivers window-change callbacks (accessibility-style feed).
    pub event_feed: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PermissionError {
    #[error("usage access not granted; monitoring cannot observe the foreground app")]
    UsageAccessMissing,
}

/// What monitoring is allowed to do, derived from a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitoringGrant {
    /// False means blocks fall back to the in-app lock surface.
    pub system_overlay: bool,
    pub event_feed: bool,
}

pub trait PermissionProbe: Send + Sync {
    fn check(&self) -> PermissionSnapshot;
}

/// Fixed snapshot; the embedding host wires a real probe instead.
pub struct StaticProbe(pub PermissionSnapshot);

impl PermissionProbe for StaticProbe {
    fn check(&self) -> PermissionSnapshot {
        self.0
    }
}

pub fn ensure_can_monitor(snapshot: PermissionSnapshot) -> Result<MonitoringGrant, PermissionError> {
    if !snapshot.usage_access {
        return Err(PermissionError::UsageAccessMissing);
    }
    if !snapshot.system_overlay {
        log::warn!("overlay permission missing; blocks will use the in-app lock surface");
    }
    Ok(MonitoringGrant {
        system_overlay: snapshot.system_overlay,
        event_feed: snapshot.event_feed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_access_is_required() {
        let err = ensure_can_monitor(PermissionSnapshot::default()).unwrap_err();
        assert_eq!(err, PermissionError::UsageAccessMissing);
    }

    #[test]
    fn missing_overlay_degrades_instead_of_failing() {
        let grant = ensure_can_monitor(PermissionSnapshot {
            usage_access: true,
            system_overlay: false,
            event_feed: false,
        })
        .unwrap();
        assert!(!grant.system_overlay);
    }

    #[test]
    fn full_grant_passes_through() {
        let grant = ensure_can_monitor(PermissionSnapshot {
            usage_access: true,
            system_overlay: true,
            event_feed: true,
        })
        .unwrap();
        assert!(grant.system_overlay && grant.event_feed);
    }
}
