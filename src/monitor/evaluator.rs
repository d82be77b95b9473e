//! Pure per-tick breach decision. One function, fed a snapshot of the
//! policy and block bookkeeping; the loop acts on the result.

use crate::limits::{BlockState, BREACH_COOLDOWN_MS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDecision {
    Skip(SkipReason),
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// An overlay for this package is already up.
    OverlayActive,
    /// A freshly granted extension is still in its grace window.
    InGrace,
    /// The app has no limit configured.
    Unlimited,
    /// Accumulated time is still under the limit.
    UnderLimit,
    /// A block fired recently; suppress re-fires while it settles.
    CoolingDown,
}

pub fn evaluate(
    limit_minutes: Option<u32>,
    block: &BlockState,
    accumulated_ms: i64,
    now_ms: i64,
) -> TickDecision {
    if block.overlay_active {
        return TickDecision::Skip(SkipReason::OverlayActive);
    }
    if let Some(grace_until) = block.grace_until {
        if now_ms < grace_until {
            return TickDecision::Skip(SkipReason::InGrace);
        }
    }
    let Some(limit_minutes) = limit_minutes else {
        return TickDecision::Skip(SkipReason::Unlimited);
    };
    // A zero-minute limit breaches on the first tick the app is foreground.
    let limit_ms = i64::from(limit_minutes) * 60_000;
    if accumulated_ms < limit_ms {
        return TickDecision::Skip(SkipReason::UnderLimit);
    }
    if let Some(last_blocked_at) = block.last_blocked_at {
        if now_ms - last_blocked_at < BREACH_COOLDOWN_MS {
            return TickDecision::Skip(SkipReason::CoolingDown);
        }
    }
    TickDecision::Block
}
