//! In-process broadcast bus for governor state changes.
//!
//! Components signal each other through typed events instead of direct
//! references. Delivery is at-most-once per logical event, but subscribers
//! must stay idempotent: a lagging receiver can observe gaps and the same
//! logical condition can be re-announced across restarts.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const BUS_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GovernorEvent {
    /// The foreground detector confirmed a switch to a new tracked app.
    AppSwitched {
        previous: Option<String>,
        package: String,
    },
    /// A blocking overlay went up for the package.
    OverlayShown { package: String },
    /// The overlay for the package was torn down.
    OverlayDismissed { package: String },
    /// A validated extension raised the effective limit.
    ExtensionGranted {
        package: String,
        granted_minutes: u32,
        new_limit_minutes: u32,
    },
    /// Accumulators cleared and limits restored at local midnight.
    DailyResetPerformed { day: String },
    MonitoringStarted,
    MonitoringStopped,
}

/// Cloneable handle to the process-local pub/sub channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<GovernorEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Publish, ignoring the no-subscriber case (events are advisory).
    pub fn publish(&self, event: GovernorEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GovernorEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
