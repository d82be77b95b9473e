//! Foreground detection: which app the user is currently looking at.
//!
//! Two interchangeable strategies share one deny-list filter and one
//! stability-debounce policy: an event feed driven by host window-change
//! callbacks, and a polling probe over the usage oracle.

mod event_feed;
mod filter;
mod polling;

pub use event_feed::{EventFeed, EventFeedHandle};
pub use filter::{fallback_label, PackageFilter};
pub use polling::PollingDetector;

use serde::{Deserialize, Serialize};

/// Outcome of one detection pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    /// A trackable application.
    App(String),
    /// The governor's own package: neutral, never a transition.
    OwnPackage,
    /// The OS home screen.
    Launcher,
    /// No usable reading this pass; callers preserve their previous state.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStrategy {
    #[default]
    Polling,
    EventFeed,
}

/// Debounce for noisy readings: a detection counts as confirmed only after
/// the same value has been observed `required` times in a row.
#[derive(Debug)]
pub struct StabilityGate {
    required: u32,
    streak: u32,
    last: Option<Detection>,
}

impl StabilityGate {
    pub fn new(required: u32) -> Self {
        Self {
            required: required.max(1),
            streak: 0,
            last: None,
        }
    }

    /// Feed one reading; returns true once the current streak reaches the
    /// required length. Unknown readings break the streak without starting
    /// a new one.
    pub fn observe(&mut self, detection: &Detection) -> bool {
        if *detection == Detection::Unknown {
            self.streak = 0;
            self.last = None;
            return false;
        }
        if self.last.as_ref() == Some(detection) {
            self.streak += 1;
        } else {
            self.last = Some(detection.clone());
            self.streak = 1;
        }
        self.streak >= self.required
    }

    pub fn reset(&mut self) {
        self.streak = 0;
        self.last = None;
    }
}
