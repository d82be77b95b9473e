//! Event-driven detection strategy: host window-state-change callbacks.
//!
//! The host (an accessibility bridge or equivalent) pushes raw package ids
//! through an [`EventFeedHandle`]; the monitor drains the feed each tick and
//! keeps only the newest classified reading.

use tokio::sync::mpsc;

use super::{Detection, PackageFilter};

/// Producer half, handed to the host's window-change callback.
#[derive(Clone)]
pub struct EventFeedHandle {
    tx: mpsc::UnboundedSender<String>,
}

impl EventFeedHandle {
    /// Report a window state change. Cheap and non-blocking; safe to call
    /// from any thread.
    pub fn on_window_changed(&self, package: impl Into<String>) {
        let _ = self.tx.send(package.into());
    }
}

/// Consumer half, owned by the monitoring loop.
pub struct EventFeed {
    rx: mpsc::UnboundedReceiver<String>,
}

impl EventFeed {
    pub fn channel() -> (EventFeedHandle, EventFeed) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventFeedHandle { tx }, EventFeed { rx })
    }

    /// Drain everything queued since the last tick and return the newest
    /// reading that classifies to something other than `Unknown`.
    pub fn latest(&mut self, filter: &PackageFilter) -> Detection {
        let mut latest = Detection::Unknown;
        while let Ok(package) = self.rx.try_recv() {
            let detection = filter.classify(&package);
            if detection != Detection::Unknown {
                latest = detection;
            }
        }
        latest
    }
}
