//! Polling detection strategy: probe the usage oracle over a ladder of
//! trailing windows and pick the most recently used candidate.

use std::sync::Arc;

use crate::oracle::{UsageOracle, UsageSample, PROBE_WINDOWS_MS};

use super::{Detection, PackageFilter};

/// A candidate must have been used within this long of "now" to count as the
/// current foreground app; older rows are history, not presence.
const RECENCY_SLACK_MS: i64 = 2_500;

/// Floor under `total_foreground_ms` to discard rows the OS emits for apps
/// that only flickered through the foreground.
const MIN_FOREGROUND_MS: i64 = 50;

pub struct PollingDetector {
    filter: Arc<PackageFilter>,
}

impl PollingDetector {
    pub fn new(filter: Arc<PackageFilter>) -> Self {
        Self { filter }
    }

    /// One detection pass. Tries each probe window until a window yields any
    /// candidate; an empty ladder means `Unknown` (preserve previous state,
    /// never a false home-screen verdict).
    pub fn detect(&self, oracle: &dyn UsageOracle, now_ms: i64) -> Detection {
        for window_ms in PROBE_WINDOWS_MS {
            let samples = match oracle.query_usage(now_ms - window_ms, now_ms) {
                Ok(samples) => samples,
                Err(err) => {
                    log::warn!("usage probe ({window_ms}ms) failed: {err:#}");
                    continue;
                }
            };
            if let Some(detection) = self.pick(&samples, now_ms) {
                return detection;
            }
        }
        Detection::Unknown
    }

    fn pick(&self, samples: &[UsageSample], now_ms: i64) -> Option<Detection> {
        let best = samples
            .iter()
            .filter(|s| {
                s.last_used_at > 0
                    && s.total_foreground_ms >= MIN_FOREGROUND_MS
                    && now_ms - s.last_used_at <= RECENCY_SLACK_MS
                    && !self.filter.is_ignored(&s.package)
            })
            // Most recent wins; total foreground time breaks ties.
            .max_by_key(|s| (s.last_used_at, s.total_foreground_ms))?;
        Some(self.filter.classify(&best.package))
    }
}
