//! Usage oracle: the OS usage-statistics query surface.
//!
//! The oracle is a best-effort snapshot source. Small windows frequently come
//! back empty, so callers probe a ladder of progressively larger trailing
//! windows and treat "no data" as unknown rather than as an error.

pub mod dumpsys;

use anyhow::Result;

/// Foreground-usage entry for one package over a queried window.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageSample {
    pub package: String,
    /// Epoch millis of the most recent time the package was in the foreground.
    pub last_used_at: i64,
    /// Total foreground time attributed inside the queried window.
    pub total_foreground_ms: i64,
}

/// Windowed usage query, implemented against whatever telemetry the host has.
///
/// Returns a possibly-empty snapshot; implementations convert their own
/// failures into an `Err` only when the query surface itself is broken
/// (callers downgrade that to "no data this tick").
pub trait UsageOracle: Send + Sync {
    fn query_usage(&self, window_start_ms: i64, window_end_ms: i64) -> Result<Vec<UsageSample>>;
}

/// Trailing probe windows, smallest first. The short windows give the freshest
/// answer when they have data; the longer ones are the reliability fallback.
pub const PROBE_WINDOWS_MS: [i64; 4] = [250, 1_000, 2_500, 5_000];

/// Daily foreground total for a package, or `None` when the oracle has no row.
pub fn daily_foreground_ms(
    oracle: &dyn UsageOracle,
    package: &str,
    day_start_ms: i64,
    now_ms: i64,
) -> Option<i64> {
    let samples = match oracle.query_usage(day_start_ms, now_ms) {
        Ok(samples) => samples,
        Err(err) => {
            log::warn!("daily usage query failed for {package}: {err:#}");
            return None;
        }
    };
    samples
        .iter()
        .find(|s| s.package == package)
        .map(|s| s.total_foreground_ms)
}

/// Oracle that always reports an empty snapshot. Stands in when usage access
/// is missing so the rest of the pipeline degrades to "unknown" instead of
/// failing.
pub struct NullOracle;

impl UsageOracle for NullOracle {
    fn query_usage(&self, _window_start_ms: i64, _window_end_ms: i64) -> Result<Vec<UsageSample>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Scripted oracle for tests: returns samples whose `last_used_at` falls
    /// inside the queried window, mimicking the windowed OS query.
    pub struct FixedOracle {
        samples: Mutex<Vec<UsageSample>>,
    }

    impl FixedOracle {
        pub fn new(samples: Vec<UsageSample>) -> Self {
            Self {
                samples: Mutex::new(samples),
            }
        }

        pub fn set(&self, samples: Vec<UsageSample>) {
            *self.samples.lock().unwrap() = samples;
        }
    }

    impl UsageOracle for FixedOracle {
        fn query_usage(&self, window_start_ms: i64, window_end_ms: i64) -> Result<Vec<UsageSample>> {
            Ok(self
                .samples
                .lock()
                .unwrap()
                .iter()
                .filter(|s| s.last_used_at >= window_start_ms && s.last_used_at <= window_end_ms)
                .cloned()
                .collect())
        }
    }
}
