//! Session accumulator: per-app daily usage combining the frozen base with
//! the live in-progress session.
//!
//! `base_ms` is monotonically non-decreasing within a day; the OS daily total
//! is authoritative and only ever raises it. The live session is derived on
//! demand from the switch-in timestamp, never cached.

use std::collections::HashMap;

/// Per-package usage for the current day.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageRecord {
    /// Frozen foreground time, reconciled against the oracle's daily total.
    pub base_ms: i64,
    /// Epoch millis the package most recently became foreground, if it is
    /// foreground now.
    pub session_started_at: Option<i64>,
}

/// A base value that changed and should be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct DirtyUsage {
    pub package: String,
    pub base_ms: i64,
}

#[derive(Debug, Default)]
pub struct SessionAccumulator {
    records: HashMap<String, UsageRecord>,
    current: Option<String>,
}

impl SessionAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Seed a frozen base, e.g. from persisted state on restart. Never lowers
    /// an existing base.
    pub fn seed(&mut self, package: &str, base_ms: i64) {
        let record = self.records.entry(package.to_string()).or_default();
        record.base_ms = record.base_ms.max(base_ms);
    }

    /// Raise our figure to the oracle's daily total if it is ahead of ours.
    /// The oracle is authoritative and monotonic; it never lowers.
    ///
    /// The oracle's total for an open session already includes the elapsed
    /// time up to the query, so while a session is live it is compared
    /// against `base + live`, not the frozen base alone. Adopting the oracle
    /// total re-anchors the session clock at `now` so the same interval is
    /// never counted twice.
    pub fn reconcile(&mut self, package: &str, oracle_daily_ms: i64, now_ms: i64) {
        let record = self.records.entry(package.to_string()).or_default();
        match record.session_started_at {
            Some(started) => {
                let live = (now_ms - started).max(0);
                if oracle_daily_ms > record.base_ms + live {
                    record.base_ms = oracle_daily_ms;
                    record.session_started_at = Some(now_ms);
                }
            }
            None => {
                if oracle_daily_ms > record.base_ms {
                    record.base_ms = oracle_daily_ms;
                }
            }
        }
    }

    /// Handle a confirmed foreground transition. The previous session is
    /// fully flushed into its base before the new session's clock starts, so
    /// time is neither double-counted nor lost.
    ///
    /// `next` of `None` means "no tracked app is foreground" (home screen).
    /// Returns the bases that changed, for persistence.
    pub fn transition_to(&mut self, next: Option<&str>, now_ms: i64) -> Vec<DirtyUsage> {
        if self.current.as_deref() == next {
            return Vec::new();
        }

        let mut dirty = Vec::new();
        if let Some(previous) = self.current.take() {
            if let Some(record) = self.records.get_mut(&previous) {
                if let Some(started) = record.session_started_at.take() {
                    let elapsed = (now_ms - started).max(0);
                    record.base_ms += elapsed;
                    dirty.push(DirtyUsage {
                        package: previous,
                        base_ms: record.base_ms,
                    });
                }
            }
        }

        if let Some(package) = next {
            let record = self.records.entry(package.to_string()).or_default();
            record.session_started_at = Some(now_ms);
            self.current = Some(package.to_string());
        }

        dirty
    }

    /// Total accumulated usage for the package right now.
    pub fn accumulated_ms(&self, package: &str, now_ms: i64) -> i64 {
        let Some(record) = self.records.get(package) else {
            return 0;
        };
        match record.session_started_at {
            Some(started) => record.base_ms + (now_ms - started).max(0),
            None => record.base_ms,
        }
    }

    /// Flush the live session into its base without ending it, and report
    /// every known base. Used by the periodic persistence pass.
    pub fn checkpoint(&mut self, now_ms: i64) -> Vec<DirtyUsage> {
        if let Some(current) = self.current.clone() {
            if let Some(record) = self.records.get_mut(&current) {
                if let Some(started) = record.session_started_at {
                    let elapsed = (now_ms - started).max(0);
                    if elapsed > 0 {
                        record.base_ms += elapsed;
                        record.session_started_at = Some(now_ms);
                    }
                }
            }
        }
        self.records
            .iter()
            .map(|(package, record)| DirtyUsage {
                package: package.clone(),
                base_ms: record.base_ms,
            })
            .collect()
    }

    /// Snapshot of accumulated usage per package, for hosts rendering a
    /// usage list.
    pub fn snapshot(&self, now_ms: i64) -> Vec<DirtyUsage> {
        self.records
            .keys()
            .map(|package| DirtyUsage {
                package: package.clone(),
                base_ms: self.accumulated_ms(package, now_ms),
            })
            .collect()
    }

    /// Daily rollover: drop every record and any in-progress session.
    pub fn clear_all(&mut self) {
        self.records.clear();
        self.current = None;
    }
}
