//! `UsageOracle` backed by `dumpsys usagestats` shell output.
//!
//! Usable on a device shell with the dump permission (adb or root). Each
//! ACTIVITY_RESUMED/ACTIVITY_PAUSED pair contributes its overlap with the
//! queried window; the pause timestamp doubles as last-used.

use std::collections::HashMap;
use std::process::Command;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime, TimeZone};

use super::{UsageOracle, UsageSample};

pub struct DumpsysOracle;

#[derive(Debug, PartialEq)]
struct UsageEvent {
    time_ms: i64,
    package: String,
    resumed: bool,
}

impl UsageOracle for DumpsysOracle {
    fn query_usage(&self, window_start_ms: i64, window_end_ms: i64) -> Result<Vec<UsageSample>> {
        let output = Command::new("sh")
            .arg("-c")
            .arg("dumpsys usagestats")
            .output()
            .context("failed to run dumpsys usagestats")?;
        let text = String::from_utf8_lossy(&output.stdout);
        let events = parse_events(&text);
        Ok(aggregate(&events, window_start_ms, window_end_ms))
    }
}

/// Parses lines of the form
/// `time="2024-05-01 13:02:11" type=ACTIVITY_RESUMED package=com.example ...`.
fn parse_events(dump: &str) -> Vec<UsageEvent> {
    let mut events = Vec::new();
    for line in dump.lines() {
        let Some(time) = field(line, "time=\"", "\"") else {
            continue;
        };
        let Some(kind) = field(line, "type=", " ") else {
            continue;
        };
        let resumed = match kind {
            "ACTIVITY_RESUMED" | "MOVE_TO_FOREGROUND" => true,
            "ACTIVITY_PAUSED" | "MOVE_TO_BACKGROUND" => false,
            _ => continue,
        };
        let Some(package) = field(line, "package=", " ") else {
            continue;
        };
        let Ok(naive) = NaiveDateTime::parse_from_str(time, "%Y-%m-%d %H:%M:%S") else {
            continue;
        };
        let Some(local) = Local.from_local_datetime(&naive).single() else {
            continue;
        };
        events.push(UsageEvent {
            time_ms: local.timestamp_millis(),
            package: package.to_string(),
            resumed,
        });
    }
    events
}

fn field<'a>(line: &'a str, prefix: &str, terminator: &str) -> Option<&'a str> {
    let start = line.find(prefix)? + prefix.len();
    let rest = &line[start..];
    let end = rest.find(terminator).unwrap_or(rest.len());
    let value = rest[..end].trim();
    (!value.is_empty()).then_some(value)
}

fn aggregate(events: &[UsageEvent], window_start_ms: i64, window_end_ms: i64) -> Vec<UsageSample> {
    let mut open: HashMap<&str, i64> = HashMap::new();
    let mut totals: HashMap<&str, (i64, i64)> = HashMap::new();

    for event in events {
        if event.resumed {
            open.insert(&event.package, event.time_ms);
        } else if let Some(started) = open.remove(event.package.as_str()) {
            let begin = started.max(window_start_ms);
            let end = event.time_ms.min(window_end_ms);
            if end > begin {
                let entry = totals.entry(&event.package).or_insert((0, 0));
                entry.0 += end - begin;
                entry.1 = entry.1.max(event.time_ms);
            }
        }
    }

    // Sessions still open at query time count up to the window end.
    for (package, started) in open {
        let begin = started.max(window_start_ms);
        if window_end_ms > begin {
            let entry = totals.entry(package).or_insert((0, 0));
            entry.0 += window_end_ms - begin;
            entry.1 = entry.1.max(window_end_ms);
        }
    }

    totals
        .into_iter()
        .map(|(package, (total, last))| UsageSample {
            package: package.to_string(),
            last_used_at: last,
            total_foreground_ms: total,
        })
        .collect()
}
