//! The governor's heartbeat: one tick every few seconds that rolls the day
//! over, tracks foreground transitions, reconciles usage against the
//! oracle, and fires a block when a limit is breached.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{Local, NaiveDate, TimeZone, Utc};
use log::{error, info, warn};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::challenge::{ExtensionValidator, QuestionProvider};
use crate::db::{Database, META_LAST_RESET_DAY};
use crate::detector::{
    fallback_label, Detection, DetectionStrategy, EventFeed, PackageFilter, PollingDetector,
    StabilityGate,
};
use crate::events::{EventBus, GovernorEvent};
use crate::monitor::evaluator::{evaluate, TickDecision};
use crate::oracle::{daily_foreground_ms, UsageOracle};
use crate::overlay::{spawn_overlay, BlockRequest, OverlayDeps, OverlayHandle, OverlayMode};
use crate::settings::SettingsStore;
use crate::state::SharedState;

pub const POLL_INTERVAL: Duration = Duration::from_secs(3);
/// Ticks between periodic usage checkpoints to the database.
pub const PERSIST_EVERY_TICKS: u32 = 10;
/// Consecutive launcher readings before the live session is frozen.
const LAUNCHER_STABILITY: u32 = 2;

pub(crate) struct LoopDeps {
    pub state: SharedState,
    pub db: Database,
    pub bus: EventBus,
    pub settings: Arc<SettingsStore>,
    pub oracle: Arc<dyn UsageOracle>,
    pub filter: Arc<PackageFilter>,
    pub questions: Arc<QuestionProvider>,
    pub validator: Arc<ExtensionValidator>,
    pub surfaces: Arc<dyn crate::overlay::SurfaceProvider>,
    pub overlay_handle: Arc<StdMutex<Option<OverlayHandle>>>,
    pub cancel: CancellationToken,
}

pub(crate) async fn monitoring_loop(deps: LoopDeps, mut feed: Option<EventFeed>) {
    let detector = Arc::new(PollingDetector::new(Arc::clone(&deps.filter)));
    let mut launcher_gate = StabilityGate::new(LAUNCHER_STABILITY);
    let mut ticks: u32 = 0;

    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                ticks = ticks.wrapping_add(1);
                if let Err(err) =
                    run_tick(&deps, &detector, feed.as_mut(), &mut launcher_gate, ticks).await
                {
                    error!("monitor tick failed: {err:#}");
                }
            }
            _ = deps.cancel.cancelled() => {
                info!("monitoring loop shutting down");
                break;
            }
        }
    }

    // Final checkpoint so a clean stop loses nothing.
    let now_ms = Utc::now().timestamp_millis();
    let today = Local::now().date_naive();
    let dirty = deps.state.lock().await.usage.checkpoint(now_ms);
    if let Err(err) = deps.db.upsert_usage(today, dirty).await {
        warn!("final usage checkpoint failed: {err:#}");
    }
}

async fn run_tick(
    deps: &LoopDeps,
    detector: &Arc<PollingDetector>,
    feed: Option<&mut EventFeed>,
    launcher_gate: &mut StabilityGate,
    ticks: u32,
) -> Result<()> {
    let now_ms = Utc::now().timestamp_millis();
    let today = Local::now().date_naive();

    maybe_daily_reset(deps, today).await?;

    let detection = detect(deps, detector, feed, now_ms).await;
    apply_detection(deps, detection, launcher_gate, now_ms, today).await?;

    let current = deps
        .state
        .lock()
        .await
        .usage
        .current()
        .map(str::to_string);
    if let Some(package) = current {
        reconcile_current(deps, &package, today, now_ms).await?;
        check_breach(deps, &package, now_ms).await;
    }

    if ticks % PERSIST_EVERY_TICKS == 0 {
        let dirty = deps.state.lock().await.usage.checkpoint(now_ms);
        deps.db
            .upsert_usage(today, dirty)
            .await
            .context("periodic usage checkpoint failed")?;
    }

    Ok(())
}

/// Local-midnight rollover: restore limits to their originals, clear the
/// day's accumulators, and persist the new baseline. Idempotent per day.
async fn maybe_daily_reset(deps: &LoopDeps, today: NaiveDate) -> Result<()> {
    {
        let mut guard = deps.state.lock().await;
        if !guard.limits.reset_for_day(today) {
            return Ok(());
        }
        guard.usage.clear_all();
    }

    deps.db
        .restore_all_limits()
        .await
        .context("failed to restore limits for daily reset")?;
    deps.db
        .prune_usage_before(today)
        .await
        .context("failed to prune stale usage rows")?;
    deps.db
        .set_meta(META_LAST_RESET_DAY, &today.to_string())
        .await
        .context("failed to record reset day")?;

    info!("daily reset performed for {today}");
    deps.bus.publish(GovernorEvent::DailyResetPerformed {
        day: today.to_string(),
    });
    Ok(())
}

async fn detect(
    deps: &LoopDeps,
    detector: &Arc<PollingDetector>,
    feed: Option<&mut EventFeed>,
    now_ms: i64,
) -> Detection {
    if deps.settings.detection_strategy() == DetectionStrategy::EventFeed {
        if let Some(feed) = feed {
            let detection = feed.latest(&deps.filter);
            if detection != Detection::Unknown {
                return detection;
            }
            // No event since the last tick; the polling probe fills in.
        }
    }

    let oracle = Arc::clone(&deps.oracle);
    let detector = Arc::clone(detector);
    tokio::task::spawn_blocking(move || detector.detect(oracle.as_ref(), now_ms))
        .await
        .unwrap_or(Detection::Unknown)
}

async fn apply_detection(
    deps: &LoopDeps,
    detection: Detection,
    launcher_gate: &mut StabilityGate,
    now_ms: i64,
    today: NaiveDate,
) -> Result<()> {
    match detection {
        Detection::App(package) => {
            launcher_gate.reset();
            let (previous, dirty) = {
                let mut guard = deps.state.lock().await;
                if guard.usage.current() == Some(package.as_str()) {
                    return Ok(());
                }
                let previous = guard.usage.current().map(str::to_string);
                let dirty = guard.usage.transition_to(Some(&package), now_ms);
                (previous, dirty)
            };
            deps.db
                .upsert_usage(today, dirty)
                .await
                .context("failed to persist frozen session")?;
            deps.bus
                .publish(GovernorEvent::AppSwitched { previous, package });
        }
        Detection::Launcher => {
            // Debounced: a momentary home-screen flicker between apps must
            // not end the session.
            if !launcher_gate.observe(&Detection::Launcher) {
                return Ok(());
            }
            launcher_gate.reset();
            let dirty = {
                let mut guard = deps.state.lock().await;
                if guard.usage.current().is_none() {
                    return Ok(());
                }
                guard.usage.transition_to(None, now_ms)
            };
            deps.db
                .upsert_usage(today, dirty)
                .await
                .context("failed to persist session frozen at launcher")?;
        }
        // Neutral readings preserve the running session.
        Detection::OwnPackage | Detection::Unknown => {}
    }
    Ok(())
}

/// Pull the oracle's daily total for the current app. The total covers the
/// open session too, so the accumulator nets it against the live clock
/// rather than stacking the two.
async fn reconcile_current(
    deps: &LoopDeps,
    package: &str,
    today: NaiveDate,
    now_ms: i64,
) -> Result<()> {
    let day_start_ms = local_day_start_ms(today)?;
    let oracle = Arc::clone(&deps.oracle);
    let pkg = package.to_string();
    let total = tokio::task::spawn_blocking(move || {
        daily_foreground_ms(oracle.as_ref(), &pkg, day_start_ms, now_ms)
    })
    .await
    .context("daily usage probe worker join failed")?;

    if let Some(total_ms) = total {
        deps.state
            .lock()
            .await
            .usage
            .reconcile(package, total_ms, now_ms);
    }
    Ok(())
}

async fn check_breach(deps: &LoopDeps, package: &str, now_ms: i64) {
    let blocking = deps.settings.blocking();

    let (limit_minutes, request) = {
        let mut guard = deps.state.lock().await;
        let limit_minutes = guard.limits.limit_minutes(package);
        let block = guard.limits.block_state(package);
        let accumulated_ms = guard.usage.accumulated_ms(package, now_ms);

        match evaluate(limit_minutes, &block, accumulated_ms, now_ms) {
            TickDecision::Skip(_) => return,
            TickDecision::Block => {}
        }
        // One overlay at a time; this breach re-fires once the active one
        // is gone, because nothing is stamped for it here.
        if guard.limits.any_overlay_active() {
            return;
        }
        guard.limits.mark_blocked(package, now_ms);
        (
            limit_minutes,
            BlockRequest {
                package: package.to_string(),
                app_name: fallback_label(package),
                limit_minutes: limit_minutes.unwrap_or(0),
                mode: if blocking.challenge_enabled {
                    OverlayMode::Challenge
                } else {
                    OverlayMode::SimpleBlock
                },
                regenerate_on_switch: blocking.regenerate_on_switch,
            },
        )
    };

    info!(
        "limit breached for {package} ({} min); raising overlay",
        limit_minutes.unwrap_or(0)
    );
    let overlay_deps = OverlayDeps {
        state: Arc::clone(&deps.state),
        bus: deps.bus.clone(),
        questions: Arc::clone(&deps.questions),
        validator: Arc::clone(&deps.validator),
        oracle: Arc::clone(&deps.oracle),
        filter: Arc::clone(&deps.filter),
        surfaces: Arc::clone(&deps.surfaces),
    };
    let (handle, _task) = spawn_overlay(overlay_deps, request, deps.cancel.child_token());
    *deps.overlay_handle.lock().unwrap() = Some(handle);
}

pub(crate) fn local_day_start_ms(day: NaiveDate) -> Result<i64> {
    let midnight = day
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow!("invalid midnight for {day}"))?;
    Local
        .from_local_datetime(&midnight)
        .earliest()
        .map(|dt| dt.timestamp_millis())
        .ok_or_else(|| anyhow!("no local timestamp for midnight of {day}"))
}
