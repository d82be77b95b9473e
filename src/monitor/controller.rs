//! Lifecycle and API surface of the governor: start/stop monitoring,
//! configure limits, read usage, and reach the active overlay.

use std::sync::{Arc, Mutex as StdMutex};

use anyhow::{bail, Context, Result};
use chrono::{Local, Utc};
use log::{info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::challenge::{ExtensionValidator, QuestionProvider};
use crate::db::{Database, META_LAST_RESET_DAY};
use crate::detector::{EventFeed, EventFeedHandle, PackageFilter};
use crate::events::{EventBus, GovernorEvent};
use crate::monitor::loop_worker::{monitoring_loop, LoopDeps};
use crate::oracle::UsageOracle;
use crate::overlay::{OverlayHandle, SurfaceProvider};
use crate::permissions::{ensure_can_monitor, PermissionProbe};
use crate::settings::SettingsStore;
use crate::state::{shared_state, SharedState};

/// One row of the live usage snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppUsage {
    pub package: String,
    pub accumulated_ms: i64,
    pub limit_minutes: Option<u32>,
}

pub struct MonitorConfig {
    pub db: Database,
    pub settings: Arc<SettingsStore>,
    pub oracle: Arc<dyn UsageOracle>,
    pub surfaces: Arc<dyn SurfaceProvider>,
    pub permissions: Arc<dyn PermissionProbe>,
}

struct Worker {
    cancel: CancellationToken,
    loop_task: JoinHandle<()>,
    grant_writer: JoinHandle<()>,
    feed_handle: EventFeedHandle,
}

pub struct MonitorController {
    state: SharedState,
    bus: EventBus,
    db: Database,
    settings: Arc<SettingsStore>,
    oracle: Arc<dyn UsageOracle>,
    surfaces: Arc<dyn SurfaceProvider>,
    permissions: Arc<dyn PermissionProbe>,
    overlay_handle: Arc<StdMutex<Option<OverlayHandle>>>,
    worker: tokio::sync::Mutex<Option<Worker>>,
}

impl MonitorController {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            state: shared_state(),
            bus: EventBus::new(),
            db: config.db,
            settings: config.settings,
            oracle: config.oracle,
            surfaces: config.surfaces,
            permissions: config.permissions,
            overlay_handle: Arc::new(StdMutex::new(None)),
            worker: tokio::sync::Mutex::new(None),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Start the monitoring loop. Fails when usage access is missing or
    /// monitoring is already running; restores persisted limits and today's
    /// usage first so a crash or restart loses at most one checkpoint
    /// interval.
    pub async fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            bail!("monitoring already active");
        }

        let grant = ensure_can_monitor(self.permissions.check())?;
        self.restore_persisted().await?;

        let filter = Arc::new(PackageFilter::new(self.settings.own_package()));
        let questions = Arc::new(QuestionProvider::new(self.settings.generator_config()));
        let validator = Arc::new(ExtensionValidator::new(self.settings.validator_config()));

        let (feed_handle, feed) = EventFeed::channel();
        let feed = grant.event_feed.then_some(feed);

        let cancel = CancellationToken::new();
        let deps = LoopDeps {
            state: Arc::clone(&self.state),
            db: self.db.clone(),
            bus: self.bus.clone(),
            settings: Arc::clone(&self.settings),
            oracle: Arc::clone(&self.oracle),
            filter,
            questions,
            validator,
            surfaces: Arc::clone(&self.surfaces),
            overlay_handle: Arc::clone(&self.overlay_handle),
            cancel: cancel.clone(),
        };
        let loop_task = tokio::spawn(monitoring_loop(deps, feed));
        let grant_writer = tokio::spawn(persist_grants(
            self.bus.clone(),
            self.db.clone(),
            Arc::clone(&self.state),
            cancel.clone(),
        ));

        *worker = Some(Worker {
            cancel,
            loop_task,
            grant_writer,
            feed_handle,
        });
        drop(worker);

        info!("monitoring started");
        self.bus.publish(GovernorEvent::MonitoringStarted);
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        let Some(worker) = self.worker.lock().await.take() else {
            return Ok(());
        };
        worker.cancel.cancel();
        worker
            .loop_task
            .await
            .context("monitoring loop task failed to join")?;
        worker
            .grant_writer
            .await
            .context("grant writer task failed to join")?;
        self.overlay_handle.lock().unwrap().take();

        info!("monitoring stopped");
        self.bus.publish(GovernorEvent::MonitoringStopped);
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.worker.lock().await.is_some()
    }

    /// Configure (or reconfigure) a daily limit for a package.
    pub async fn set_limit(&self, package: &str, minutes: u32) -> Result<()> {
        self.state.lock().await.limits.set_limit(package, minutes);
        self.db.upsert_limit(package, minutes, minutes).await
    }

    /// Back to unlimited.
    pub async fn remove_limit(&self, package: &str) -> Result<()> {
        self.state.lock().await.limits.remove_limit(package);
        self.db.delete_limit(package).await
    }

    /// Live usage for every app seen today, merged with its limit.
    pub async fn usage_snapshot(&self) -> Vec<AppUsage> {
        let now_ms = Utc::now().timestamp_millis();
        let guard = self.state.lock().await;
        let mut rows: Vec<AppUsage> = guard
            .usage
            .snapshot(now_ms)
            .into_iter()
            .map(|record| AppUsage {
                limit_minutes: guard.limits.limit_minutes(&record.package),
                package: record.package,
                accumulated_ms: record.base_ms,
            })
            .collect();
        // Limited apps show up even before their first foreground session.
        for (package, policy) in guard.limits.policies() {
            if !rows.iter().any(|row| row.package == package) {
                rows.push(AppUsage {
                    package: package.to_string(),
                    accumulated_ms: 0,
                    limit_minutes: Some(policy.limit_minutes),
                });
            }
        }
        rows.sort_by(|a, b| a.package.cmp(&b.package));
        rows
    }

    /// The active overlay, if one is up. The host view layer forwards user
    /// gestures through this handle. A handle whose overlay has already
    /// dismissed itself is dropped here rather than returned.
    pub fn overlay(&self) -> Option<OverlayHandle> {
        let mut guard = self.overlay_handle.lock().unwrap();
        match guard.as_ref() {
            Some(handle) if !handle.is_closed() => Some(handle.clone()),
            Some(_) => {
                guard.take();
                None
            }
            None => None,
        }
    }

    /// Producer side of the window-change event feed, for hosts that can
    /// deliver accessibility-style callbacks.
    pub async fn event_feed(&self) -> Option<EventFeedHandle> {
        self.worker
            .lock()
            .await
            .as_ref()
            .map(|worker| worker.feed_handle.clone())
    }

    async fn restore_persisted(&self) -> Result<()> {
        let limits = self.db.load_limits().await.context("failed to load limits")?;
        let last_reset_day = self
            .db
            .get_meta(META_LAST_RESET_DAY)
            .await
            .context("failed to load last reset day")?
            .and_then(|raw| raw.parse().ok());
        let today = Local::now().date_naive();
        // A fresh database has never reset. Today is its baseline; treating
        // the missing key as "reset due" would fire a spurious reset on the
        // first tick.
        let last_reset_day = match last_reset_day {
            Some(day) => Some(day),
            None => {
                self.db
                    .set_meta(META_LAST_RESET_DAY, &today.to_string())
                    .await
                    .context("failed to seed reset day")?;
                Some(today)
            }
        };
        let usage = self
            .db
            .load_usage(today)
            .await
            .context("failed to load today's usage")?;

        let mut guard = self.state.lock().await;
        for limit in &limits {
            guard
                .limits
                .restore_policy(&limit.package, limit.limit_minutes, limit.original_minutes);
        }
        guard.limits.restore_last_reset_day(last_reset_day);
        for record in &usage {
            guard.usage.seed(&record.package, record.base_ms);
        }
        info!(
            "restored {} limit(s) and {} usage row(s) for {today}",
            limits.len(),
            usage.len()
        );
        Ok(())
    }
}

/// Grants raise the in-memory limit; this writer makes them durable so a
/// restart mid-extension does not re-block immediately.
async fn persist_grants(
    bus: EventBus,
    db: Database,
    state: SharedState,
    cancel: CancellationToken,
) {
    let mut events = bus.subscribe();
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = cancel.cancelled() => break,
        };
        match event {
            Ok(GovernorEvent::ExtensionGranted {
                package,
                new_limit_minutes,
                ..
            }) => {
                let original = state
                    .lock()
                    .await
                    .limits
                    .policy(&package)
                    .map(|policy| policy.original_minutes)
                    .unwrap_or(new_limit_minutes);
                if let Err(err) = db.upsert_limit(&package, new_limit_minutes, original).await {
                    warn!("failed to persist granted limit for {package}: {err:#}");
                }
            }
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("grant writer lagged, skipped {skipped} event(s)");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}
