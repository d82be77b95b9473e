use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use log::info;

use screenward::monitor::{MonitorConfig, MonitorController};
use screenward::oracle::dumpsys::DumpsysOracle;
use screenward::oracle::UsageOracle;
use screenward::overlay::{FallbackSurfaceProvider, LogSurfaceProvider, SurfaceProvider};
use screenward::permissions::{PermissionProbe, PermissionSnapshot};
use screenward::{Database, SettingsStore};

/// Usage access is probed by actually asking the oracle: if `dumpsys`
/// answers, we can monitor.
struct OracleProbe {
    oracle: Arc<dyn UsageOracle>,
}

impl PermissionProbe for OracleProbe {
    fn check(&self) -> PermissionSnapshot {
        let now_ms = Utc::now().timestamp_millis();
        let usage_access = self.oracle.query_usage(now_ms - 60_000, now_ms).is_ok();
        PermissionSnapshot {
            usage_access,
            system_overlay: false,
            event_feed: false,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let data_dir = std::env::var_os("SCREENWARD_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("data"));
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

    let settings = Arc::new(SettingsStore::new(data_dir.join("settings.json"))?);
    let db = Database::new(data_dir.join("governor.db"))?;
    let oracle: Arc<dyn UsageOracle> = Arc::new(DumpsysOracle);
    let surfaces: Arc<dyn SurfaceProvider> = Arc::new(FallbackSurfaceProvider::new(vec![
        Box::new(LogSurfaceProvider),
    ]));
    let permissions = Arc::new(OracleProbe {
        oracle: Arc::clone(&oracle),
    });

    let controller = MonitorController::new(MonitorConfig {
        db,
        settings,
        oracle,
        surfaces,
        permissions,
    });
    controller.start().await?;
    info!("screenward running; Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    controller.stop().await?;
    Ok(())
}
