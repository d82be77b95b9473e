//! screenward: an application-usage governor.
//!
//! Watches which app is in the foreground, accumulates per-app daily usage
//! against configured limits, and raises a blocking overlay on breach. The
//! overlay can pose a question challenge whose correct answer plus a
//! validated justification earns a bounded time extension.

pub mod challenge;
pub mod db;
pub mod detector;
pub mod events;
pub mod limits;
pub mod monitor;
pub mod oracle;
pub mod overlay;
pub mod permissions;
pub mod settings;
pub mod state;
pub mod usage;

pub use db::Database;
pub use events::{EventBus, GovernorEvent};
pub use monitor::{MonitorConfig, MonitorController};
pub use settings::SettingsStore;
