//! Monitoring core: controller lifecycle, the tick loop, and the per-tick
//! breach decision.

mod controller;
mod evaluator;
mod loop_worker;

pub use controller::{AppUsage, MonitorConfig, MonitorController};
pub use evaluator::{evaluate, SkipReason, TickDecision};
pub use loop_worker::{PERSIST_EVERY_TICKS, POLL_INTERVAL};
