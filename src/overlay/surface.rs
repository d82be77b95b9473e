//! Rendering seam for the blocking overlay.
//!
//! The controller drives a [`OverlaySurface`] and never talks to a window
//! system directly, so the whole block/challenge flow runs under test with
//! a recording fake.

use anyhow::Result;

use crate::challenge::Question;
use crate::overlay::state::OverlayMode;

/// What the surface renders when the block first appears.
#[derive(Debug, Clone)]
pub struct BlockView {
    pub package: String,
    pub app_name: String,
    pub limit_minutes: u32,
    pub mode: OverlayMode,
}

pub trait OverlaySurface: Send {
    fn show(&mut self, view: &BlockView) -> Result<()>;
    fn show_question(&mut self, question: &Question);
    fn show_status(&mut self, message: &str, error: bool);
    fn clear_justification(&mut self);
    fn set_submit_enabled(&mut self, enabled: bool);
    fn remove(&mut self);
}

/// Acquires a surface for a new block. Implementations may fail (e.g. the
/// draw-over-apps permission was revoked), in which case the provider chain
/// falls through to the next option.
pub trait SurfaceProvider: Send + Sync {
    fn acquire(&self) -> Result<Box<dyn OverlaySurface>>;
}

/// Tries providers in order: system overlay first, in-app lock screen as
/// the degraded fallback.
pub struct FallbackSurfaceProvider {
    providers: Vec<Box<dyn SurfaceProvider>>,
}

impl FallbackSurfaceProvider {
    pub fn new(providers: Vec<Box<dyn SurfaceProvider>>) -> Self {
        Self { providers }
    }
}

impl SurfaceProvider for FallbackSurfaceProvider {
    fn acquire(&self) -> Result<Box<dyn OverlaySurface>> {
        let mut last_err = anyhow::anyhow!("no surface providers configured");
        for provider in &self.providers {
            match provider.acquire() {
                Ok(surface) => return Ok(surface),
                Err(err) => {
                    log::warn!("surface provider unavailable, trying next: {err:#}");
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }
}

/// Headless surface that narrates to the log. Stands in where no real
/// window system is wired up.
pub struct LogSurface {
    package: String,
}

impl Default for LogSurface {
    fn default() -> Self {
        Self {
            package: String::new(),
        }
    }
}

impl OverlaySurface for LogSurface {
    fn show(&mut self, view: &BlockView) -> Result<()> {
        self.package = view.package.clone();
        log::info!(
            "overlay up for {} ({}), limit {} min, mode {:?}",
            view.app_name,
            view.package,
            view.limit_minutes,
            view.mode
        );
        Ok(())
    }

    fn show_question(&mut self, question: &Question) {
        log::info!("[{}] question: {}", self.package, question.prompt);
    }

    fn show_status(&mut self, message: &str, error: bool) {
        if error {
            log::warn!("[{}] {message}", self.package);
        } else {
            log::info!("[{}] {message}", self.package);
        }
    }

    fn clear_justification(&mut self) {}

    fn set_submit_enabled(&mut self, enabled: bool) {
        log::debug!("[{}] submit enabled: {enabled}", self.package);
    }

    fn remove(&mut self) {
        log::info!("overlay removed for {}", self.package);
    }
}

pub struct LogSurfaceProvider;

impl SurfaceProvider for LogSurfaceProvider {
    fn acquire(&self) -> Result<Box<dyn OverlaySurface>> {
        Ok(Box::new(LogSurface::default()))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn fallback_provider_skips_failed_providers() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let provider = FallbackSurfaceProvider::new(vec![
            Box::new(RecordingProvider {
                calls: Arc::clone(&calls),
                fail: true,
            }),
            Box::new(RecordingProvider {
                calls: Arc::clone(&calls),
                fail: false,
            }),
        ]);
        assert!(provider.acquire().is_ok());
    }

    #[test]
    fn fallback_provider_errors_when_all_fail() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let provider = FallbackSurfaceProvider::new(vec![Box::new(RecordingProvider {
            calls,
            fail: true,
        })]);
        assert!(provider.acquire().is_err());
    }
}
