//! Blocking overlay: state machine, per-block controller task, and the
//! rendering seam.

mod controller;
pub mod state;
mod surface;

pub use controller::{
    spawn_overlay, BlockRequest, OverlayDeps, OverlayHandle, GRANT_DISPLAY_DELAY,
    LIVENESS_INTERVAL, LIVENESS_STABILITY, SAFETY_TIMEOUT, WRONG_ANSWER_DELAY,
};
pub use state::{DismissCause, OverlayMachine, OverlayMode, OverlayPhase};
pub use surface::{
    BlockView, FallbackSurfaceProvider, LogSurface, LogSurfaceProvider, OverlaySurface,
    SurfaceProvider,
};
