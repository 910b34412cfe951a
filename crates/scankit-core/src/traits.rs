//! Hardware boundary traits consumed by the scan orchestrator.
//!
//! Each concern gets its own small trait so concrete hardware (or a test
//! double) only implements what it actually provides: motion, still
//! capture, and flash illumination.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::error::{MotionError, ScanError};
use crate::types::{FeedMode, FocusSpec, Position4D};

/// Axis-aware motion operations the orchestrator drives a scan with.
///
/// Implemented by the FluidNC motion adapter and by simulators in tests.
#[async_trait]
pub trait MotionDriver: Send + Sync {
    /// Move to an absolute machine position. Returns once the controller
    /// has reached the target and settled, not merely accepted the
    /// command.
    async fn move_to(
        &self,
        position: Position4D,
        feedrate: Option<f64>,
    ) -> Result<(), MotionError>;

    /// Current machine position (cached reads permitted up to 100 ms)
    async fn current_position(&self) -> Result<Position4D, MotionError>;

    /// Run the full homing cycle for all axes that require it
    async fn home_all(&self) -> Result<(), MotionError>;

    /// Whether the machine has an established reference position
    fn is_homed(&self) -> bool;

    /// Select the active feedrate profile
    fn set_feed_mode(&self, mode: FeedMode);

    /// Pause motion in place without losing position (`!` feed hold)
    async fn feed_hold(&self) -> Result<(), MotionError>;

    /// Resume motion held by [`Self::feed_hold`] (`~` cycle start)
    async fn cycle_resume(&self) -> Result<(), MotionError>;

    /// Halt immediately and reset the controller; position becomes unknown
    async fn emergency_stop(&self) -> Result<(), MotionError>;

    /// Feedrate the active profile would select for this move; used by
    /// callers that retry a failed move at reduced speed
    fn planned_feedrate(&self, from: &Position4D, to: &Position4D) -> f64;
}

/// Reference to a captured image as reported by the camera stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// Where the image was written
    pub path: PathBuf,
    /// Which physical camera produced it
    pub camera: String,
}

/// Capture settings applied before a scan or point
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CameraSettings {
    /// Exposure time in microseconds, None = auto
    pub exposure_us: Option<u32>,
    /// Sensor gain, None = auto
    pub gain: Option<f32>,
}

/// Still-capture contract.
///
/// `capture` blocks until the image is safely written; multi-camera
/// synchronization is the implementer's concern.
#[async_trait]
pub trait Camera: Send + Sync {
    /// Apply capture settings
    async fn configure(&self, settings: CameraSettings) -> Result<(), ScanError>;

    /// Set the focus behaviour for subsequent captures
    async fn set_focus(&self, focus: FocusSpec) -> Result<(), ScanError>;

    /// Capture one image and return where it landed
    async fn capture(&self) -> Result<ImageRef, ScanError>;
}

/// Flash illumination contract.
///
/// `flash` returns only after the flash is complete; activation latency
/// is at most 10 ms, so firing it immediately before `Camera::capture`
/// keeps the zones lit through the shutter.
#[async_trait]
pub trait Lighting: Send + Sync {
    /// Fire the listed zones at the given intensity for `duration_ms`
    async fn flash(
        &self,
        zones: &[String],
        intensity: f64,
        duration_ms: u32,
    ) -> Result<(), ScanError>;
}
