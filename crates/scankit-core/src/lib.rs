//! # ScanKit Core
//!
//! Core types, traits, and the event bus for the ScanKit 4DOF
//! photogrammetry scanner. The motion protocol lives in
//! `scankit-motion`, patterns and orchestration in `scankit-scan`.

pub mod error;
pub mod event_bus;
pub mod traits;
pub mod types;

pub use error::{Error, MotionError, Result, ScanError};
pub use event_bus::{EventBus, EventCategory, EventEnvelope, EventFilter, EventPriority, ScannerEvent};
pub use traits::{Camera, CameraSettings, ImageRef, Lighting, MotionDriver};
pub use types::{
    normalize_angle, AxisConfig, AxisKind, FeedMode, FocusSpec, LightingSpec, MachineLimits,
    Position4D, ScanPoint,
};
