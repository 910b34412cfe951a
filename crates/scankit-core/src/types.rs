//! Core data model for the 4DOF scanner.
//!
//! The scanner has two linear axes (X, Y, millimetres), one continuous
//! rotational turntable axis (Z, degrees) and one limited rotational
//! camera-tilt axis (C, degrees). All positions are expressed as
//! [`Position4D`] in machine coordinates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A position on all four axes, in machine coordinates.
///
/// X and Y are millimetres, Z and C are degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position4D {
    /// X axis (camera radius carriage) in mm
    pub x: f64,
    /// Y axis (camera height carriage) in mm
    pub y: f64,
    /// Z axis (turntable rotation) in degrees
    pub z: f64,
    /// C axis (camera tilt) in degrees
    pub c: f64,
}

impl Position4D {
    /// Create a position from explicit axis values
    pub fn new(x: f64, y: f64, z: f64, c: f64) -> Self {
        Self { x, y, z, c }
    }

    /// Euclidean distance on the linear axes only
    pub fn linear_distance(&self, other: &Position4D) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Absolute rotational deltas `(|dz|, |dc|)`, used for motion-time
    /// estimation alongside [`Self::linear_distance`].
    pub fn rotational_deltas(&self, other: &Position4D) -> (f64, f64) {
        ((self.z - other.z).abs(), (self.c - other.c).abs())
    }

    /// Largest per-axis absolute difference to another position
    pub fn max_axis_delta(&self, other: &Position4D) -> f64 {
        (self.x - other.x)
            .abs()
            .max((self.y - other.y).abs())
            .max((self.z - other.z).abs())
            .max((self.c - other.c).abs())
    }
}

impl fmt::Display for Position4D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "X{:.3} Y{:.3} Z{:.3} C{:.3}",
            self.x, self.y, self.z, self.c
        )
    }
}

/// Wrap an angle into the canonical `(-180, 180]` degree range.
///
/// The upper bound is inclusive: 180.0 stays 180.0. Idempotent.
pub fn normalize_angle(degrees: f64) -> f64 {
    let mut value = degrees;
    while value > 180.0 {
        value -= 360.0;
    }
    while value <= -180.0 {
        value += 360.0;
    }
    value
}

/// Behaviour of a single machine axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AxisKind {
    /// Linear travel between hard limits, in mm
    Linear {
        /// Lower soft limit
        min: f64,
        /// Upper soft limit
        max: f64,
        /// Maximum feedrate in mm/min
        max_feedrate: f64,
    },
    /// Rotational travel between hard limits, in degrees
    RotationalLimited {
        /// Lower soft limit
        min: f64,
        /// Upper soft limit
        max: f64,
        /// Maximum feedrate in deg/min
        max_feedrate: f64,
    },
    /// Unbounded rotation; positions wrap modulo 360 and are normalized
    /// into `(-180, 180]` before any limit reasoning
    RotationalContinuous {
        /// Maximum feedrate in deg/min
        max_feedrate: f64,
    },
}

impl AxisKind {
    /// Maximum feedrate for this axis
    pub fn max_feedrate(&self) -> f64 {
        match self {
            AxisKind::Linear { max_feedrate, .. }
            | AxisKind::RotationalLimited { max_feedrate, .. }
            | AxisKind::RotationalContinuous { max_feedrate } => *max_feedrate,
        }
    }

    /// Whether the axis wraps (continuous rotation)
    pub fn is_continuous(&self) -> bool {
        matches!(self, AxisKind::RotationalContinuous { .. })
    }

    /// Range check for a target value. Continuous axes normalize first and
    /// always pass (every angle is reachable).
    pub fn contains(&self, value: f64) -> bool {
        match self {
            AxisKind::Linear { min, max, .. } | AxisKind::RotationalLimited { min, max, .. } => {
                (*min..=*max).contains(&value)
            }
            AxisKind::RotationalContinuous { .. } => {
                let v = normalize_angle(value);
                (-180.0..=180.0).contains(&v)
            }
        }
    }

    /// Soft limits as `(min, max)`; the normalized range for continuous axes
    pub fn limits(&self) -> (f64, f64) {
        match self {
            AxisKind::Linear { min, max, .. } | AxisKind::RotationalLimited { min, max, .. } => {
                (*min, *max)
            }
            AxisKind::RotationalContinuous { .. } => (-180.0, 180.0),
        }
    }
}

/// One configured axis: its kind plus whether homing is required before use.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisConfig {
    /// Kind and limits
    pub kind: AxisKind,
    /// Whether the axis must be homed before motion is trusted
    pub home_required: bool,
}

/// Configured limits for all four axes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MachineLimits {
    /// X axis configuration
    pub x: AxisConfig,
    /// Y axis configuration
    pub y: AxisConfig,
    /// Z axis configuration (always continuous rotational)
    pub z: AxisConfig,
    /// C axis configuration (always limited rotational)
    pub c: AxisConfig,
}

impl Default for MachineLimits {
    fn default() -> Self {
        Self {
            x: AxisConfig {
                kind: AxisKind::Linear {
                    min: 0.0,
                    max: 200.0,
                    max_feedrate: 1000.0,
                },
                home_required: true,
            },
            y: AxisConfig {
                kind: AxisKind::Linear {
                    min: 0.0,
                    max: 200.0,
                    max_feedrate: 1000.0,
                },
                home_required: true,
            },
            z: AxisConfig {
                kind: AxisKind::RotationalContinuous {
                    max_feedrate: 800.0,
                },
                home_required: false,
            },
            c: AxisConfig {
                kind: AxisKind::RotationalLimited {
                    min: -90.0,
                    max: 90.0,
                    max_feedrate: 1800.0,
                },
                home_required: false,
            },
        }
    }
}

impl MachineLimits {
    /// Axis config by lower-case letter
    pub fn axis(&self, axis: char) -> Option<&AxisConfig> {
        match axis.to_ascii_lowercase() {
            'x' => Some(&self.x),
            'y' => Some(&self.y),
            'z' => Some(&self.z),
            'c' => Some(&self.c),
            _ => None,
        }
    }

    /// Iterate `(letter, config, value)` over a position
    pub fn axes_of<'a>(
        &'a self,
        position: &Position4D,
    ) -> impl Iterator<Item = (char, &'a AxisConfig, f64)> {
        [
            ('x', &self.x, position.x),
            ('y', &self.y, position.y),
            ('z', &self.z, position.z),
            ('c', &self.c, position.c),
        ]
        .into_iter()
    }

    /// Check a full position against all axis limits, returning the first
    /// offending axis as `(letter, value, min, max)`.
    pub fn check(&self, position: &Position4D) -> Result<(), (char, f64, f64, f64)> {
        for (letter, config, value) in self.axes_of(position) {
            if !config.kind.contains(value) {
                let (min, max) = config.kind.limits();
                return Err((letter, value, min, max));
            }
        }
        Ok(())
    }
}

/// Focus behaviour for a capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "values", rename_all = "snake_case")]
pub enum FocusSpec {
    /// Leave the lens wherever the camera stack left it
    Default,
    /// One-shot autofocus before the capture
    Auto,
    /// Continuous autofocus while capturing
    Continuous,
    /// Explicit lens positions; more than one selects focus stacking
    Manual(Vec<f32>),
}

impl FocusSpec {
    /// Number of images implied by this focus spec (stack size for
    /// multi-value manual focus, otherwise 1).
    pub fn stack_size(&self) -> usize {
        match self {
            FocusSpec::Manual(values) if values.len() > 1 => values.len(),
            _ => 1,
        }
    }
}

/// A flash request for one capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightingSpec {
    /// LED zones to fire
    pub zones: Vec<String>,
    /// Flash intensity, 0.0..=1.0
    pub intensity: f64,
    /// Flash duration in milliseconds
    pub duration_ms: u32,
}

/// One point of a scan: where to stand and what to capture there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanPoint {
    /// Target machine position
    pub position: Position4D,
    /// Focus behaviour, None = camera default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus: Option<FocusSpec>,
    /// Settle time after motion, before the first capture
    #[serde(default)]
    pub dwell_ms: u32,
    /// Number of images at this point, >= 1
    pub capture_count: u16,
    /// Flash request applied to each capture
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lighting: Option<LightingSpec>,
}

impl ScanPoint {
    /// A point with default capture parameters (one image, no dwell)
    pub fn at(position: Position4D) -> Self {
        Self {
            position,
            focus: None,
            dwell_ms: 0,
            capture_count: 1,
            lighting: None,
        }
    }

    /// Check the `capture_count == stack size` invariant for manual
    /// focus stacks.
    pub fn focus_consistent(&self) -> bool {
        match &self.focus {
            Some(FocusSpec::Manual(values)) if values.len() > 1 => {
                self.capture_count as usize == values.len()
            }
            _ => self.capture_count >= 1,
        }
    }
}

/// Named feedrate profile selected on the motion adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedMode {
    /// Fast rates for interactive jogging
    Manual,
    /// Moderate rates for automated scanning
    Scanning,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn normalize_wraps_into_range() {
        assert_eq!(normalize_angle(270.0), -90.0);
        assert_eq!(normalize_angle(-270.0), 90.0);
        assert_eq!(normalize_angle(180.0), 180.0);
        assert_eq!(normalize_angle(-180.0), 180.0);
        assert_eq!(normalize_angle(0.0), 0.0);
        assert_eq!(normalize_angle(720.0), 0.0);
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(angle in -3600.0f64..3600.0) {
            let once = normalize_angle(angle);
            prop_assert!(once > -180.0 && once <= 180.0);
            prop_assert_eq!(normalize_angle(once), once);
        }
    }

    #[test]
    fn default_limits_accept_home_position() {
        let limits = MachineLimits::default();
        assert!(limits.check(&Position4D::new(0.0, 200.0, 0.0, 0.0)).is_ok());
    }

    #[test]
    fn continuous_axis_accepts_any_angle() {
        let limits = MachineLimits::default();
        assert!(limits.check(&Position4D::new(10.0, 10.0, 719.5, 0.0)).is_ok());
    }

    #[test]
    fn out_of_range_names_the_axis() {
        let limits = MachineLimits::default();
        let err = limits
            .check(&Position4D::new(10.0, 10.0, 0.0, 120.0))
            .unwrap_err();
        assert_eq!(err.0, 'c');
        assert_eq!(err.2, -90.0);
        assert_eq!(err.3, 90.0);
    }

    #[test]
    fn focus_stack_implies_capture_count() {
        let mut point = ScanPoint::at(Position4D::default());
        point.focus = Some(FocusSpec::Manual(vec![5.5, 6.0, 6.5]));
        point.capture_count = 3;
        assert!(point.focus_consistent());
        point.capture_count = 1;
        assert!(!point.focus_consistent());
    }

    #[test]
    fn distance_splits_linear_and_rotational() {
        let a = Position4D::new(0.0, 0.0, 0.0, 0.0);
        let b = Position4D::new(3.0, 4.0, 90.0, -10.0);
        assert_eq!(a.linear_distance(&b), 5.0);
        assert_eq!(a.rotational_deltas(&b), (90.0, 10.0));
    }
}
