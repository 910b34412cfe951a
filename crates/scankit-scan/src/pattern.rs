//! Scan pattern generators.
//!
//! Both generators produce an ordered, validated point list: X is the
//! outer loop, Y the inner, and within one (x, y) station all turntable
//! rotations execute contiguously so the table sweeps once per station.
//! Station order is plain iteration order; at the 10^2..10^3 points a
//! scan typically has, the controller outruns any cleverer tour.

use scankit_core::types::{
    normalize_angle, FocusSpec, LightingSpec, MachineLimits, Position4D, ScanPoint,
};
use scankit_core::ScanError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Capture parameters applied to every generated point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureDefaults {
    /// Settle time after motion
    pub dwell_ms: u32,
    /// Images per point
    pub capture_count: u16,
    /// Focus behaviour, None = camera default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus: Option<FocusSpec>,
    /// Flash request, None = ambient light
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lighting: Option<LightingSpec>,
}

impl Default for CaptureDefaults {
    fn default() -> Self {
        Self {
            dwell_ms: 100,
            capture_count: 1,
            focus: None,
            lighting: None,
        }
    }
}

/// Grid pattern over axis ranges with discrete rotation steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridParams {
    /// X range (min, max), mm
    pub x_range: (f64, f64),
    /// Y range (min, max), mm
    pub y_range: (f64, f64),
    /// Z range (min, max), degrees
    pub z_range: (f64, f64),
    /// C range (min, max), degrees
    pub c_range: (f64, f64),
    /// X step, mm
    pub x_spacing: f64,
    /// Y step, mm
    pub y_spacing: f64,
    /// Number of discrete Z values across `z_range` (1 = range start)
    pub z_steps: u32,
    /// Number of discrete C values across `c_range` (1 = range start)
    pub c_steps: u32,
    /// Serpentine the Y direction on alternating X columns
    pub zigzag: bool,
    /// Shrink every range inward by this amount on each side
    pub safety_margin: f64,
    /// Per-point capture parameters
    #[serde(default)]
    pub capture: CaptureDefaults,
}

/// Cylindrical pattern: camera radii and heights against explicit
/// turntable rotations and tilt angles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CylindricalParams {
    /// First camera radius, mm
    pub x_start: f64,
    /// Last camera radius, mm
    pub x_end: f64,
    /// Radius step, mm
    pub x_step: f64,
    /// First camera height, mm
    pub y_start: f64,
    /// Last camera height, mm
    pub y_end: f64,
    /// Height step, mm
    pub y_step: f64,
    /// Explicit turntable angles, degrees. A list rather than a range:
    /// unevenly spaced turntable positions are the common case.
    pub z_rotations: Vec<f64>,
    /// Explicit tilt angles, degrees
    pub c_angles: Vec<f64>,
    /// Intended image overlap, percent (recorded for reconstruction)
    pub overlap_pct: f64,
    /// Shrink the X and Y ranges inward by this amount on each side
    pub safety_margin: f64,
    /// Per-point capture parameters
    #[serde(default)]
    pub capture: CaptureDefaults,
}

/// Parameters a pattern was generated from, kept for persistence and
/// resume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PatternParameters {
    /// Grid generator parameters
    Grid(GridParams),
    /// Cylindrical generator parameters
    Cylindrical(CylindricalParams),
    /// Points imported from CSV; no generator parameters exist
    Imported {
        /// Where the points came from, for the scan record
        source: String,
    },
}

/// An ordered, validated point sequence ready to execute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanPattern {
    /// Pattern identifier
    pub id: String,
    /// Ordered points
    pub points: Vec<ScanPoint>,
    /// Generator parameters
    pub parameters: PatternParameters,
    /// Rough execution time estimate
    pub estimated_duration_s: f64,
}

impl ScanPattern {
    /// Wrap externally authored points (CSV import)
    pub fn from_points(points: Vec<ScanPoint>, source: impl Into<String>) -> Self {
        let estimated_duration_s = estimate_duration(&points);
        Self {
            id: Uuid::new_v4().to_string(),
            points,
            parameters: PatternParameters::Imported {
                source: source.into(),
            },
            estimated_duration_s,
        }
    }

    /// Number of points
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the pattern is empty
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Generate a grid pattern: X outer, Y inner (serpentine when zigzag),
/// then Z steps contiguously, then C steps.
pub fn generate_grid(params: &GridParams, limits: &MachineLimits) -> Result<ScanPattern, ScanError> {
    let mut reasons = Vec::new();
    if params.x_spacing <= 0.0 {
        reasons.push(format!("x_spacing must be positive, got {}", params.x_spacing));
    }
    if params.y_spacing <= 0.0 {
        reasons.push(format!("y_spacing must be positive, got {}", params.y_spacing));
    }
    if !reasons.is_empty() {
        return Err(ScanError::Validation { reasons });
    }

    let x_range = shrink(params.x_range, params.safety_margin);
    let y_range = shrink(params.y_range, params.safety_margin);
    let z_range = shrink(params.z_range, params.safety_margin);
    let c_range = shrink(params.c_range, params.safety_margin);

    let x_values = spaced_values(x_range, params.x_spacing);
    let y_values = spaced_values(y_range, params.y_spacing);
    let z_values = stepped_values(z_range, params.z_steps);
    let c_values = stepped_values(c_range, params.c_steps);

    let mut points = Vec::with_capacity(
        x_values.len() * y_values.len() * z_values.len() * c_values.len(),
    );
    for (column, &x) in x_values.iter().enumerate() {
        let serpentine = params.zigzag && column % 2 == 1;
        let ys: Vec<f64> = if serpentine {
            y_values.iter().rev().copied().collect()
        } else {
            y_values.clone()
        };
        for y in ys {
            for &z in &z_values {
                for &c in &c_values {
                    points.push(make_point(
                        Position4D::new(x, y, z, c),
                        &params.capture,
                    ));
                }
            }
        }
    }

    finish_pattern(points, PatternParameters::Grid(params.clone()), limits)
}

/// Generate a cylindrical pattern: camera radii outer, heights next,
/// then the explicit rotation list, then the tilt list.
pub fn generate_cylindrical(
    params: &CylindricalParams,
    limits: &MachineLimits,
) -> Result<ScanPattern, ScanError> {
    let mut reasons = Vec::new();
    if params.x_step <= 0.0 {
        reasons.push(format!("x_step must be positive, got {}", params.x_step));
    }
    if params.y_step <= 0.0 {
        reasons.push(format!("y_step must be positive, got {}", params.y_step));
    }
    if params.z_rotations.is_empty() {
        reasons.push("z_rotations must list at least one angle".to_string());
    }
    if params.c_angles.is_empty() {
        reasons.push("c_angles must list at least one angle".to_string());
    }
    if !(0.0..=95.0).contains(&params.overlap_pct) {
        reasons.push(format!(
            "overlap_pct must be within 0..=95, got {}",
            params.overlap_pct
        ));
    }
    if !reasons.is_empty() {
        return Err(ScanError::Validation { reasons });
    }

    let x_range = shrink((params.x_start, params.x_end), params.safety_margin);
    let y_range = shrink((params.y_start, params.y_end), params.safety_margin);
    let x_values = spaced_values(x_range, params.x_step);
    let y_values = spaced_values(y_range, params.y_step);

    let mut points = Vec::with_capacity(
        x_values.len() * y_values.len() * params.z_rotations.len() * params.c_angles.len(),
    );
    for &x in &x_values {
        for &y in &y_values {
            for &z in &params.z_rotations {
                for &c in &params.c_angles {
                    points.push(make_point(
                        Position4D::new(x, y, z, c),
                        &params.capture,
                    ));
                }
            }
        }
    }

    finish_pattern(points, PatternParameters::Cylindrical(params.clone()), limits)
}

fn make_point(position: Position4D, capture: &CaptureDefaults) -> ScanPoint {
    ScanPoint {
        position,
        focus: capture.focus.clone(),
        dwell_ms: capture.dwell_ms,
        capture_count: capture.capture_count,
        lighting: capture.lighting.clone(),
    }
}

fn finish_pattern(
    points: Vec<ScanPoint>,
    parameters: PatternParameters,
    limits: &MachineLimits,
) -> Result<ScanPattern, ScanError> {
    if points.is_empty() {
        return Err(ScanError::EmptyPattern);
    }

    let mut reasons = Vec::new();
    for (index, point) in points.iter().enumerate() {
        if let Err((axis, value, min, max)) = limits.check(&point.position) {
            reasons.push(format!(
                "point {index}: {axis}-axis value {value} outside limits [{min}, {max}]"
            ));
        }
    }
    if !reasons.is_empty() {
        return Err(ScanError::Validation { reasons });
    }

    let estimated_duration_s = estimate_duration(&points);
    Ok(ScanPattern {
        id: Uuid::new_v4().to_string(),
        points,
        parameters,
        estimated_duration_s,
    })
}

/// Inclusive values from `range.0` stepping by `spacing`
fn spaced_values((start, end): (f64, f64), spacing: f64) -> Vec<f64> {
    let mut values = Vec::new();
    let mut v = start;
    // Tolerate float accumulation at the far end of the range.
    while v <= end + 1e-9 {
        values.push(v.min(end));
        v += spacing;
    }
    values
}

/// `steps` evenly spaced values across the range, endpoints included
fn stepped_values((start, end): (f64, f64), steps: u32) -> Vec<f64> {
    if steps <= 1 || (end - start).abs() < 1e-12 {
        return vec![start];
    }
    (0..steps)
        .map(|i| start + (end - start) * f64::from(i) / f64::from(steps - 1))
        .collect()
}

fn shrink((min, max): (f64, f64), margin: f64) -> (f64, f64) {
    (min + margin, max - margin)
}

/// Rough wall-clock estimate used for UI display and scheduling.
///
/// Assumes the scanning feedrate profile (X/Y 150 mm/min, Z 100 deg/min)
/// plus per-point dwell and roughly half a second per capture.
fn estimate_duration(points: &[ScanPoint]) -> f64 {
    const LINEAR_RATE_MM_PER_S: f64 = 150.0 / 60.0;
    const ROTARY_RATE_DEG_PER_S: f64 = 100.0 / 60.0;
    const SECONDS_PER_CAPTURE: f64 = 0.5;

    let mut total = 0.0;
    let mut previous: Option<&ScanPoint> = None;
    for point in points {
        if let Some(prev) = previous {
            let linear = prev.position.linear_distance(&point.position) / LINEAR_RATE_MM_PER_S;
            let (dz, dc) = prev.position.rotational_deltas(&point.position);
            let dz = normalize_angle(dz).abs();
            let rotary = dz.max(dc) / ROTARY_RATE_DEG_PER_S;
            total += linear.max(rotary);
        }
        total += f64::from(point.dwell_ms) / 1000.0;
        total += f64::from(point.capture_count) * SECONDS_PER_CAPTURE;
        previous = Some(point);
    }
    total
}
