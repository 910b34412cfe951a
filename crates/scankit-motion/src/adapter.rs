//! Axis-typed motion operations over the protocol engine.
//!
//! The adapter knows what the engine does not: which axis is linear,
//! which wraps, what the soft limits are, and which feedrate profile is
//! active. It turns validated 4D targets into G-code lines, optimizing
//! the turntable path to the shortest arc.

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use parking_lot::Mutex;
use scankit_core::traits::MotionDriver;
use scankit_core::types::{normalize_angle, FeedMode, MachineLimits, Position4D};
use scankit_core::MotionError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::protocol::{ProtocolEngine, BYTE_CYCLE_START, BYTE_FEED_HOLD, BYTE_SOFT_RESET};

/// Per-axis feedrates for one named profile (mm/min or deg/min)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisFeedrates {
    /// X axis rate
    pub x: f64,
    /// Y axis rate
    pub y: f64,
    /// Z axis rate
    pub z: f64,
    /// C axis rate
    pub c: f64,
}

/// The two installation feedrate profiles
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeedrateProfiles {
    /// Fast rates for interactive jogging
    pub manual: AxisFeedrates,
    /// Moderate rates for automated scanning
    pub scanning: AxisFeedrates,
}

impl Default for FeedrateProfiles {
    fn default() -> Self {
        Self {
            manual: AxisFeedrates {
                x: 300.0,
                y: 300.0,
                z: 200.0,
                c: 1000.0,
            },
            scanning: AxisFeedrates {
                x: 150.0,
                y: 150.0,
                z: 100.0,
                c: 500.0,
            },
        }
    }
}

impl FeedrateProfiles {
    fn rates(&self, mode: FeedMode) -> &AxisFeedrates {
        match mode {
            FeedMode::Manual => &self.manual,
            FeedMode::Scanning => &self.scanning,
        }
    }
}

/// Pick the turntable command value giving the shortest arc from
/// `current` to `target`.
///
/// Both angles are normalized into `(-180, 180]` first; the returned
/// command equals `target` modulo 360 and differs from the normalized
/// current position by at most 180 degrees. It may lie outside
/// `[-180, 180]`; the controller accepts that on a continuous axis and
/// wraps internally.
pub fn shortest_arc_target(current: f64, target: f64) -> f64 {
    let current = normalize_angle(current);
    let target = normalize_angle(target);

    let direct = target - current;
    let wrap = if direct > 0.0 {
        direct - 360.0
    } else {
        direct + 360.0
    };

    if direct.abs() <= wrap.abs() {
        target
    } else {
        current + wrap
    }
}

struct CachedPosition {
    position: Position4D,
    at: Instant,
}

/// Axis-aware motion API for the 4DOF scanner
pub struct MotionAdapter {
    engine: Arc<ProtocolEngine>,
    limits: MachineLimits,
    profiles: FeedrateProfiles,
    mode: Mutex<FeedMode>,
    cache: ArcSwapOption<CachedPosition>,
    cache_ttl: Duration,
}

impl MotionAdapter {
    /// Wrap a running engine with the installation's limits and profiles
    pub fn new(engine: Arc<ProtocolEngine>, limits: MachineLimits) -> Self {
        Self::with_profiles(engine, limits, FeedrateProfiles::default())
    }

    /// Wrap a running engine with explicit feedrate profiles
    pub fn with_profiles(
        engine: Arc<ProtocolEngine>,
        limits: MachineLimits,
        profiles: FeedrateProfiles,
    ) -> Self {
        Self {
            engine,
            limits,
            profiles,
            mode: Mutex::new(FeedMode::Manual),
            cache: ArcSwapOption::empty(),
            cache_ttl: Duration::from_millis(100),
        }
    }

    /// The configured axis limits
    pub fn limits(&self) -> &MachineLimits {
        &self.limits
    }

    /// The active feedrate mode
    pub fn feed_mode(&self) -> FeedMode {
        *self.mode.lock()
    }

    /// Validate a target against the axis limits
    pub fn validate(&self, position: &Position4D) -> Result<(), MotionError> {
        self.limits
            .check(position)
            .map_err(|(axis, value, min, max)| MotionError::InvalidPosition {
                axis,
                value,
                min,
                max,
            })
    }

    /// Feedrate the active profile would select for this move: the
    /// minimum of the per-axis rates among axes that actually travel.
    pub fn planned_feedrate_between(&self, from: &Position4D, to: &Position4D) -> f64 {
        let rates = self.profiles.rates(self.feed_mode());
        let axes = [
            ((from.x - to.x).abs(), rates.x),
            ((from.y - to.y).abs(), rates.y),
            (
                (normalize_angle(from.z) - normalize_angle(to.z)).abs(),
                rates.z,
            ),
            ((from.c - to.c).abs(), rates.c),
        ];

        let moving_min = axes
            .iter()
            .filter(|(delta, _)| *delta > 1e-9)
            .map(|(_, rate)| *rate)
            .fold(f64::INFINITY, f64::min);

        if moving_min.is_finite() {
            moving_min
        } else {
            // Zero-distance move: any rate works, use the slowest axis.
            axes.iter().map(|(_, rate)| *rate).fold(f64::INFINITY, f64::min)
        }
    }

    /// Current machine position. Reads newer than 100 ms come from the
    /// cache; older reads query the controller for a fresh report.
    pub async fn position(&self) -> Result<Position4D, MotionError> {
        if let Some(cached) = self.cache.load_full() {
            if cached.at.elapsed() < self.cache_ttl {
                return Ok(cached.position);
            }
        }

        let status = self.engine.request_status().await?;
        let mut position = status.mpos;
        position.z = normalize_angle(position.z);
        self.cache.store(Some(Arc::new(CachedPosition {
            position,
            at: Instant::now(),
        })));
        Ok(position)
    }

    /// Drop the cached position so the next read is fresh
    pub fn invalidate_cache(&self) {
        self.cache.store(None);
    }

    /// Move to an absolute target, waiting for true completion.
    ///
    /// The Z component is replaced by its shortest-arc equivalent from
    /// the current position before the command is formatted.
    pub async fn move_absolute(
        &self,
        target: Position4D,
        feedrate: Option<f64>,
    ) -> Result<(), MotionError> {
        self.validate(&target)?;

        let current = self.position().await?;
        let command_z = shortest_arc_target(current.z, target.z);
        if (command_z - target.z).abs() > 1e-9 {
            tracing::debug!(
                "turntable path optimized: {:.3} -> {:.3} (commanded {:.3})",
                current.z,
                target.z,
                command_z
            );
        }

        let feedrate = feedrate.unwrap_or_else(|| self.planned_feedrate_between(&current, &target));
        let line = format!(
            "G1 X{:.3} Y{:.3} Z{:.3} C{:.3} F{:.0}",
            target.x, target.y, command_z, target.c, feedrate
        );

        let result = self.engine.execute_motion(&line).await;
        self.invalidate_cache();
        result
    }

    /// Move by a relative delta with the same Z-arc semantics
    pub async fn move_relative(
        &self,
        delta: Position4D,
        feedrate: Option<f64>,
    ) -> Result<(), MotionError> {
        let current = self.position().await?;
        let target = Position4D::new(
            current.x + delta.x,
            current.y + delta.y,
            normalize_angle(current.z + delta.z),
            current.c + delta.c,
        );
        self.move_absolute(target, feedrate).await
    }

    /// Jog one axis by a signed distance using the `$J=` interface.
    /// Jogs are cancellable with a jog-cancel or reset and do not disturb
    /// the G-code modal state.
    pub async fn jog(&self, axis: char, distance: f64, feedrate: Option<f64>) -> Result<(), MotionError> {
        let axis = axis.to_ascii_uppercase();
        let config = self
            .limits
            .axis(axis.to_ascii_lowercase())
            .ok_or(MotionError::InvalidPosition {
                axis,
                value: distance,
                min: 0.0,
                max: 0.0,
            })?;
        let feedrate = feedrate.unwrap_or_else(|| {
            let rates = self.profiles.rates(self.feed_mode());
            match axis {
                'X' => rates.x,
                'Y' => rates.y,
                'Z' => rates.z,
                _ => rates.c,
            }
            .min(config.kind.max_feedrate())
        });
        let line = format!("$J=G91 {}{:.3} F{:.0}", axis, distance, feedrate);
        let result = self.engine.execute_motion(&line).await;
        self.invalidate_cache();
        result
    }

    /// Run the engine's homing flow and reset cached position knowledge
    pub async fn home(&self) -> Result<(), MotionError> {
        self.invalidate_cache();
        self.engine.home().await
    }

    /// Feed hold (`!`): decelerate and pause in place
    pub fn hold(&self) -> Result<(), MotionError> {
        self.engine.send_immediate(BYTE_FEED_HOLD)
    }

    /// Cycle start (`~`): resume from a feed hold
    pub fn resume(&self) -> Result<(), MotionError> {
        self.engine.send_immediate(BYTE_CYCLE_START)
    }

    /// Feed hold then soft reset. Position knowledge is lost; the
    /// machine must be re-homed before the next scan.
    pub fn stop(&self) -> Result<(), MotionError> {
        self.engine.send_immediate(BYTE_FEED_HOLD)?;
        self.engine.send_immediate(BYTE_SOFT_RESET)?;
        self.invalidate_cache();
        self.engine.mark_position_unknown();
        Ok(())
    }
}

#[async_trait]
impl MotionDriver for MotionAdapter {
    async fn move_to(
        &self,
        position: Position4D,
        feedrate: Option<f64>,
    ) -> Result<(), MotionError> {
        self.move_absolute(position, feedrate).await
    }

    async fn current_position(&self) -> Result<Position4D, MotionError> {
        self.position().await
    }

    async fn home_all(&self) -> Result<(), MotionError> {
        self.home().await
    }

    fn is_homed(&self) -> bool {
        self.engine.is_homed()
    }

    fn set_feed_mode(&self, mode: FeedMode) {
        *self.mode.lock() = mode;
    }

    async fn feed_hold(&self) -> Result<(), MotionError> {
        self.hold()
    }

    async fn cycle_resume(&self) -> Result<(), MotionError> {
        self.resume()
    }

    async fn emergency_stop(&self) -> Result<(), MotionError> {
        self.stop()
    }

    fn planned_feedrate(&self, from: &Position4D, to: &Position4D) -> f64 {
        self.planned_feedrate_between(from, to)
    }
}
