//! Persisted scan execution state.
//!
//! One JSON document per scan lives at `{output_dir}/scan_state.json`.
//! It is rewritten atomically (write to a temp file, then rename) on
//! every status or phase transition and every few points, so a crash or
//! power loss at any moment leaves a loadable record to resume from.

use chrono::{DateTime, Utc};
use scankit_core::ScanError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::pattern::PatternParameters;

/// File name of the persisted record inside the scan output directory
pub const STATE_FILE_NAME: &str = "scan_state.json";

/// Scan lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    /// Created, nothing started
    Idle,
    /// Validating and preparing hardware
    Initializing,
    /// Executing points
    Running,
    /// Halted at a point boundary, resumable
    Paused,
    /// All points executed
    Completed,
    /// Stopped by request
    Cancelled,
    /// Stopped by failure policy
    Failed,
}

impl ScanStatus {
    /// Whether a persisted scan in this status may be resumed
    pub fn resumable(&self) -> bool {
        matches!(
            self,
            ScanStatus::Paused | ScanStatus::Failed | ScanStatus::Cancelled
        )
    }
}

/// Phase within one point while Running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    /// Pre-flight checks and feed-mode switch
    Setup,
    /// Motion to the point
    Moving,
    /// Dwell before capture
    Stabilizing,
    /// Captures in progress
    Capturing,
    /// Bookkeeping and persistence
    Advancing,
}

/// One recorded failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Point the failure belongs to, when point-scoped
    pub point_index: Option<usize>,
    /// Stable failure classification (e.g. "motion_timeout", "capture")
    pub kind: String,
    /// Human-readable description
    pub message: String,
    /// When the failure was recorded
    pub at: DateTime<Utc>,
}

impl ErrorRecord {
    /// Record a failure now
    pub fn new(point_index: Option<usize>, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            point_index,
            kind: kind.into(),
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// Scan timing boundaries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanTiming {
    /// When the scan started
    pub start: DateTime<Utc>,
    /// When the record was last persisted
    pub last_update: DateTime<Utc>,
    /// When the scan reached a terminal status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

/// The complete persisted record of one scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanState {
    /// Scan identifier
    pub scan_id: String,
    /// Pattern identifier
    pub pattern_id: String,
    /// Where images and this record are written
    pub output_dir: PathBuf,
    /// Lifecycle status
    pub status: ScanStatus,
    /// Phase within the current point
    pub phase: ScanPhase,
    /// Total points in the pattern
    pub total_points: usize,
    /// Next point to execute; monotonically non-decreasing while Running
    pub current_index: usize,
    /// Images captured so far
    pub images_captured: u64,
    /// Accumulated failures
    pub errors: Vec<ErrorRecord>,
    /// Timing boundaries
    pub timing: ScanTiming,
    /// Pattern parameters, for reloading on resume
    pub parameters: PatternParameters,
}

impl ScanState {
    /// Fresh record for a scan about to start
    pub fn new(
        scan_id: Option<String>,
        pattern_id: impl Into<String>,
        output_dir: PathBuf,
        total_points: usize,
        parameters: PatternParameters,
    ) -> Self {
        let now = Utc::now();
        Self {
            scan_id: scan_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            pattern_id: pattern_id.into(),
            output_dir,
            status: ScanStatus::Idle,
            phase: ScanPhase::Setup,
            total_points,
            current_index: 0,
            images_captured: 0,
            errors: Vec::new(),
            timing: ScanTiming {
                start: now,
                last_update: now,
                end: None,
            },
            parameters,
        }
    }

    /// Record a status transition (terminal statuses also stamp `end`)
    pub fn set_status(&mut self, status: ScanStatus) {
        self.status = status;
        if matches!(
            status,
            ScanStatus::Completed | ScanStatus::Cancelled | ScanStatus::Failed
        ) {
            self.timing.end = Some(Utc::now());
        }
    }

    /// Persist atomically into `output_dir`.
    pub fn persist(&mut self) -> Result<(), ScanError> {
        self.timing.last_update = Utc::now();
        std::fs::create_dir_all(&self.output_dir)?;

        let path = self.output_dir.join(STATE_FILE_NAME);
        let tmp = self.output_dir.join(format!("{STATE_FILE_NAME}.tmp"));
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;

        tracing::debug!(
            scan_id = %self.scan_id,
            status = ?self.status,
            index = self.current_index,
            "scan state persisted"
        );
        Ok(())
    }

    /// Load a persisted record from a scan output directory
    pub fn load(output_dir: &Path) -> Result<Self, ScanError> {
        let content = std::fs::read_to_string(output_dir.join(STATE_FILE_NAME))?;
        Ok(serde_json::from_str(&content)?)
    }
}
