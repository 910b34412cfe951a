//! Event type definitions for the event bus.
//!
//! Events are cloneable and serializable so they can be logged, replayed,
//! or forwarded to an external control surface unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Position4D;

/// Delivery priority attached to every published event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventPriority {
    /// Informational, safe to drop under load
    Low,
    /// Normal progress events
    Normal,
    /// Degraded operation, user should be told
    High,
    /// Safety-relevant, must reach every observer
    Critical,
}

/// Event category for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    /// Scan lifecycle events.
    Scan,
    /// Motion and position events.
    Motion,
    /// Homing progress events.
    Homing,
    /// Controller connection events.
    Connection,
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventCategory::Scan => write!(f, "Scan"),
            EventCategory::Motion => write!(f, "Motion"),
            EventCategory::Homing => write!(f, "Homing"),
            EventCategory::Connection => write!(f, "Connection"),
        }
    }
}

/// All events emitted by the scanner core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScannerEvent {
    /// A scan started executing.
    ScanStarted {
        /// Scan identifier.
        scan_id: String,
        /// Number of points in the pattern.
        total_points: usize,
    },
    /// One scan point finished (moved, captured, advanced).
    PointCompleted {
        /// Scan identifier.
        scan_id: String,
        /// Index of the completed point.
        index: usize,
        /// Images captured at this point.
        images: u32,
    },
    /// The scan ran to the end of its pattern.
    ScanCompleted {
        /// Scan identifier.
        scan_id: String,
        /// Total images captured.
        images_captured: u64,
    },
    /// The scan was cancelled by request.
    ScanCancelled {
        /// Scan identifier.
        scan_id: String,
        /// Index the scan stopped at.
        at_index: usize,
    },
    /// The scan paused at a phase boundary (or immediately on feed hold).
    ScanPaused {
        /// Scan identifier.
        scan_id: String,
        /// Index the scan will resume from.
        at_index: usize,
    },
    /// A paused scan resumed.
    ScanResumed {
        /// Scan identifier.
        scan_id: String,
        /// Index execution resumed at.
        at_index: usize,
    },
    /// The scan stopped on an unrecoverable failure.
    ScanFailed {
        /// Scan identifier.
        scan_id: String,
        /// Human-readable failure summary.
        reason: String,
    },
    /// A motion command failed during a scan or jog.
    MotionError {
        /// Failure description.
        message: String,
        /// Target of the failed move, if known.
        target: Option<Position4D>,
    },
    /// The controller entered the Alarm state.
    AlarmDetected {
        /// Alarm code when one was reported.
        code: Option<u8>,
        /// Decoded alarm message.
        message: String,
    },
    /// An informational homing message arrived (per-axis progress).
    HomingProgress {
        /// Progress description, e.g. "axis X homed".
        message: String,
    },
    /// The homing cycle completed successfully.
    HomingCompleted,
    /// The serial link dropped.
    ConnectionLost {
        /// Port that disconnected.
        port: String,
    },
}

impl ScannerEvent {
    /// Get the category of this event
    pub fn category(&self) -> EventCategory {
        match self {
            ScannerEvent::ScanStarted { .. }
            | ScannerEvent::PointCompleted { .. }
            | ScannerEvent::ScanCompleted { .. }
            | ScannerEvent::ScanCancelled { .. }
            | ScannerEvent::ScanPaused { .. }
            | ScannerEvent::ScanResumed { .. }
            | ScannerEvent::ScanFailed { .. } => EventCategory::Scan,
            ScannerEvent::MotionError { .. } | ScannerEvent::AlarmDetected { .. } => {
                EventCategory::Motion
            }
            ScannerEvent::HomingProgress { .. } | ScannerEvent::HomingCompleted => {
                EventCategory::Homing
            }
            ScannerEvent::ConnectionLost { .. } => EventCategory::Connection,
        }
    }

    /// Stable string identifier for external consumers
    pub fn kind(&self) -> &'static str {
        match self {
            ScannerEvent::ScanStarted { .. } => "scan_started",
            ScannerEvent::PointCompleted { .. } => "point_completed",
            ScannerEvent::ScanCompleted { .. } => "scan_completed",
            ScannerEvent::ScanCancelled { .. } => "scan_cancelled",
            ScannerEvent::ScanPaused { .. } => "scan_paused",
            ScannerEvent::ScanResumed { .. } => "scan_resumed",
            ScannerEvent::ScanFailed { .. } => "scan_failed",
            ScannerEvent::MotionError { .. } => "motion_error",
            ScannerEvent::AlarmDetected { .. } => "alarm_detected",
            ScannerEvent::HomingProgress { .. } => "homing_progress",
            ScannerEvent::HomingCompleted => "homing_completed",
            ScannerEvent::ConnectionLost { .. } => "connection_lost",
        }
    }

    /// Default priority for this event kind
    pub fn priority(&self) -> EventPriority {
        match self {
            ScannerEvent::PointCompleted { .. } | ScannerEvent::HomingProgress { .. } => {
                EventPriority::Low
            }
            ScannerEvent::ScanStarted { .. }
            | ScannerEvent::ScanCompleted { .. }
            | ScannerEvent::ScanPaused { .. }
            | ScannerEvent::ScanResumed { .. }
            | ScannerEvent::HomingCompleted => EventPriority::Normal,
            ScannerEvent::ScanCancelled { .. }
            | ScannerEvent::ScanFailed { .. }
            | ScannerEvent::MotionError { .. } => EventPriority::High,
            ScannerEvent::AlarmDetected { .. } | ScannerEvent::ConnectionLost { .. } => {
                EventPriority::Critical
            }
        }
    }
}

/// A published event with its envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// The event payload
    pub event: ScannerEvent,
    /// Component that published the event
    pub source: String,
    /// Publication time
    pub timestamp: DateTime<Utc>,
    /// Delivery priority
    pub priority: EventPriority,
}

impl EventEnvelope {
    /// Wrap an event with its source, stamping time and default priority
    pub fn new(source: impl Into<String>, event: ScannerEvent) -> Self {
        let priority = event.priority();
        Self {
            event,
            source: source.into(),
            timestamp: Utc::now(),
            priority,
        }
    }
}
