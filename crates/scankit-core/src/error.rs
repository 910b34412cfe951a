//! Error handling for ScanKit
//!
//! Provides error types for the two layers of the scanner core:
//! - Motion errors (serial transport, controller protocol, motion safety)
//! - Scan errors (validation, orchestration, capture hardware)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Motion layer error type
///
/// Covers the serial transport, the controller protocol dialog, and
/// position safety checks. Variants map one-to-one onto the recovery
/// policies applied by the scan orchestrator.
#[derive(Error, Debug, Clone)]
pub enum MotionError {
    /// Serial transport failed (port closed, write timed out). Fatal to
    /// the protocol engine; requires a reconnect.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The engine is disconnected; pending and new commands fail
    #[error("Controller disconnected")]
    Disconnected,

    /// Engine was never connected
    #[error("Controller not connected")]
    NotConnected,

    /// No ok/error response to a command within the deadline
    #[error("No response to command within {timeout_ms}ms")]
    ProtocolTimeout {
        /// The response deadline in milliseconds.
        timeout_ms: u64,
    },

    /// A motion command was acknowledged but never reached a stable Idle
    #[error("Motion did not complete within {timeout_ms}ms")]
    MotionTimeout {
        /// The completion deadline in milliseconds.
        timeout_ms: u64,
    },

    /// The homing-done marker was never observed
    #[error("Homing did not complete within {timeout_ms}ms")]
    HomingTimeout {
        /// The homing deadline in milliseconds.
        timeout_ms: u64,
    },

    /// Controller raised an alarm in response to a command
    #[error("Controller alarm {code}: {message}")]
    ControllerAlarm {
        /// The alarm code reported by the controller.
        code: u8,
        /// Decoded alarm description.
        message: String,
    },

    /// Controller rejected a command with `error:N`
    #[error("Controller error {code}: {message}")]
    ControllerError {
        /// The error code reported by the controller.
        code: u8,
        /// Decoded error description.
        message: String,
    },

    /// Motion requested while the alarm latch is set
    #[error("Motion blocked: controller requires homing or unlock")]
    RequiresHoming,

    /// Target position violates an axis limit
    #[error("{axis}-axis target {value} outside limits [{min}, {max}]")]
    InvalidPosition {
        /// The offending axis letter.
        axis: char,
        /// The requested value.
        value: f64,
        /// Lower soft limit.
        min: f64,
        /// Upper soft limit.
        max: f64,
    },
}

impl MotionError {
    /// Whether this error leaves the engine unusable until reconnect
    pub fn is_fatal(&self) -> bool {
        matches!(self, MotionError::Transport(_) | MotionError::Disconnected)
    }

    /// Whether this error is a timeout of any flavour
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            MotionError::ProtocolTimeout { .. }
                | MotionError::MotionTimeout { .. }
                | MotionError::HomingTimeout { .. }
        )
    }
}

/// Scan layer error type
///
/// Covers pattern/CSV validation, orchestrator lifecycle violations, and
/// the capture-hardware boundary.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Pattern has no points
    #[error("Scan pattern contains no points")]
    EmptyPattern,

    /// Motion system has not been homed
    #[error("Motion system must be homed before scanning")]
    NotHomed,

    /// A scan is already running on this orchestrator
    #[error("A scan is already in progress")]
    AlreadyRunning,

    /// Input validation failed before any hardware was commanded
    #[error("Validation failed: {reasons:?}")]
    Validation {
        /// One entry per failed check.
        reasons: Vec<String>,
    },

    /// Camera returned a failure; recorded and the scan continues
    #[error("Capture failed: {0}")]
    Capture(String),

    /// Flash returned a failure; logged only
    #[error("Lighting failed: {0}")]
    Lighting(String),

    /// Underlying motion failure
    #[error(transparent)]
    Motion(#[from] MotionError),

    /// Persistence I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted state could not be encoded or decoded
    #[error("State serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Main error type for ScanKit
///
/// A unified error type that can represent any error from all layers.
#[derive(Error, Debug)]
pub enum Error {
    /// Motion layer error
    #[error(transparent)]
    Motion(#[from] MotionError),

    /// Scan layer error
    #[error(transparent)]
    Scan(#[from] ScanError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }
}

/// Result type using [`Error`]
pub type Result<T> = std::result::Result<T, Error>;
