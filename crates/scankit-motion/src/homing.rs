//! User-facing homing state derived from protocol telemetry.
//!
//! UI layers should not have to know that homing completion is a debug
//! message or that an alarm latch blocks motion. This manager watches the
//! engine's event stream and distills it into a small state machine with
//! a message and a recommendation.

use parking_lot::RwLock;
use scankit_core::MotionError;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;

use crate::protocol::{ProtocolEngine, ProtocolEvent};

/// Derived homing state shown to users
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomingState {
    /// No telemetry yet
    Unknown,
    /// No axis on this machine requires homing
    NotRequired,
    /// Homing must run before motion is trusted
    Required,
    /// A homing cycle is executing
    InProgress,
    /// Homing finished and the controller is idle
    Completed,
    /// The last homing attempt failed
    Failed,
}

/// Point-in-time view of the homing subsystem
#[derive(Debug, Clone)]
pub struct HomingSnapshot {
    /// Derived state
    pub state: HomingState,
    /// Human-readable summary
    pub message: String,
    /// What the user should do next, when anything
    pub recommendation: Option<String>,
    /// Axes reported homed so far in the current cycle
    pub axes_homed: Vec<char>,
    /// Seconds since the cycle started, while one is running
    pub elapsed_s: Option<f64>,
}

struct ManagerState {
    state: HomingState,
    message: String,
    recommendation: Option<String>,
    axes_homed: Vec<char>,
    started: Option<Instant>,
}

/// Watches engine telemetry and exposes derived homing state.
pub struct HomingStatusManager {
    engine: Arc<ProtocolEngine>,
    inner: Arc<RwLock<ManagerState>>,
}

impl HomingStatusManager {
    /// Create the manager and start its listener task.
    ///
    /// `homing_required` reflects the machine configuration (any axis
    /// with `home_required`).
    pub fn new(engine: Arc<ProtocolEngine>, homing_required: bool) -> Arc<Self> {
        let initial = if engine.is_homed() {
            HomingState::Completed
        } else if !homing_required {
            HomingState::NotRequired
        } else if engine.is_alarm() {
            HomingState::Required
        } else {
            HomingState::Unknown
        };

        let manager = Arc::new(Self {
            engine: engine.clone(),
            inner: Arc::new(RwLock::new(ManagerState {
                state: initial,
                message: "Waiting for controller telemetry".to_string(),
                recommendation: None,
                axes_homed: Vec::new(),
                started: None,
            })),
        });

        let listener = manager.clone();
        let events = engine.subscribe();
        tokio::spawn(async move {
            listener.listen(events).await;
        });

        manager
    }

    /// Current derived state and messaging
    pub fn snapshot(&self) -> HomingSnapshot {
        let inner = self.inner.read();
        HomingSnapshot {
            state: inner.state,
            message: inner.message.clone(),
            recommendation: inner.recommendation.clone(),
            axes_homed: inner.axes_homed.clone(),
            elapsed_s: inner.started.map(|t| t.elapsed().as_secs_f64()),
        }
    }

    /// Current derived state only
    pub fn state(&self) -> HomingState {
        self.inner.read().state
    }

    /// Run a homing cycle, reporting per-axis progress through the
    /// callback, and translate the result into derived state.
    pub async fn start_homing<F>(&self, progress: F) -> Result<(), MotionError>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        {
            let mut inner = self.inner.write();
            inner.state = HomingState::InProgress;
            inner.message = "Homing cycle running".to_string();
            inner.recommendation = Some("Keep clear of the machine".to_string());
            inner.axes_homed.clear();
            inner.started = Some(Instant::now());
        }
        progress("homing started");

        match self.engine.home().await {
            Ok(()) => {
                let mut inner = self.inner.write();
                inner.state = HomingState::Completed;
                inner.message = "Homing complete, position established".to_string();
                inner.recommendation = None;
                progress("homing complete");
                Ok(())
            }
            Err(e) => {
                let mut inner = self.inner.write();
                inner.state = HomingState::Failed;
                inner.message = format!("Homing failed: {e}");
                inner.recommendation =
                    Some("Check limit switches and axis travel, then retry".to_string());
                progress("homing failed");
                Err(e)
            }
        }
    }

    /// Clear the controller alarm without homing. Position stays
    /// untrusted, so the derived state falls back to Required unless a
    /// previous cycle completed.
    pub async fn manual_unlock(&self) -> Result<(), MotionError> {
        self.engine.clear_alarm().await?;
        let mut inner = self.inner.write();
        if self.engine.is_homed() {
            inner.state = HomingState::Completed;
            inner.message = "Alarm cleared, position still valid".to_string();
            inner.recommendation = None;
        } else {
            inner.state = HomingState::Required;
            inner.message = "Alarm cleared, position unknown".to_string();
            inner.recommendation = Some("Home the machine before scanning".to_string());
        }
        Ok(())
    }

    async fn listen(&self, mut events: broadcast::Receiver<ProtocolEvent>) {
        loop {
            match events.recv().await {
                Ok(ProtocolEvent::AxisHomed(axis)) => {
                    let mut inner = self.inner.write();
                    if !inner.axes_homed.contains(&axis) {
                        inner.axes_homed.push(axis);
                    }
                    inner.message = format!("Axis {axis} homed");
                }
                Ok(ProtocolEvent::HomingDone) => {
                    let mut inner = self.inner.write();
                    if inner.state != HomingState::InProgress {
                        // Externally triggered cycle (e.g. console $H).
                        inner.state = HomingState::Completed;
                        inner.message = "Homing complete".to_string();
                        inner.recommendation = None;
                    }
                }
                Ok(ProtocolEvent::AlarmRaised { message, .. }) => {
                    let mut inner = self.inner.write();
                    if inner.state != HomingState::InProgress {
                        inner.state = HomingState::Required;
                        inner.message = format!("Controller alarm: {message}");
                        inner.recommendation =
                            Some("Home the machine or clear the alarm".to_string());
                    }
                }
                Ok(ProtocolEvent::Disconnected) => {
                    let mut inner = self.inner.write();
                    inner.state = HomingState::Unknown;
                    inner.message = "Controller disconnected".to_string();
                    inner.recommendation = Some("Reconnect and re-home".to_string());
                    break;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("homing status manager lagged {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
