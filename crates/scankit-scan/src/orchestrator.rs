//! Scan lifecycle orchestration.
//!
//! Binds motion, capture, and illumination into the per-point execution
//! loop: Moving -> Stabilizing -> Capturing -> Advancing. The execution
//! task owns the [`ScanState`]; observers follow the event bus and the
//! persisted record, never shared mutable state.
//!
//! Failure policy per point:
//! - motion error: one retry at half feedrate, then the point is marked
//!   failed and skipped; two consecutive failed points stop the scan
//! - capture error: recorded, remaining captures at the point skipped,
//!   scan continues (partial image sets are still useful)
//! - lighting error: logged only
//! - transport loss: scan fails, state is preserved for resume

use parking_lot::Mutex;
use scankit_core::traits::{Camera, Lighting, MotionDriver};
use scankit_core::types::{FeedMode, FocusSpec, MachineLimits, ScanPoint};
use scankit_core::{EventBus, MotionError, ScanError, ScannerEvent};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::pattern::ScanPattern;
use crate::state::{ErrorRecord, ScanPhase, ScanState, ScanStatus};

const EVENT_SOURCE: &str = "orchestrator";

/// Orchestrator tuning knobs
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Axis limits patterns are validated against
    pub limits: MachineLimits,
    /// Persist the state record every N completed points
    pub persist_every_points: usize,
    /// Floor applied to per-point dwell
    pub minimum_dwell_ms: u32,
    /// Flash lead time before the shutter
    pub flash_lead_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            limits: MachineLimits::default(),
            persist_every_points: 5,
            minimum_dwell_ms: 100,
            flash_lead_ms: 10,
        }
    }
}

/// Cooperative control flags shared with the execution task
struct Control {
    pause: AtomicBool,
    /// Pause was requested as an emergency: feed hold already issued
    immediate_pause: AtomicBool,
    cancel: AtomicBool,
    running: AtomicBool,
    /// The execution task is inside a motion call
    moving: AtomicBool,
    wake: Notify,
}

impl Control {
    fn new() -> Self {
        Self {
            pause: AtomicBool::new(false),
            immediate_pause: AtomicBool::new(false),
            cancel: AtomicBool::new(false),
            running: AtomicBool::new(false),
            moving: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    fn reset_for_run(&self) {
        self.pause.store(false, Ordering::SeqCst);
        self.immediate_pause.store(false, Ordering::SeqCst);
        self.cancel.store(false, Ordering::SeqCst);
    }
}

/// The scan lifecycle state machine
pub struct ScanOrchestrator {
    motion: Arc<dyn MotionDriver>,
    camera: Arc<dyn Camera>,
    lighting: Option<Arc<dyn Lighting>>,
    events: Arc<EventBus>,
    config: OrchestratorConfig,
    control: Arc<Control>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ScanOrchestrator {
    /// Wire the orchestrator to its hardware boundaries
    pub fn new(
        motion: Arc<dyn MotionDriver>,
        camera: Arc<dyn Camera>,
        lighting: Option<Arc<dyn Lighting>>,
        events: Arc<EventBus>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            motion,
            camera,
            lighting,
            events,
            config,
            control: Arc::new(Control::new()),
            task: Mutex::new(None),
        }
    }

    /// Whether a scan is currently executing
    pub fn is_running(&self) -> bool {
        self.control.running.load(Ordering::SeqCst)
    }

    /// Start a scan: validate, persist the initial record, and spawn the
    /// execution task. Returns the record as of the Running transition.
    pub async fn start(
        &self,
        pattern: ScanPattern,
        output_dir: PathBuf,
        scan_id: Option<String>,
    ) -> Result<ScanState, ScanError> {
        if self.control.running.swap(true, Ordering::SeqCst) {
            return Err(ScanError::AlreadyRunning);
        }
        match self.start_inner(pattern, output_dir, scan_id).await {
            Ok(state) => Ok(state),
            Err(e) => {
                self.control.running.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn start_inner(
        &self,
        pattern: ScanPattern,
        output_dir: PathBuf,
        scan_id: Option<String>,
    ) -> Result<ScanState, ScanError> {
        if pattern.is_empty() {
            return Err(ScanError::EmptyPattern);
        }
        let mut reasons = Vec::new();
        for (index, point) in pattern.points.iter().enumerate() {
            if let Err((axis, value, min, max)) = self.config.limits.check(&point.position) {
                reasons.push(format!(
                    "point {index}: {axis}-axis value {value} outside limits [{min}, {max}]"
                ));
            }
            if !point.focus_consistent() {
                reasons.push(format!(
                    "point {index}: capture_count does not match the focus stack"
                ));
            }
        }
        if !reasons.is_empty() {
            return Err(ScanError::Validation { reasons });
        }

        let mut state = ScanState::new(
            scan_id,
            pattern.id.clone(),
            output_dir,
            pattern.points.len(),
            pattern.parameters.clone(),
        );
        state.set_status(ScanStatus::Initializing);
        state.persist()?;

        if !self.motion.is_homed() {
            state.set_status(ScanStatus::Failed);
            state.errors.push(ErrorRecord::new(
                None,
                "not_homed",
                "motion system must be homed before scanning",
            ));
            state.persist()?;
            return Err(ScanError::NotHomed);
        }

        self.motion.set_feed_mode(FeedMode::Scanning);
        self.control.reset_for_run();

        state.set_status(ScanStatus::Running);
        state.persist()?;
        self.events.publish(
            EVENT_SOURCE,
            ScannerEvent::ScanStarted {
                scan_id: state.scan_id.clone(),
                total_points: state.total_points,
            },
        );

        let snapshot = state.clone();
        self.spawn_execution(state, pattern.points);
        Ok(snapshot)
    }

    /// Resume a persisted scan past its already-completed points.
    ///
    /// A record whose index already reached the end transitions straight
    /// to Completed without touching hardware.
    pub async fn resume_scan(
        &self,
        mut state: ScanState,
        pattern: ScanPattern,
    ) -> Result<ScanState, ScanError> {
        if !state.status.resumable() {
            return Err(ScanError::Validation {
                reasons: vec![format!(
                    "scan in status {:?} cannot be resumed",
                    state.status
                )],
            });
        }
        if pattern.points.len() != state.total_points {
            return Err(ScanError::Validation {
                reasons: vec![format!(
                    "pattern has {} points but the record expects {}",
                    pattern.points.len(),
                    state.total_points
                )],
            });
        }
        if self.control.running.swap(true, Ordering::SeqCst) {
            return Err(ScanError::AlreadyRunning);
        }

        if state.current_index >= state.total_points {
            state.set_status(ScanStatus::Completed);
            state.persist()?;
            self.events.publish(
                EVENT_SOURCE,
                ScannerEvent::ScanCompleted {
                    scan_id: state.scan_id.clone(),
                    images_captured: state.images_captured,
                },
            );
            self.control.running.store(false, Ordering::SeqCst);
            return Ok(state);
        }

        if !self.motion.is_homed() {
            self.control.running.store(false, Ordering::SeqCst);
            return Err(ScanError::NotHomed);
        }

        self.motion.set_feed_mode(FeedMode::Scanning);
        self.control.reset_for_run();

        state.set_status(ScanStatus::Running);
        state.persist()?;
        self.events.publish(
            EVENT_SOURCE,
            ScannerEvent::ScanResumed {
                scan_id: state.scan_id.clone(),
                at_index: state.current_index,
            },
        );

        let snapshot = state.clone();
        self.spawn_execution(state, pattern.points);
        Ok(snapshot)
    }

    /// Request a pause. Cooperative pauses take effect at the next phase
    /// boundary; immediate pauses also issue a feed hold so the current
    /// move stops in place.
    pub async fn pause(&self, immediate: bool) -> Result<(), ScanError> {
        if !self.is_running() {
            return Ok(());
        }
        self.control.pause.store(true, Ordering::SeqCst);
        if immediate {
            self.control.immediate_pause.store(true, Ordering::SeqCst);
            self.motion.feed_hold().await?;
        }
        self.control.wake.notify_one();
        Ok(())
    }

    /// Resume a paused scan
    pub fn resume(&self) {
        self.control.pause.store(false, Ordering::SeqCst);
        self.control.wake.notify_one();
    }

    /// Cancel the scan. A cancel during motion additionally stops the
    /// controller (feed hold + soft reset).
    pub async fn cancel(&self) -> Result<(), ScanError> {
        if !self.is_running() {
            return Ok(());
        }
        self.control.cancel.store(true, Ordering::SeqCst);
        if self.control.moving.load(Ordering::SeqCst) {
            self.motion.emergency_stop().await?;
        }
        self.control.wake.notify_one();
        Ok(())
    }

    /// Wait for the active execution task to finish (test and shutdown
    /// support)
    pub async fn wait(&self) {
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    fn spawn_execution(&self, state: ScanState, points: Vec<ScanPoint>) {
        let exec = Exec {
            motion: self.motion.clone(),
            camera: self.camera.clone(),
            lighting: self.lighting.clone(),
            events: self.events.clone(),
            config: self.config.clone(),
            control: self.control.clone(),
        };
        let handle = tokio::spawn(async move {
            exec.run(state, points).await;
        });
        *self.task.lock() = Some(handle);
    }
}

/// Everything the execution task needs, detached from the orchestrator
struct Exec {
    motion: Arc<dyn MotionDriver>,
    camera: Arc<dyn Camera>,
    lighting: Option<Arc<dyn Lighting>>,
    events: Arc<EventBus>,
    config: OrchestratorConfig,
    control: Arc<Control>,
}

enum Boundary {
    Continue,
    Cancelled,
}

enum MoveOutcome {
    Ok,
    PointFailed,
    PausedMidMove,
    Fatal(MotionError),
}

impl Exec {
    async fn run(self, mut state: ScanState, points: Vec<ScanPoint>) {
        let mut consecutive_motion_failures = 0u32;

        loop {
            match self.boundary(&mut state).await {
                Boundary::Cancelled => {
                    self.finish_cancelled(&mut state);
                    return;
                }
                Boundary::Continue => {}
            }
            if state.current_index >= state.total_points {
                break;
            }

            let index = state.current_index;
            let point = &points[index];

            // Moving
            state.phase = ScanPhase::Moving;
            match self.move_with_retry(point, index, &mut state).await {
                MoveOutcome::Ok => consecutive_motion_failures = 0,
                MoveOutcome::PausedMidMove => continue,
                MoveOutcome::PointFailed => {
                    consecutive_motion_failures += 1;
                    if consecutive_motion_failures >= 2 {
                        self.finish_failed(&mut state, "two consecutive points failed to move");
                        return;
                    }
                    state.current_index += 1;
                    let _ = state.persist();
                    continue;
                }
                MoveOutcome::Fatal(e) => {
                    state
                        .errors
                        .push(ErrorRecord::new(Some(index), "transport", e.to_string()));
                    self.finish_failed(&mut state, &format!("motion system lost: {e}"));
                    return;
                }
            }

            if self.control.cancel.load(Ordering::SeqCst) {
                self.finish_cancelled(&mut state);
                return;
            }

            // Stabilizing
            state.phase = ScanPhase::Stabilizing;
            let dwell = point.dwell_ms.max(self.config.minimum_dwell_ms);
            self.cancellable_sleep(Duration::from_millis(u64::from(dwell)))
                .await;
            if self.control.cancel.load(Ordering::SeqCst) {
                self.finish_cancelled(&mut state);
                return;
            }

            // Capturing
            state.phase = ScanPhase::Capturing;
            let images = self.capture_point(point, index, &mut state).await;

            // Advancing
            state.phase = ScanPhase::Advancing;
            state.current_index += 1;
            state.images_captured += images;
            if self.config.persist_every_points > 0
                && state.current_index % self.config.persist_every_points == 0
            {
                let _ = state.persist();
            }
            self.events.publish(
                EVENT_SOURCE,
                ScannerEvent::PointCompleted {
                    scan_id: state.scan_id.clone(),
                    index,
                    images: images as u32,
                },
            );
        }

        state.set_status(ScanStatus::Completed);
        let _ = state.persist();
        self.events.publish(
            EVENT_SOURCE,
            ScannerEvent::ScanCompleted {
                scan_id: state.scan_id.clone(),
                images_captured: state.images_captured,
            },
        );
        self.motion.set_feed_mode(FeedMode::Manual);
        self.control.running.store(false, Ordering::SeqCst);
        tracing::info!(scan_id = %state.scan_id, "scan completed");
    }

    /// Pause/cancel checkpoint between phases.
    async fn boundary(&self, state: &mut ScanState) -> Boundary {
        if self.control.cancel.load(Ordering::SeqCst) {
            return Boundary::Cancelled;
        }
        if !self.control.pause.load(Ordering::SeqCst) {
            return Boundary::Continue;
        }

        state.set_status(ScanStatus::Paused);
        let _ = state.persist();
        self.events.publish(
            EVENT_SOURCE,
            ScannerEvent::ScanPaused {
                scan_id: state.scan_id.clone(),
                at_index: state.current_index,
            },
        );

        loop {
            // The permit-based notify plus a timeout re-check covers a
            // resume() racing this wait.
            let _ = tokio::time::timeout(
                Duration::from_millis(500),
                self.control.wake.notified(),
            )
            .await;
            if self.control.cancel.load(Ordering::SeqCst) {
                return Boundary::Cancelled;
            }
            if !self.control.pause.load(Ordering::SeqCst) {
                break;
            }
        }

        if self.control.immediate_pause.swap(false, Ordering::SeqCst) {
            // The held move was abandoned; release the hold so the
            // re-issued motion can execute.
            if let Err(e) = self.motion.cycle_resume().await {
                tracing::warn!("cycle resume after pause failed: {e}");
            }
        }

        state.set_status(ScanStatus::Running);
        let _ = state.persist();
        self.events.publish(
            EVENT_SOURCE,
            ScannerEvent::ScanResumed {
                scan_id: state.scan_id.clone(),
                at_index: state.current_index,
            },
        );
        Boundary::Continue
    }

    async fn move_with_retry(
        &self,
        point: &ScanPoint,
        index: usize,
        state: &mut ScanState,
    ) -> MoveOutcome {
        let target = point.position;

        self.control.moving.store(true, Ordering::SeqCst);
        let first = self.motion.move_to(target, None).await;
        self.control.moving.store(false, Ordering::SeqCst);
        let first_err = match first {
            Ok(()) => return MoveOutcome::Ok,
            Err(e) => e,
        };
        if let Some(outcome) = self.classify_move_failure(&first_err) {
            return outcome;
        }

        state.errors.push(ErrorRecord::new(
            Some(index),
            motion_error_kind(&first_err),
            first_err.to_string(),
        ));
        self.events.publish(
            EVENT_SOURCE,
            ScannerEvent::MotionError {
                message: first_err.to_string(),
                target: Some(target),
            },
        );

        // Retry once at half feedrate; slower motion rides through
        // marginal stalls.
        let reduced = match self.motion.current_position().await {
            Ok(current) => self.motion.planned_feedrate(&current, &target) / 2.0,
            Err(_) => return MoveOutcome::Fatal(MotionError::Disconnected),
        };
        tracing::warn!(
            point = index,
            feedrate = reduced,
            "retrying failed move at reduced feedrate"
        );

        self.control.moving.store(true, Ordering::SeqCst);
        let retried = self.motion.move_to(target, Some(reduced)).await;
        self.control.moving.store(false, Ordering::SeqCst);
        match retried {
            Ok(()) => MoveOutcome::Ok,
            Err(e) => {
                if let Some(outcome) = self.classify_move_failure(&e) {
                    return outcome;
                }
                state.errors.push(ErrorRecord::new(
                    Some(index),
                    "point_failed",
                    format!("retry failed: {e}"),
                ));
                self.events.publish(
                    EVENT_SOURCE,
                    ScannerEvent::MotionError {
                        message: e.to_string(),
                        target: Some(target),
                    },
                );
                MoveOutcome::PointFailed
            }
        }
    }

    /// Map move failures that are really control-flow (pause, cancel,
    /// lost transport) to their outcome; None means a retryable failure.
    fn classify_move_failure(&self, error: &MotionError) -> Option<MoveOutcome> {
        if error.is_fatal() {
            return Some(MoveOutcome::Fatal(error.clone()));
        }
        if self.control.cancel.load(Ordering::SeqCst) {
            // The cancel path stopped the controller under this move.
            return Some(MoveOutcome::PausedMidMove);
        }
        if self.control.pause.load(Ordering::SeqCst)
            && self.control.immediate_pause.load(Ordering::SeqCst)
        {
            // Feed hold interrupted the move; not a machine fault.
            return Some(MoveOutcome::PausedMidMove);
        }
        None
    }

    async fn capture_point(&self, point: &ScanPoint, index: usize, state: &mut ScanState) -> u64 {
        let mut images = 0u64;

        match &point.focus {
            Some(FocusSpec::Manual(values)) if values.len() > 1 => {
                // Focus stack: one image per lens position.
                for &value in values {
                    if self.control.cancel.load(Ordering::SeqCst) {
                        break;
                    }
                    if let Err(e) = self
                        .camera
                        .set_focus(FocusSpec::Manual(vec![value]))
                        .await
                    {
                        state.errors.push(ErrorRecord::new(
                            Some(index),
                            "capture",
                            format!("set_focus({value}) failed: {e}"),
                        ));
                        break;
                    }
                    match self.flash_and_capture(point).await {
                        Ok(()) => images += 1,
                        Err(e) => {
                            state.errors.push(ErrorRecord::new(
                                Some(index),
                                "capture",
                                e.to_string(),
                            ));
                            break;
                        }
                    }
                }
            }
            focus => {
                if let Some(focus) = focus {
                    if let Err(e) = self.camera.set_focus(focus.clone()).await {
                        state.errors.push(ErrorRecord::new(
                            Some(index),
                            "capture",
                            format!("set_focus failed: {e}"),
                        ));
                        return images;
                    }
                }
                for _ in 0..point.capture_count {
                    if self.control.cancel.load(Ordering::SeqCst) {
                        break;
                    }
                    match self.flash_and_capture(point).await {
                        Ok(()) => images += 1,
                        Err(e) => {
                            state.errors.push(ErrorRecord::new(
                                Some(index),
                                "capture",
                                e.to_string(),
                            ));
                            break;
                        }
                    }
                }
            }
        }

        images
    }

    /// Fire the flash (when configured) slightly ahead of the shutter so
    /// the zones are lit through the exposure. Lighting failures are
    /// logged, never fatal.
    async fn flash_and_capture(&self, point: &ScanPoint) -> Result<(), ScanError> {
        let flash_task = match (&point.lighting, &self.lighting) {
            (Some(spec), Some(lighting)) => {
                let lighting = lighting.clone();
                let spec = spec.clone();
                Some(tokio::spawn(async move {
                    lighting
                        .flash(&spec.zones, spec.intensity, spec.duration_ms)
                        .await
                }))
            }
            _ => None,
        };

        if flash_task.is_some() {
            tokio::time::sleep(Duration::from_millis(self.config.flash_lead_ms)).await;
        }

        let captured = self.camera.capture().await;

        if let Some(task) = flash_task {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("lighting error (non-fatal): {e}"),
                Err(e) => tracing::warn!("lighting task failed: {e}"),
            }
        }

        captured.map(|image| {
            tracing::debug!("captured {}", image.path.display());
        })
    }

    /// Sleep that a cancel interrupts. Pause wakeups are ignored here;
    /// the pause lands at the next phase boundary with the dwell intact.
    async fn cancellable_sleep(&self, duration: Duration) {
        let cancelled = async {
            loop {
                self.control.wake.notified().await;
                if self.control.cancel.load(Ordering::SeqCst) {
                    break;
                }
            }
        };
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = cancelled => {}
        }
    }

    fn finish_cancelled(&self, state: &mut ScanState) {
        state.set_status(ScanStatus::Cancelled);
        let _ = state.persist();
        self.events.publish(
            EVENT_SOURCE,
            ScannerEvent::ScanCancelled {
                scan_id: state.scan_id.clone(),
                at_index: state.current_index,
            },
        );
        self.motion.set_feed_mode(FeedMode::Manual);
        self.control.running.store(false, Ordering::SeqCst);
        tracing::info!(scan_id = %state.scan_id, "scan cancelled");
    }

    fn finish_failed(&self, state: &mut ScanState, reason: &str) {
        state.set_status(ScanStatus::Failed);
        let _ = state.persist();
        self.events.publish(
            EVENT_SOURCE,
            ScannerEvent::ScanFailed {
                scan_id: state.scan_id.clone(),
                reason: reason.to_string(),
            },
        );
        self.motion.set_feed_mode(FeedMode::Manual);
        self.control.running.store(false, Ordering::SeqCst);
        tracing::error!(scan_id = %state.scan_id, "scan failed: {}", reason);
    }
}

fn motion_error_kind(error: &MotionError) -> &'static str {
    match error {
        MotionError::MotionTimeout { .. } => "motion_timeout",
        MotionError::HomingTimeout { .. } => "homing_timeout",
        MotionError::ProtocolTimeout { .. } => "protocol_timeout",
        MotionError::ControllerAlarm { .. } => "controller_alarm",
        MotionError::ControllerError { .. } => "controller_error",
        MotionError::RequiresHoming => "requires_homing",
        MotionError::InvalidPosition { .. } => "invalid_position",
        MotionError::Transport(_) | MotionError::Disconnected | MotionError::NotConnected => {
            "transport"
        }
    }
}
