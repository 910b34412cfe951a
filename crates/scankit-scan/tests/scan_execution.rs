//! Orchestrator lifecycle tests against mock motion, camera, and
//! lighting implementations.

use async_trait::async_trait;
use parking_lot::Mutex;
use scankit_core::traits::{Camera, CameraSettings, ImageRef, Lighting, MotionDriver};
use scankit_core::types::{
    FeedMode, FocusSpec, LightingSpec, MachineLimits, Position4D, ScanPoint,
};
use scankit_core::{EventBus, MotionError, ScanError};
use scankit_scan::orchestrator::{OrchestratorConfig, ScanOrchestrator};
use scankit_scan::pattern::ScanPattern;
use scankit_scan::state::{ScanState, ScanStatus};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Scripted outcome for one `move_to` call
#[derive(Debug, Clone, Copy)]
enum MoveBehavior {
    Ok,
    FailTimeout,
    FailDisconnect,
}

struct MockMotion {
    position: Mutex<Position4D>,
    homed: AtomicBool,
    mode: Mutex<FeedMode>,
    script: Mutex<VecDeque<MoveBehavior>>,
    /// Recorded `(target, feedrate)` per call
    calls: Mutex<Vec<(Position4D, Option<f64>)>>,
    emergency_stops: AtomicUsize,
    move_delay: Duration,
}

impl MockMotion {
    fn homed() -> Arc<Self> {
        Arc::new(Self {
            position: Mutex::new(Position4D::default()),
            homed: AtomicBool::new(true),
            mode: Mutex::new(FeedMode::Manual),
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            emergency_stops: AtomicUsize::new(0),
            move_delay: Duration::from_millis(5),
        })
    }

    fn script(self: &Arc<Self>, behaviors: &[MoveBehavior]) {
        self.script.lock().extend(behaviors.iter().copied());
    }

    fn feedrates_used(&self) -> Vec<Option<f64>> {
        self.calls.lock().iter().map(|(_, f)| *f).collect()
    }
}

#[async_trait]
impl MotionDriver for MockMotion {
    async fn move_to(
        &self,
        position: Position4D,
        feedrate: Option<f64>,
    ) -> Result<(), MotionError> {
        self.calls.lock().push((position, feedrate));
        tokio::time::sleep(self.move_delay).await;
        let behavior = self.script.lock().pop_front().unwrap_or(MoveBehavior::Ok);
        match behavior {
            MoveBehavior::Ok => {
                *self.position.lock() = position;
                Ok(())
            }
            MoveBehavior::FailTimeout => Err(MotionError::MotionTimeout { timeout_ms: 30_000 }),
            MoveBehavior::FailDisconnect => Err(MotionError::Disconnected),
        }
    }

    async fn current_position(&self) -> Result<Position4D, MotionError> {
        Ok(*self.position.lock())
    }

    async fn home_all(&self) -> Result<(), MotionError> {
        self.homed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_homed(&self) -> bool {
        self.homed.load(Ordering::SeqCst)
    }

    fn set_feed_mode(&self, mode: FeedMode) {
        *self.mode.lock() = mode;
    }

    async fn feed_hold(&self) -> Result<(), MotionError> {
        Ok(())
    }

    async fn cycle_resume(&self) -> Result<(), MotionError> {
        Ok(())
    }

    async fn emergency_stop(&self) -> Result<(), MotionError> {
        self.emergency_stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn planned_feedrate(&self, _from: &Position4D, _to: &Position4D) -> f64 {
        150.0
    }
}

struct MockCamera {
    captures: AtomicUsize,
    capture_failures: Mutex<VecDeque<usize>>,
    focus_history: Mutex<Vec<FocusSpec>>,
    capture_started: Option<mpsc::UnboundedSender<usize>>,
    capture_delay: Duration,
}

impl MockCamera {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            captures: AtomicUsize::new(0),
            capture_failures: Mutex::new(VecDeque::new()),
            focus_history: Mutex::new(Vec::new()),
            capture_started: None,
            capture_delay: Duration::from_millis(1),
        })
    }

    /// Camera that reports each capture start on a channel
    fn with_start_signal() -> (Arc<Self>, mpsc::UnboundedReceiver<usize>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                captures: AtomicUsize::new(0),
                capture_failures: Mutex::new(VecDeque::new()),
                focus_history: Mutex::new(Vec::new()),
                capture_started: Some(tx),
                capture_delay: Duration::from_millis(20),
            }),
            rx,
        )
    }

    /// Fail the Nth capture (0-based)
    fn fail_capture(self: &Arc<Self>, nth: usize) {
        self.capture_failures.lock().push_back(nth);
    }

    fn capture_count(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Camera for MockCamera {
    async fn configure(&self, _settings: CameraSettings) -> Result<(), ScanError> {
        Ok(())
    }

    async fn set_focus(&self, focus: FocusSpec) -> Result<(), ScanError> {
        self.focus_history.lock().push(focus);
        Ok(())
    }

    async fn capture(&self) -> Result<ImageRef, ScanError> {
        let n = self.captures.fetch_add(1, Ordering::SeqCst);
        if let Some(tx) = &self.capture_started {
            let _ = tx.send(n);
        }
        tokio::time::sleep(self.capture_delay).await;
        if self.capture_failures.lock().front() == Some(&n) {
            self.capture_failures.lock().pop_front();
            return Err(ScanError::Capture("sensor readout failed".to_string()));
        }
        Ok(ImageRef {
            path: PathBuf::from(format!("/tmp/scan/img_{n:04}.jpg")),
            camera: "cam0".to_string(),
        })
    }
}

struct MockLighting {
    flashes: AtomicUsize,
    fail: AtomicBool,
}

impl MockLighting {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            flashes: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Lighting for MockLighting {
    async fn flash(
        &self,
        _zones: &[String],
        _intensity: f64,
        duration_ms: u32,
    ) -> Result<(), ScanError> {
        self.flashes.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(u64::from(duration_ms))).await;
        if self.fail.load(Ordering::SeqCst) {
            return Err(ScanError::Lighting("driver fault".to_string()));
        }
        Ok(())
    }
}

fn simple_points(count: usize) -> Vec<ScanPoint> {
    (0..count)
        .map(|i| {
            let mut point = ScanPoint::at(Position4D::new(10.0 * i as f64, 50.0, 0.0, 0.0));
            point.dwell_ms = 1;
            point
        })
        .collect()
}

fn pattern_of(points: Vec<ScanPoint>) -> ScanPattern {
    ScanPattern::from_points(points, "test")
}

fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        limits: MachineLimits::default(),
        persist_every_points: 2,
        minimum_dwell_ms: 1,
        flash_lead_ms: 1,
    }
}

struct Harness {
    motion: Arc<MockMotion>,
    camera: Arc<MockCamera>,
    lighting: Arc<MockLighting>,
    events: Arc<EventBus>,
    event_log: Arc<Mutex<Vec<String>>>,
    orchestrator: ScanOrchestrator,
    dir: tempfile::TempDir,
}

fn harness_with(motion: Arc<MockMotion>, camera: Arc<MockCamera>) -> Harness {
    let lighting = MockLighting::new();
    let events = Arc::new(EventBus::new());
    let event_log = Arc::new(Mutex::new(Vec::new()));
    let log = event_log.clone();
    events.subscribe(scankit_core::EventFilter::All, move |envelope| {
        log.lock().push(envelope.event.kind().to_string());
    });
    let orchestrator = ScanOrchestrator::new(
        motion.clone(),
        camera.clone(),
        Some(lighting.clone()),
        events.clone(),
        fast_config(),
    );
    Harness {
        motion,
        camera,
        lighting,
        events,
        event_log,
        orchestrator,
        dir: tempfile::tempdir().expect("tempdir"),
    }
}

fn harness() -> Harness {
    harness_with(MockMotion::homed(), MockCamera::new())
}

#[tokio::test]
async fn scan_runs_to_completion() {
    let h = harness();
    let mut points = simple_points(3);
    points[1].capture_count = 2;
    points[2].focus = Some(FocusSpec::Manual(vec![5.5, 6.0, 6.5]));
    points[2].capture_count = 3;
    points[2].lighting = Some(LightingSpec {
        zones: vec!["ring".to_string()],
        intensity: 0.8,
        duration_ms: 5,
    });

    let initial = h
        .orchestrator
        .start(pattern_of(points), h.dir.path().to_path_buf(), None)
        .await
        .expect("start");
    assert_eq!(initial.status, ScanStatus::Running);
    h.orchestrator.wait().await;

    let persisted = ScanState::load(h.dir.path()).expect("load");
    assert_eq!(persisted.status, ScanStatus::Completed);
    assert_eq!(persisted.current_index, 3);
    assert_eq!(persisted.images_captured, 1 + 2 + 3);
    assert!(persisted.timing.end.is_some());
    assert_eq!(h.camera.capture_count(), 6);
    // Flash fired once per capture at the lit point.
    assert_eq!(h.lighting.flashes.load(Ordering::SeqCst), 3);
    assert_eq!(*h.motion.mode.lock(), FeedMode::Manual);

    let log = h.event_log.lock().clone();
    assert_eq!(log.first().map(String::as_str), Some("scan_started"));
    assert_eq!(log.iter().filter(|e| *e == "point_completed").count(), 3);
    assert_eq!(log.last().map(String::as_str), Some("scan_completed"));
}

#[tokio::test]
async fn focus_stack_sets_each_lens_position() {
    let h = harness();
    let mut points = simple_points(1);
    points[0].focus = Some(FocusSpec::Manual(vec![4.0, 5.0]));
    points[0].capture_count = 2;

    h.orchestrator
        .start(pattern_of(points), h.dir.path().to_path_buf(), None)
        .await
        .expect("start");
    h.orchestrator.wait().await;

    let focus = h.camera.focus_history.lock().clone();
    assert_eq!(
        focus,
        vec![
            FocusSpec::Manual(vec![4.0]),
            FocusSpec::Manual(vec![5.0]),
        ]
    );
}

#[tokio::test]
async fn failed_move_retries_once_at_half_feedrate() {
    let motion = MockMotion::homed();
    motion.script(&[MoveBehavior::FailTimeout, MoveBehavior::Ok]);
    let h = harness_with(motion, MockCamera::new());

    h.orchestrator
        .start(pattern_of(simple_points(2)), h.dir.path().to_path_buf(), None)
        .await
        .expect("start");
    h.orchestrator.wait().await;

    let persisted = ScanState::load(h.dir.path()).expect("load");
    assert_eq!(persisted.status, ScanStatus::Completed);
    assert_eq!(persisted.errors.len(), 1);
    assert_eq!(persisted.errors[0].kind, "motion_timeout");

    // First attempt used the profile (None); the retry halved the
    // planned feedrate of 150.
    let feedrates = h.motion.feedrates_used();
    assert_eq!(feedrates[0], None);
    assert_eq!(feedrates[1], Some(75.0));
}

#[tokio::test]
async fn point_failing_twice_is_skipped() {
    let motion = MockMotion::homed();
    // Point 0 fails both attempts; points 1 and 2 move normally.
    motion.script(&[MoveBehavior::FailTimeout, MoveBehavior::FailTimeout]);
    let h = harness_with(motion, MockCamera::new());

    h.orchestrator
        .start(pattern_of(simple_points(3)), h.dir.path().to_path_buf(), None)
        .await
        .expect("start");
    h.orchestrator.wait().await;

    let persisted = ScanState::load(h.dir.path()).expect("load");
    assert_eq!(persisted.status, ScanStatus::Completed);
    assert_eq!(persisted.current_index, 3);
    // Two images captured (points 1, 2); point 0 produced none.
    assert_eq!(persisted.images_captured, 2);
    assert!(persisted
        .errors
        .iter()
        .any(|e| e.point_index == Some(0) && e.kind == "point_failed"));
}

#[tokio::test]
async fn two_consecutive_failed_points_stop_the_scan() {
    let motion = MockMotion::homed();
    motion.script(&[
        MoveBehavior::FailTimeout,
        MoveBehavior::FailTimeout, // point 0 fails
        MoveBehavior::FailTimeout,
        MoveBehavior::FailTimeout, // point 1 fails
    ]);
    let h = harness_with(motion, MockCamera::new());

    h.orchestrator
        .start(pattern_of(simple_points(4)), h.dir.path().to_path_buf(), None)
        .await
        .expect("start");
    h.orchestrator.wait().await;

    let persisted = ScanState::load(h.dir.path()).expect("load");
    assert_eq!(persisted.status, ScanStatus::Failed);
    assert!(h.event_log.lock().iter().any(|e| e == "scan_failed"));
    assert_eq!(h.camera.capture_count(), 0);
}

#[tokio::test]
async fn capture_error_is_recorded_and_scan_continues() {
    let camera = MockCamera::new();
    camera.fail_capture(0);
    let h = harness_with(MockMotion::homed(), camera);

    h.orchestrator
        .start(pattern_of(simple_points(3)), h.dir.path().to_path_buf(), None)
        .await
        .expect("start");
    h.orchestrator.wait().await;

    let persisted = ScanState::load(h.dir.path()).expect("load");
    assert_eq!(persisted.status, ScanStatus::Completed);
    assert_eq!(persisted.images_captured, 2);
    assert!(persisted
        .errors
        .iter()
        .any(|e| e.point_index == Some(0) && e.kind == "capture"));
}

#[tokio::test]
async fn disconnect_fails_scan_and_preserves_resumable_state() {
    let motion = MockMotion::homed();
    motion.script(&[MoveBehavior::Ok, MoveBehavior::FailDisconnect]);
    let h = harness_with(motion, MockCamera::new());

    let pattern = pattern_of(simple_points(3));
    h.orchestrator
        .start(pattern.clone(), h.dir.path().to_path_buf(), None)
        .await
        .expect("start");
    h.orchestrator.wait().await;

    let persisted = ScanState::load(h.dir.path()).expect("load");
    assert_eq!(persisted.status, ScanStatus::Failed);
    assert!(persisted.status.resumable());
    assert_eq!(persisted.current_index, 1, "first point completed");

    // Resume after "reconnecting": remaining points execute.
    let resumed = h
        .orchestrator
        .resume_scan(persisted, pattern)
        .await
        .expect("resume");
    assert_eq!(resumed.current_index, 1);
    h.orchestrator.wait().await;

    let final_state = ScanState::load(h.dir.path()).expect("load");
    assert_eq!(final_state.status, ScanStatus::Completed);
    assert_eq!(final_state.current_index, 3);
}

#[tokio::test]
async fn pause_takes_effect_at_point_boundary() {
    let (camera, mut capture_started) = MockCamera::with_start_signal();
    let h = harness_with(MockMotion::homed(), camera);
    let mut points = simple_points(3);
    points[0].focus = Some(FocusSpec::Manual(vec![4.0, 5.0, 6.0]));
    points[0].capture_count = 3;

    let mut bus_events = h.events.receiver();
    h.orchestrator
        .start(pattern_of(points), h.dir.path().to_path_buf(), None)
        .await
        .expect("start");

    // Pause while the first image of the stack is being captured.
    let first = capture_started.recv().await.expect("capture started");
    assert_eq!(first, 0);
    h.orchestrator.pause(false).await.expect("pause");

    // The point finishes its whole stack before the pause lands.
    let paused_at = loop {
        let envelope = bus_events.recv().await.expect("event");
        match envelope.event {
            scankit_core::ScannerEvent::ScanPaused { at_index, .. } => break at_index,
            _ => continue,
        }
    };
    assert_eq!(paused_at, 1, "pause lands after the in-flight point");
    assert_eq!(h.camera.capture_count(), 3, "stack completed before pausing");

    h.orchestrator.resume();
    h.orchestrator.wait().await;

    let persisted = ScanState::load(h.dir.path()).expect("load");
    assert_eq!(persisted.status, ScanStatus::Completed);
    assert_eq!(persisted.images_captured, 5);
    let log = h.event_log.lock().clone();
    assert!(log.iter().any(|e| e == "scan_paused"));
    assert!(log.iter().any(|e| e == "scan_resumed"));
}

#[tokio::test]
async fn cancel_stops_the_scan() {
    let (camera, mut capture_started) = MockCamera::with_start_signal();
    let h = harness_with(MockMotion::homed(), camera);

    h.orchestrator
        .start(pattern_of(simple_points(5)), h.dir.path().to_path_buf(), None)
        .await
        .expect("start");

    let _ = capture_started.recv().await.expect("first capture");
    h.orchestrator.cancel().await.expect("cancel");
    h.orchestrator.wait().await;

    let persisted = ScanState::load(h.dir.path()).expect("load");
    assert_eq!(persisted.status, ScanStatus::Cancelled);
    assert!(persisted.current_index < 5);
    assert!(h.event_log.lock().iter().any(|e| e == "scan_cancelled"));
}

#[tokio::test]
async fn resume_at_end_goes_straight_to_completed() {
    let h = harness();
    let pattern = pattern_of(simple_points(2));
    let mut state = ScanState::new(
        None,
        pattern.id.clone(),
        h.dir.path().to_path_buf(),
        2,
        pattern.parameters.clone(),
    );
    state.current_index = 2;
    state.set_status(ScanStatus::Paused);
    state.persist().expect("persist");

    let resumed = h
        .orchestrator
        .resume_scan(state, pattern)
        .await
        .expect("resume");
    assert_eq!(resumed.status, ScanStatus::Completed);
    assert!(h.motion.calls.lock().is_empty(), "no motion was commanded");
    assert!(h.event_log.lock().iter().any(|e| e == "scan_completed"));
}

#[tokio::test]
async fn unhomed_machine_is_rejected() {
    let motion = MockMotion::homed();
    motion.homed.store(false, Ordering::SeqCst);
    let h = harness_with(motion, MockCamera::new());

    let err = h
        .orchestrator
        .start(pattern_of(simple_points(1)), h.dir.path().to_path_buf(), None)
        .await
        .expect_err("must reject");
    assert!(matches!(err, ScanError::NotHomed));
    assert!(!h.orchestrator.is_running());
}

#[tokio::test]
async fn empty_pattern_is_rejected() {
    let h = harness();
    let err = h
        .orchestrator
        .start(
            ScanPattern::from_points(Vec::new(), "empty"),
            h.dir.path().to_path_buf(),
            None,
        )
        .await
        .expect_err("must reject");
    assert!(matches!(err, ScanError::EmptyPattern));
    assert!(!h.orchestrator.is_running());
}

#[tokio::test]
async fn out_of_limit_point_is_rejected_before_start() {
    let h = harness();
    let mut points = simple_points(2);
    points[1].position.c = 150.0;

    let err = h
        .orchestrator
        .start(pattern_of(points), h.dir.path().to_path_buf(), None)
        .await
        .expect_err("must reject");
    match err {
        ScanError::Validation { reasons } => {
            assert!(reasons.iter().any(|r| r.contains("c-axis")), "{reasons:?}");
        }
        other => panic!("expected Validation, got {other:?}"),
    }
    assert!(h.motion.calls.lock().is_empty());
}
