//! Engine and adapter tests against a simulated FluidNC controller.
//!
//! The simulator implements `LineWriter` and answers on the same line
//! channel a real serial link would use: `ok` acknowledgements, scripted
//! status reports for `?`, and the homing message sequence for `$H`.

use parking_lot::Mutex;
use scankit_core::types::{FeedMode, MachineLimits, Position4D};
use scankit_core::{MotionDriver, MotionError};
use scankit_motion::adapter::MotionAdapter;
use scankit_motion::protocol::{ControllerState, EngineConfig, ProtocolEngine};
use scankit_motion::transport::LineWriter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Behaviour switches for the simulated controller
#[derive(Default)]
struct SimState {
    position: Position4D,
    target: Option<Position4D>,
    /// Status polls still answered with `Run` before the move "lands"
    run_reports_left: u32,
    alarm: bool,
    /// Answer motion commands with `error:9` without reporting Alarm
    reject_motion: bool,
    /// Swallow every command without acknowledging
    mute: bool,
    sent_lines: Vec<String>,
    sent_bytes: Vec<u8>,
}

struct SimController {
    line_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    state: Mutex<SimState>,
}

impl SimController {
    fn new(initial: SimState) -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (line_tx, line_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                line_tx: Mutex::new(Some(line_tx)),
                state: Mutex::new(initial),
            }),
            line_rx,
        )
    }

    fn send(&self, line: String) {
        if let Some(tx) = self.line_tx.lock().as_ref() {
            let _ = tx.send(line);
        }
    }

    fn inject(&self, line: &str) {
        self.send(line.to_string());
    }

    /// Simulate the read loop dying: close the line channel.
    fn drop_link(&self) {
        self.line_tx.lock().take();
    }

    fn sent_lines(&self) -> Vec<String> {
        self.state.lock().sent_lines.clone()
    }

    fn status_query_count(&self) -> usize {
        self.state
            .lock()
            .sent_bytes
            .iter()
            .filter(|b| **b == b'?')
            .count()
    }

    fn status_line(state: &SimState) -> String {
        let (name, pos) = if state.alarm {
            ("Alarm", state.position)
        } else if let Some(target) = state.target {
            if state.run_reports_left > 0 {
                // Report a midpoint while "moving".
                let mid = Position4D::new(
                    (state.position.x + target.x) / 2.0,
                    (state.position.y + target.y) / 2.0,
                    (state.position.z + target.z) / 2.0,
                    (state.position.c + target.c) / 2.0,
                );
                ("Run", mid)
            } else {
                ("Idle", target)
            }
        } else {
            ("Idle", state.position)
        };
        format!(
            "<{}|MPos:{:.3},{:.3},{:.3},{:.3}|FS:0,0>",
            name, pos.x, pos.y, pos.z, pos.c
        )
    }

    fn parse_target(line: &str, from: Position4D) -> Position4D {
        let mut target = from;
        for word in line.split_whitespace() {
            let (axis, value) = word.split_at(1);
            if let Ok(value) = value.parse::<f64>() {
                match axis {
                    "X" => target.x = value,
                    "Y" => target.y = value,
                    "Z" => target.z = value,
                    "C" => target.c = value,
                    _ => {}
                }
            }
        }
        target
    }
}

impl LineWriter for SimController {
    fn write_line(&self, line: &str) -> Result<(), MotionError> {
        let mut state = self.state.lock();
        state.sent_lines.push(line.to_string());
        if state.mute {
            return Ok(());
        }

        if line.starts_with("$X") {
            state.alarm = false;
            drop(state);
            self.send("ok".to_string());
        } else if line == "$H" {
            state.alarm = false;
            state.position = Position4D::new(0.0, 200.0, 0.0, 0.0);
            drop(state);
            self.send("ok".to_string());
            self.send("[MSG:Homed:X]".to_string());
            self.send("[MSG:Homed:Y]".to_string());
            self.send("[MSG:DBG: Homing done]".to_string());
        } else if line.starts_with("G1") || line.starts_with("G0") || line.starts_with("$J=") {
            if state.alarm || state.reject_motion {
                drop(state);
                self.send("error:9".to_string());
            } else {
                let from = state.position;
                let body = line.strip_prefix("$J=G91 ").unwrap_or(line);
                let target = Self::parse_target(body, from);
                let moved = target.max_axis_delta(&from) > 1e-9;
                state.target = Some(target);
                state.run_reports_left = if moved { 1 } else { 0 };
                drop(state);
                self.send("ok".to_string());
            }
        } else {
            drop(state);
            self.send("ok".to_string());
        }
        Ok(())
    }

    fn write_byte(&self, byte: u8) -> Result<(), MotionError> {
        let mut state = self.state.lock();
        state.sent_bytes.push(byte);
        if byte == b'?' && !state.mute {
            let line = Self::status_line(&state);
            if let Some(target) = state.target {
                if state.run_reports_left > 0 {
                    state.run_reports_left -= 1;
                } else {
                    state.position = target;
                    state.target = None;
                }
            }
            drop(state);
            self.send(line);
        }
        Ok(())
    }
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        command_timeout: Duration::from_millis(500),
        motion_timeout: Duration::from_secs(2),
        homing_timeout: Duration::from_secs(2),
        status_poll_interval: Duration::from_millis(50),
        completion_poll_interval: Duration::from_millis(10),
        stability_epsilon: 0.001,
        stable_reports: 2,
        zero_motion_grace: Duration::from_millis(100),
        unlock_attempts: 3,
        unlock_retry_delay: Duration::from_millis(10),
        post_homing_settle: Duration::from_millis(10),
    }
}

fn start_engine(sim_state: SimState) -> (Arc<SimController>, Arc<ProtocolEngine>) {
    let (sim, lines) = SimController::new(sim_state);
    let engine = ProtocolEngine::start(sim.clone(), lines, "sim", fast_config());
    (sim, engine)
}

#[tokio::test]
async fn plain_command_acknowledged() {
    let (sim, engine) = start_engine(SimState::default());
    engine.execute("G90").await.expect("ok response");
    assert!(sim.sent_lines().contains(&"G90".to_string()));

    let stats = engine.stats();
    assert_eq!(stats.commands_sent, 1);
    assert_eq!(stats.responses_received, 1);
    assert_eq!(stats.motion_commands, 0);
}

#[tokio::test]
async fn motion_completes_after_run_then_stable_idle() {
    let (_sim, engine) = start_engine(SimState::default());
    let adapter = MotionAdapter::new(engine.clone(), MachineLimits::default());

    adapter
        .move_absolute(Position4D::new(10.0, 20.0, 0.0, 0.0), None)
        .await
        .expect("motion completes");

    let stats = engine.stats();
    assert_eq!(stats.motion_commands, 1);
    assert_eq!(stats.motion_timeouts, 0);

    // The adapter reads a fresh position after the move.
    let position = adapter.position().await.expect("fresh position");
    assert_eq!(position, Position4D::new(10.0, 20.0, 0.0, 0.0));
}

#[tokio::test]
async fn zero_distance_move_completes_via_grace_period() {
    let (_sim, engine) = start_engine(SimState::default());
    let adapter = MotionAdapter::new(engine, MachineLimits::default());

    // Target equals the simulator's current position: the controller
    // never leaves Idle.
    adapter
        .move_absolute(Position4D::default(), None)
        .await
        .expect("zero-distance move succeeds");
}

#[tokio::test]
async fn z_axis_takes_shortest_arc() {
    let (sim, engine) = start_engine(SimState {
        position: Position4D::new(0.0, 0.0, 10.0, 0.0),
        ..Default::default()
    });
    let adapter = MotionAdapter::new(engine, MachineLimits::default());

    adapter
        .move_absolute(Position4D::new(0.0, 0.0, 350.0, 0.0), None)
        .await
        .expect("move completes");

    let motion_line = sim
        .sent_lines()
        .into_iter()
        .find(|l| l.starts_with("G1"))
        .expect("a motion command was sent");
    assert!(
        motion_line.contains("Z-10.000"),
        "expected shortest-arc Z-10.000 in {motion_line}"
    );
}

#[tokio::test]
async fn scanning_mode_selects_moderate_feedrate() {
    let (sim, engine) = start_engine(SimState::default());
    let adapter = MotionAdapter::new(engine, MachineLimits::default());
    adapter.set_feed_mode(FeedMode::Scanning);

    adapter
        .move_absolute(Position4D::new(50.0, 0.0, 0.0, 0.0), None)
        .await
        .expect("move completes");

    let motion_line = sim
        .sent_lines()
        .into_iter()
        .find(|l| l.starts_with("G1"))
        .expect("a motion command was sent");
    assert!(
        motion_line.ends_with("F150"),
        "X-only scanning move should use the X scanning rate: {motion_line}"
    );
}

#[tokio::test]
async fn multi_axis_feedrate_is_minimum_of_moving_axes() {
    let (sim, engine) = start_engine(SimState::default());
    let adapter = MotionAdapter::new(engine, MachineLimits::default());
    adapter.set_feed_mode(FeedMode::Scanning);

    // X and Z move; Z's scanning rate (100) is the slowest involved.
    adapter
        .move_absolute(Position4D::new(50.0, 0.0, 90.0, 0.0), None)
        .await
        .expect("move completes");

    let motion_line = sim
        .sent_lines()
        .into_iter()
        .find(|l| l.starts_with("G1"))
        .expect("a motion command was sent");
    assert!(motion_line.ends_with("F100"), "got {motion_line}");
}

#[tokio::test]
async fn out_of_range_target_is_rejected_before_hardware() {
    let (sim, engine) = start_engine(SimState::default());
    let adapter = MotionAdapter::new(engine, MachineLimits::default());

    let err = adapter
        .move_absolute(Position4D::new(0.0, 0.0, 0.0, 120.0), None)
        .await
        .expect_err("C=120 exceeds the tilt limit");
    match err {
        MotionError::InvalidPosition { axis, value, .. } => {
            assert_eq!(axis, 'c');
            assert_eq!(value, 120.0);
        }
        other => panic!("expected InvalidPosition, got {other:?}"),
    }
    assert!(
        !sim.sent_lines().iter().any(|l| l.starts_with("G1")),
        "no motion command may reach the controller"
    );
}

#[tokio::test]
async fn alarm_state_blocks_motion_with_requires_homing() {
    let (_sim, engine) = start_engine(SimState {
        alarm: true,
        ..Default::default()
    });

    // Let the telemetry task observe the alarm state.
    let status = engine.request_status().await.expect("status");
    assert_eq!(status.state, ControllerState::Alarm);
    assert!(engine.is_alarm());

    let err = engine
        .execute_motion("G1 X10.000 Y0.000 Z0.000 C0.000 F150")
        .await
        .expect_err("alarm latch must block motion");
    assert!(matches!(err, MotionError::RequiresHoming));
}

#[tokio::test]
async fn homing_flow_unlocks_homes_and_clears() {
    let (sim, engine) = start_engine(SimState {
        alarm: true,
        ..Default::default()
    });

    // Observe the alarm so the latch is set, as after power-on.
    let _ = engine.request_status().await.expect("status");
    assert!(engine.is_alarm());

    engine.home().await.expect("homing succeeds");
    assert!(engine.is_homed());
    assert!(!engine.is_alarm());

    let lines = sim.sent_lines();
    let first_unlock = lines.iter().position(|l| l == "$X").expect("$X sent");
    let home = lines.iter().position(|l| l == "$H").expect("$H sent");
    let post_unlock = lines.iter().rposition(|l| l == "$X").expect("post-homing $X");
    assert!(first_unlock < home, "unlock precedes $H");
    assert!(post_unlock > home, "final unlock follows homing completion");
}

#[tokio::test]
async fn unresponsive_controller_times_out() {
    let (_sim, engine) = start_engine(SimState {
        mute: true,
        ..Default::default()
    });

    let err = engine.execute("G90").await.expect_err("no response");
    assert!(matches!(err, MotionError::ProtocolTimeout { .. }));
    assert_eq!(engine.stats().timeouts, 1);
}

#[tokio::test]
async fn dropped_line_stream_disconnects_engine() {
    let (sim, engine) = start_engine(SimState::default());

    sim.drop_link();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!engine.is_connected());
    let err = engine.execute("G90").await.expect_err("disconnected");
    assert!(matches!(err, MotionError::Disconnected));
}

#[tokio::test]
async fn controller_error_response_fails_command_only() {
    let (_sim, engine) = start_engine(SimState {
        reject_motion: true,
        ..Default::default()
    });

    let err = engine
        .execute_motion("G1 X5.000 Y0.000 Z0.000 C0.000 F150")
        .await
        .expect_err("error response");
    match err {
        MotionError::ControllerError { code, .. } => assert_eq!(code, 9),
        other => panic!("expected ControllerError, got {other:?}"),
    }
    // The engine stays operational for further commands.
    engine.execute("$X").await.expect("unlock still works");
}

#[tokio::test]
async fn unsolicited_traffic_reaches_subscribers() {
    let (sim, engine) = start_engine(SimState::default());
    let mut events = engine.subscribe();

    sim.inject("[MSG:INFO: FluidNC v3.7.8]");
    let event = tokio::time::timeout(Duration::from_millis(200), events.recv())
        .await
        .expect("event in time")
        .expect("channel open");
    match event {
        scankit_motion::ProtocolEvent::Info(text) => {
            assert!(text.contains("FluidNC"));
        }
        other => panic!("expected Info event, got {other:?}"),
    }
}

#[tokio::test]
async fn engine_telemetry_is_bridged_to_the_event_bus() {
    use scankit_core::{EventBus, EventFilter};

    let (sim, engine) = start_engine(SimState::default());
    let bus = Arc::new(EventBus::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    bus.subscribe(EventFilter::All, move |envelope| {
        log.lock().push(envelope.event.kind().to_string());
    });
    let _bridge = scankit_motion::forward_protocol_events(&engine, bus, "sim");

    sim.inject("ALARM:1");
    sim.inject("[MSG:Homed:X]");
    sim.inject("[MSG:DBG: Homing done]");
    tokio::time::sleep(Duration::from_millis(100)).await;
    sim.drop_link();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let kinds = seen.lock().clone();
    assert!(kinds.contains(&"alarm_detected".to_string()), "{kinds:?}");
    assert!(kinds.contains(&"homing_progress".to_string()), "{kinds:?}");
    assert!(kinds.contains(&"homing_completed".to_string()), "{kinds:?}");
    assert_eq!(kinds.last().map(String::as_str), Some("connection_lost"));
}

#[tokio::test]
async fn homing_manager_tracks_a_cycle() {
    use scankit_motion::homing::{HomingState, HomingStatusManager};

    let (_sim, engine) = start_engine(SimState {
        alarm: true,
        ..Default::default()
    });
    let _ = engine.request_status().await.expect("status");

    let manager = HomingStatusManager::new(engine.clone(), true);
    let progress = Arc::new(Mutex::new(Vec::new()));
    let log = progress.clone();
    manager
        .start_homing(move |message: &str| {
            log.lock().push(message.to_string());
        })
        .await
        .expect("homing succeeds");

    assert_eq!(manager.state(), HomingState::Completed);
    // Let the listener task drain the per-axis progress events.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let snapshot = manager.snapshot();
    assert!(snapshot.message.contains("complete"));
    assert!(snapshot.axes_homed.contains(&'X'));
    let progress = progress.lock().clone();
    assert_eq!(progress.first().map(String::as_str), Some("homing started"));
    assert_eq!(progress.last().map(String::as_str), Some("homing complete"));
}

#[tokio::test]
async fn position_cache_serves_fresh_reads() {
    // Long poll interval: every `?` on the wire comes from an explicit
    // position request, so the counts below are deterministic.
    let (sim, lines) = SimController::new(SimState {
        position: Position4D::new(1.0, 2.0, 3.0, 4.0),
        ..Default::default()
    });
    let config = EngineConfig {
        status_poll_interval: Duration::from_secs(30),
        ..fast_config()
    };
    let engine = ProtocolEngine::start(sim.clone(), lines, "sim", config);
    let adapter = MotionAdapter::new(engine, MachineLimits::default());

    // Let the telemetry task's startup keep-alive land first.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let first = adapter.position().await.expect("first read");
    let queries_after_first = sim.status_query_count();

    // Immediately repeated read must come from the cache.
    let second = adapter.position().await.expect("cached read");
    let queries_after_second = sim.status_query_count();

    assert_eq!(first, second);
    assert_eq!(
        queries_after_first, queries_after_second,
        "cached read must not query the controller"
    );
}
