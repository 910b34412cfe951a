//! FluidNC protocol engine.
//!
//! Maintains the single logical dialog with the controller. Two
//! cooperating tasks share the transport's line stream:
//!
//! - the **telemetry task** consumes every incoming line: status reports
//!   land in a lock-free latest-status slot, command acknowledgements are
//!   routed to the command task, and info/alarm/homing traffic is
//!   published to subscribers. It also emits the 2 Hz `?` keep-alive.
//! - the **command task** serves queued command requests one at a time,
//!   pairing each write with its `ok`/`error` acknowledgement and, for
//!   motion commands, running the completion phase until the machine is
//!   demonstrably idle and stationary.
//!
//! Command acknowledgement is not motion completion: the controller ACKs
//! a `G0` the moment it enters the planner. Completion is declared only
//! once the state has passed through Run/Jog/Home (or the zero-distance
//! grace period expired without ever leaving Idle), the state is back to
//! Idle, and consecutive status reports agree on position within the
//! stability epsilon.

use arc_swap::ArcSwapOption;
use scankit_core::types::Position4D;
use scankit_core::MotionError;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot};

use super::decoder::{decode_alarm, decode_error};
use super::parser::{parse_line, ControllerState, FluidNCStatus, ParsedLine};
use crate::transport::LineWriter;

/// Immediate-control byte: status query
pub const BYTE_STATUS_QUERY: u8 = b'?';
/// Immediate-control byte: feed hold
pub const BYTE_FEED_HOLD: u8 = b'!';
/// Immediate-control byte: cycle start / resume
pub const BYTE_CYCLE_START: u8 = b'~';
/// Immediate-control byte: soft reset (Ctrl-X)
pub const BYTE_SOFT_RESET: u8 = 0x18;

/// Tunable timeouts and thresholds for the protocol dialog
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Deadline for the ok/error acknowledgement of any command
    pub command_timeout: Duration,
    /// Deadline for the motion completion phase of non-homing commands
    pub motion_timeout: Duration,
    /// Deadline for the homing-done marker after `$H`
    pub homing_timeout: Duration,
    /// Keep-alive `?` period driven by the telemetry task
    pub status_poll_interval: Duration,
    /// `?` period while a motion completion phase is active
    pub completion_poll_interval: Duration,
    /// Per-axis position delta treated as "not moving"
    pub stability_epsilon: f64,
    /// Consecutive agreeing status reports required to declare stillness
    pub stable_reports: u32,
    /// How long a command may stay in Idle before a zero-distance move is
    /// considered complete
    pub zero_motion_grace: Duration,
    /// `$X` attempts before homing
    pub unlock_attempts: u32,
    /// Spacing between unlock attempts
    pub unlock_retry_delay: Duration,
    /// Settle time between the homing-done marker and the final `$X`
    pub post_homing_settle: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(10),
            motion_timeout: Duration::from_secs(30),
            homing_timeout: Duration::from_secs(120),
            status_poll_interval: Duration::from_millis(500),
            completion_poll_interval: Duration::from_millis(150),
            stability_epsilon: 0.001,
            stable_reports: 2,
            zero_motion_grace: Duration::from_millis(500),
            unlock_attempts: 3,
            unlock_retry_delay: Duration::from_millis(500),
            post_homing_settle: Duration::from_secs(1),
        }
    }
}

/// Latest status report with its reception sequence number
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    /// Monotonic per-report sequence
    pub seq: u64,
    /// The parsed report
    pub status: FluidNCStatus,
    /// When the report was received
    pub at: Instant,
}

/// Engine-level notifications forwarded to subscribers
#[derive(Debug, Clone)]
pub enum ProtocolEvent {
    /// The reported machine state changed
    StateChanged {
        /// Previous state (Unknown before the first report).
        from: ControllerState,
        /// New state.
        to: ControllerState,
    },
    /// The controller raised or reported an alarm
    AlarmRaised {
        /// Alarm code when an `ALARM:N` line carried one.
        code: Option<u8>,
        /// Decoded message.
        message: String,
    },
    /// The homing-done marker arrived
    HomingDone,
    /// A single axis finished homing
    AxisHomed(char),
    /// Informational controller message
    Info(String),
    /// The serial link dropped
    Disconnected,
}

/// Counters over the life of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStatsSnapshot {
    /// Lines written to the controller
    pub commands_sent: u64,
    /// ok/error acknowledgements received
    pub responses_received: u64,
    /// Acknowledgement timeouts
    pub timeouts: u64,
    /// Motion-classified commands executed
    pub motion_commands: u64,
    /// Motion completion timeouts
    pub motion_timeouts: u64,
    /// Time since the engine started
    pub uptime: Duration,
}

#[derive(Default)]
struct EngineStats {
    commands_sent: AtomicU64,
    responses_received: AtomicU64,
    timeouts: AtomicU64,
    motion_commands: AtomicU64,
    motion_timeouts: AtomicU64,
}

/// How the command task treats a queued line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandKind {
    /// Acknowledge-only command
    Plain,
    /// Requires the motion completion phase; blocked while the alarm
    /// latch is set
    Motion,
    /// The distinguished homing flow
    Homing,
}

struct CommandRequest {
    line: String,
    kind: CommandKind,
    reply: oneshot::Sender<Result<(), MotionError>>,
}

/// ok/error/alarm acknowledgement routed from the telemetry task
#[derive(Debug, Clone, Copy)]
enum CommandReply {
    Ok,
    Error(u8),
    Alarm(u8),
}

struct Shared {
    writer: Arc<dyn LineWriter>,
    config: EngineConfig,
    port_name: String,
    status: ArcSwapOption<StatusSnapshot>,
    seq: AtomicU64,
    alarm: AtomicBool,
    homed: AtomicBool,
    connected: AtomicBool,
    stats: EngineStats,
    started_at: Instant,
    events: broadcast::Sender<ProtocolEvent>,
}

impl Shared {
    fn publish(&self, event: ProtocolEvent) {
        let _ = self.events.send(event);
    }

    fn mark_disconnected(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            tracing::error!("controller link on {} lost", self.port_name);
            self.publish(ProtocolEvent::Disconnected);
        }
    }

    fn state(&self) -> Option<ControllerState> {
        self.status.load().as_ref().map(|s| s.status.state)
    }
}

/// Classify a command as motion-producing (G0/G1/G2/G3/G28/G38 moves,
/// `$H` homing, `$J` jogs).
pub fn is_motion_command(line: &str) -> bool {
    let cmd = line.trim().to_ascii_uppercase();
    if cmd.starts_with("$H") || cmd.starts_with("$J") {
        return true;
    }
    if let Some(rest) = cmd.strip_prefix('G') {
        let digits: String = rest
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        if let Ok(code) = digits.parse::<f64>() {
            return matches!(code.trunc() as u32, 0..=3 | 28 | 38);
        }
    }
    false
}

/// The controller dialog engine. Construct with [`ProtocolEngine::start`].
pub struct ProtocolEngine {
    shared: Arc<Shared>,
    command_tx: mpsc::Sender<CommandRequest>,
}

impl ProtocolEngine {
    /// Start the engine over an open link: spawns the telemetry and
    /// command tasks and returns the shared handle.
    pub fn start(
        writer: Arc<dyn LineWriter>,
        lines: mpsc::UnboundedReceiver<String>,
        port_name: impl Into<String>,
        config: EngineConfig,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        let shared = Arc::new(Shared {
            writer,
            config,
            port_name: port_name.into(),
            status: ArcSwapOption::empty(),
            seq: AtomicU64::new(0),
            alarm: AtomicBool::new(false),
            homed: AtomicBool::new(false),
            connected: AtomicBool::new(true),
            stats: EngineStats::default(),
            started_at: Instant::now(),
            events,
        });

        let (command_tx, command_rx) = mpsc::channel(32);
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();

        tokio::spawn(telemetry_task(shared.clone(), lines, reply_tx));
        tokio::spawn(command_task(shared.clone(), command_rx, reply_rx));

        Arc::new(Self { shared, command_tx })
    }

    /// Execute a command, auto-classifying motion-producing lines.
    /// `$H` is routed through the full homing flow.
    pub async fn execute(&self, line: &str) -> Result<(), MotionError> {
        let line = line.trim();
        if line.eq_ignore_ascii_case("$H") {
            self.home().await
        } else if is_motion_command(line) {
            self.execute_motion(line).await
        } else {
            self.submit(line.to_string(), CommandKind::Plain).await
        }
    }

    /// Execute a motion command and wait for true completion
    pub async fn execute_motion(&self, line: &str) -> Result<(), MotionError> {
        self.submit(line.to_string(), CommandKind::Motion).await
    }

    /// Run the full homing flow (`$X` unlocks, `$H`, homing-done marker,
    /// settle, final `$X`)
    pub async fn home(&self) -> Result<(), MotionError> {
        self.submit("$H".to_string(), CommandKind::Homing).await
    }

    /// Send `$X` and clear the alarm latch once the controller reports a
    /// non-alarm state
    pub async fn clear_alarm(&self) -> Result<(), MotionError> {
        self.submit("$X".to_string(), CommandKind::Plain).await?;
        let status = self.request_status().await?;
        if status.state == ControllerState::Alarm {
            return Err(MotionError::ControllerAlarm {
                code: 0,
                message: "controller still in alarm after unlock".to_string(),
            });
        }
        self.shared.alarm.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Send an immediate single-byte control, bypassing the queue
    pub fn send_immediate(&self, byte: u8) -> Result<(), MotionError> {
        if !self.is_connected() {
            return Err(MotionError::Disconnected);
        }
        let result = self.shared.writer.write_byte(byte);
        if result.is_err() {
            self.shared.mark_disconnected();
        }
        result
    }

    /// Latest status report, if one has been received
    pub fn latest_status(&self) -> Option<Arc<StatusSnapshot>> {
        self.shared.status.load_full()
    }

    /// Force a fresh status report: send `?` and wait for the next one
    pub async fn request_status(&self) -> Result<FluidNCStatus, MotionError> {
        if !self.is_connected() {
            return Err(MotionError::Disconnected);
        }
        let start_seq = self
            .shared
            .status
            .load()
            .as_ref()
            .map(|s| s.seq)
            .unwrap_or(0);
        self.send_immediate(BYTE_STATUS_QUERY)?;

        let deadline = Instant::now() + self.shared.config.command_timeout;
        loop {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if let Some(snap) = self.shared.status.load_full() {
                if snap.seq > start_seq {
                    return Ok(snap.status.clone());
                }
            }
            if !self.is_connected() {
                return Err(MotionError::Disconnected);
            }
            if Instant::now() >= deadline {
                return Err(MotionError::ProtocolTimeout {
                    timeout_ms: self.shared.config.command_timeout.as_millis() as u64,
                });
            }
        }
    }

    /// Subscribe to engine notifications
    pub fn subscribe(&self) -> broadcast::Receiver<ProtocolEvent> {
        self.shared.events.subscribe()
    }

    /// Whether the link is up
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Whether the sticky alarm latch is set
    pub fn is_alarm(&self) -> bool {
        self.shared.alarm.load(Ordering::SeqCst)
    }

    /// Whether a homing cycle has completed this connection
    pub fn is_homed(&self) -> bool {
        self.shared.homed.load(Ordering::SeqCst)
    }

    /// Forget position knowledge (after a soft reset): clears the status
    /// slot and the homed flag
    pub fn mark_position_unknown(&self) {
        self.shared.status.store(None);
        self.shared.homed.store(false, Ordering::SeqCst);
    }

    /// Snapshot the dialog statistics
    pub fn stats(&self) -> EngineStatsSnapshot {
        let s = &self.shared.stats;
        EngineStatsSnapshot {
            commands_sent: s.commands_sent.load(Ordering::Relaxed),
            responses_received: s.responses_received.load(Ordering::Relaxed),
            timeouts: s.timeouts.load(Ordering::Relaxed),
            motion_commands: s.motion_commands.load(Ordering::Relaxed),
            motion_timeouts: s.motion_timeouts.load(Ordering::Relaxed),
            uptime: self.shared.started_at.elapsed(),
        }
    }

    async fn submit(&self, line: String, kind: CommandKind) -> Result<(), MotionError> {
        if !self.is_connected() {
            return Err(MotionError::Disconnected);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(CommandRequest {
                line,
                kind,
                reply: reply_tx,
            })
            .await
            .map_err(|_| MotionError::Disconnected)?;
        reply_rx.await.map_err(|_| MotionError::Disconnected)?
    }
}

/// Telemetry task: sole consumer of the line stream plus the `?`
/// keep-alive.
async fn telemetry_task(
    shared: Arc<Shared>,
    mut lines: mpsc::UnboundedReceiver<String>,
    reply_tx: mpsc::UnboundedSender<CommandReply>,
) {
    let mut poll = tokio::time::interval(shared.config.status_poll_interval);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            maybe_line = lines.recv() => match maybe_line {
                Some(line) => handle_line(&shared, &reply_tx, &line),
                None => {
                    shared.mark_disconnected();
                    break;
                }
            },
            _ = poll.tick() => {
                if shared.writer.write_byte(BYTE_STATUS_QUERY).is_err() {
                    shared.mark_disconnected();
                    break;
                }
            }
        }
    }
    // Dropping reply_tx resolves any in-flight acknowledgement wait with
    // Disconnected.
}

fn handle_line(shared: &Shared, reply_tx: &mpsc::UnboundedSender<CommandReply>, line: &str) {
    match parse_line(line) {
        ParsedLine::StatusReport(status) => {
            let previous = shared.state();
            let seq = shared.seq.fetch_add(1, Ordering::SeqCst) + 1;
            shared.status.store(Some(Arc::new(StatusSnapshot {
                seq,
                status: status.clone(),
                at: Instant::now(),
            })));

            if status.state == ControllerState::Alarm
                && !shared.alarm.swap(true, Ordering::SeqCst)
            {
                shared.publish(ProtocolEvent::AlarmRaised {
                    code: None,
                    message: "controller reported alarm state".to_string(),
                });
            }
            if previous != Some(status.state) {
                shared.publish(ProtocolEvent::StateChanged {
                    from: previous.unwrap_or(ControllerState::Unknown),
                    to: status.state,
                });
            }
        }
        ParsedLine::Ok => {
            shared.stats.responses_received.fetch_add(1, Ordering::Relaxed);
            let _ = reply_tx.send(CommandReply::Ok);
        }
        ParsedLine::Error(code) => {
            shared.stats.responses_received.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("controller error {}: {}", code, decode_error(code));
            let _ = reply_tx.send(CommandReply::Error(code));
        }
        ParsedLine::Alarm(code) => {
            shared.alarm.store(true, Ordering::SeqCst);
            shared.publish(ProtocolEvent::AlarmRaised {
                code: Some(code),
                message: decode_alarm(code).to_string(),
            });
            let _ = reply_tx.send(CommandReply::Alarm(code));
        }
        ParsedLine::HomingComplete => {
            tracing::info!("homing cycle complete");
            shared.homed.store(true, Ordering::SeqCst);
            shared.publish(ProtocolEvent::HomingDone);
        }
        ParsedLine::HomedAxis(axis) => {
            tracing::debug!("axis {} homed", axis);
            shared.publish(ProtocolEvent::AxisHomed(axis));
        }
        ParsedLine::Info(text) => {
            shared.publish(ProtocolEvent::Info(text));
        }
        ParsedLine::Startup(banner) => {
            tracing::info!("controller startup: {}", banner);
            shared.publish(ProtocolEvent::Info(banner));
        }
        ParsedLine::Other(raw) => {
            if !raw.is_empty() {
                tracing::trace!("unclassified controller line: {}", raw);
            }
        }
    }
}

/// Command task: serves queued requests strictly in submission order.
async fn command_task(
    shared: Arc<Shared>,
    mut commands: mpsc::Receiver<CommandRequest>,
    mut replies: mpsc::UnboundedReceiver<CommandReply>,
) {
    while let Some(request) = commands.recv().await {
        if !shared.connected.load(Ordering::SeqCst) {
            let _ = request.reply.send(Err(MotionError::Disconnected));
            continue;
        }

        let result = match request.kind {
            CommandKind::Plain => send_and_acknowledge(&shared, &mut replies, &request.line).await,
            CommandKind::Motion => {
                if shared.alarm.load(Ordering::SeqCst) {
                    Err(MotionError::RequiresHoming)
                } else {
                    execute_motion_command(&shared, &mut replies, &request.line).await
                }
            }
            CommandKind::Homing => run_homing(&shared, &mut replies).await,
        };

        let _ = request.reply.send(result);
    }
}

/// Write one line and pair it with its ok/error/alarm acknowledgement.
async fn send_and_acknowledge(
    shared: &Shared,
    replies: &mut mpsc::UnboundedReceiver<CommandReply>,
    line: &str,
) -> Result<(), MotionError> {
    // Stale acknowledgements (late homing ok, unsolicited errors) belong
    // to no pending command; discard before pairing.
    while replies.try_recv().is_ok() {}

    tracing::debug!("-> {}", line);
    if let Err(e) = shared.writer.write_line(line) {
        shared.mark_disconnected();
        return Err(e);
    }
    shared.stats.commands_sent.fetch_add(1, Ordering::Relaxed);

    match tokio::time::timeout(shared.config.command_timeout, replies.recv()).await {
        Err(_) => {
            shared.stats.timeouts.fetch_add(1, Ordering::Relaxed);
            Err(MotionError::ProtocolTimeout {
                timeout_ms: shared.config.command_timeout.as_millis() as u64,
            })
        }
        Ok(None) => Err(MotionError::Disconnected),
        Ok(Some(CommandReply::Ok)) => Ok(()),
        Ok(Some(CommandReply::Error(code))) => Err(MotionError::ControllerError {
            code,
            message: decode_error(code).to_string(),
        }),
        Ok(Some(CommandReply::Alarm(code))) => Err(MotionError::ControllerAlarm {
            code,
            message: decode_alarm(code).to_string(),
        }),
    }
}

async fn execute_motion_command(
    shared: &Shared,
    replies: &mut mpsc::UnboundedReceiver<CommandReply>,
    line: &str,
) -> Result<(), MotionError> {
    send_and_acknowledge(shared, replies, line).await?;
    shared.stats.motion_commands.fetch_add(1, Ordering::Relaxed);
    wait_motion_complete(shared).await
}

/// Completion phase: poll status until the machine is idle and
/// stationary.
async fn wait_motion_complete(shared: &Shared) -> Result<(), MotionError> {
    let issued = Instant::now();
    let timeout = shared.config.motion_timeout;
    let epsilon = shared.config.stability_epsilon;
    // N agreeing reports give N-1 stable deltas.
    let needed_stable_deltas = shared.config.stable_reports.saturating_sub(1).max(1);

    let mut saw_motion_state = false;
    let mut left_idle = false;
    let mut stable_deltas: u32 = 0;
    let mut last_report: Option<(u64, Position4D)> = shared
        .status
        .load_full()
        .map(|s| (s.seq, s.status.mpos));

    loop {
        if issued.elapsed() >= timeout {
            shared.stats.motion_timeouts.fetch_add(1, Ordering::Relaxed);
            return Err(MotionError::MotionTimeout {
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        if !shared.connected.load(Ordering::SeqCst) {
            return Err(MotionError::Disconnected);
        }

        let _ = shared.writer.write_byte(BYTE_STATUS_QUERY);
        tokio::time::sleep(shared.config.completion_poll_interval).await;

        let Some(snapshot) = shared.status.load_full() else {
            continue;
        };
        let state = snapshot.status.state;

        if state == ControllerState::Alarm {
            return Err(MotionError::ControllerAlarm {
                code: 0,
                message: "controller entered alarm during motion".to_string(),
            });
        }

        let is_new_report = last_report.map_or(true, |(seq, _)| snapshot.seq != seq);
        if is_new_report {
            if state.is_moving() {
                saw_motion_state = true;
                left_idle = true;
                stable_deltas = 0;
            } else if state != ControllerState::Idle {
                left_idle = true;
                stable_deltas = 0;
            } else if let Some((_, previous_pos)) = last_report {
                if snapshot.status.mpos.max_axis_delta(&previous_pos) <= epsilon {
                    stable_deltas += 1;
                } else {
                    stable_deltas = 0;
                }
            }
            last_report = Some((snapshot.seq, snapshot.status.mpos));
        }

        // Either the machine visibly moved, or it never left Idle long
        // enough that a zero-distance move must be done.
        let motion_accounted_for =
            saw_motion_state || (!left_idle && issued.elapsed() >= shared.config.zero_motion_grace);

        if motion_accounted_for
            && state == ControllerState::Idle
            && stable_deltas >= needed_stable_deltas
        {
            return Ok(());
        }
    }
}

/// The distinguished homing flow.
///
/// `$X` up to three times until a non-alarm state is observed, then `$H`.
/// Completion is the exact `[MSG:DBG: Homing done]` marker, not a return
/// to Idle. After the marker: settle, verify Idle, and send one more `$X`
/// to clear any residual alarm (harmless when the firmware already
/// cleared it).
async fn run_homing(
    shared: &Shared,
    replies: &mut mpsc::UnboundedReceiver<CommandReply>,
) -> Result<(), MotionError> {
    for attempt in 1..=shared.config.unlock_attempts {
        if let Err(e) = send_and_acknowledge(shared, replies, "$X").await {
            if e.is_fatal() {
                return Err(e);
            }
            tracing::warn!("unlock attempt {} failed: {}", attempt, e);
        }
        let _ = shared.writer.write_byte(BYTE_STATUS_QUERY);
        tokio::time::sleep(shared.config.unlock_retry_delay).await;

        let in_alarm = shared
            .state()
            .map_or(true, |s| s == ControllerState::Alarm);
        if !in_alarm {
            shared.alarm.store(false, Ordering::SeqCst);
            break;
        }
        tracing::warn!("controller still in alarm after unlock attempt {}", attempt);
    }

    // Subscribe before $H so the done marker cannot be missed.
    let mut events = shared.events.subscribe();

    tracing::info!("starting homing cycle");
    shared.homed.store(false, Ordering::SeqCst);
    if let Err(e) = shared.writer.write_line("$H") {
        shared.mark_disconnected();
        return Err(e);
    }
    shared.stats.commands_sent.fetch_add(1, Ordering::Relaxed);
    shared.stats.motion_commands.fetch_add(1, Ordering::Relaxed);

    let deadline = tokio::time::Instant::now() + shared.config.homing_timeout;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(ProtocolEvent::HomingDone) => break,
                Ok(ProtocolEvent::Disconnected) => return Err(MotionError::Disconnected),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Err(MotionError::Disconnected),
            },
            _ = tokio::time::sleep_until(deadline) => {
                shared.stats.motion_timeouts.fetch_add(1, Ordering::Relaxed);
                return Err(MotionError::HomingTimeout {
                    timeout_ms: shared.config.homing_timeout.as_millis() as u64,
                });
            }
        }
    }

    tokio::time::sleep(shared.config.post_homing_settle).await;
    let _ = shared.writer.write_byte(BYTE_STATUS_QUERY);
    tokio::time::sleep(Duration::from_millis(100)).await;
    if shared.state() != Some(ControllerState::Idle) {
        tracing::warn!("controller not idle after homing-done marker");
    }

    // Post-homing unlock, always safe to send.
    if let Err(e) = send_and_acknowledge(shared, replies, "$X").await {
        if e.is_fatal() {
            return Err(e);
        }
        tracing::debug!("post-homing unlock response: {}", e);
    }

    shared.alarm.store(false, Ordering::SeqCst);
    shared.homed.store(true, Ordering::SeqCst);
    tracing::info!("homing complete, controller idle");
    Ok(())
}
