//! Controller line parsing.
//!
//! The FluidNC firmware speaks a GRBL-dialect line protocol: status
//! reports in angle brackets, bare `ok`/`error:N` acknowledgements,
//! bracketed info and alarm messages, and a startup banner after reset.
//! [`parse_line`] is a total function: malformed input becomes
//! [`ParsedLine::Other`], never a panic.

use scankit_core::types::Position4D;
use serde::{Deserialize, Serialize};

/// Controller machine state as reported in status lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerState {
    /// No motion in progress, no error.
    Idle,
    /// Executing a motion command.
    Run,
    /// Executing a jog.
    Jog,
    /// Feed hold active.
    Hold,
    /// Homing cycle in progress.
    Home,
    /// Safety alarm; motion blocked until cleared.
    Alarm,
    /// Safety door open.
    Door,
    /// G-code check mode.
    Check,
    /// Low-power sleep.
    Sleep,
    /// Anything the firmware reports that we do not recognize.
    Unknown,
}

impl ControllerState {
    /// Parse the state field of a status report. Sub-states such as
    /// `Hold:0` match on their prefix.
    pub fn parse(field: &str) -> Self {
        match field {
            s if s.starts_with("Idle") => ControllerState::Idle,
            s if s.starts_with("Run") => ControllerState::Run,
            s if s.starts_with("Jog") => ControllerState::Jog,
            s if s.starts_with("Hold") => ControllerState::Hold,
            s if s.starts_with("Home") => ControllerState::Home,
            s if s.starts_with("Alarm") => ControllerState::Alarm,
            s if s.starts_with("Door") => ControllerState::Door,
            s if s.starts_with("Check") => ControllerState::Check,
            s if s.starts_with("Sleep") => ControllerState::Sleep,
            _ => ControllerState::Unknown,
        }
    }

    /// Whether this state indicates motion in progress
    pub fn is_moving(&self) -> bool {
        matches!(
            self,
            ControllerState::Run | ControllerState::Jog | ControllerState::Home
        )
    }
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ControllerState::Idle => "Idle",
            ControllerState::Run => "Run",
            ControllerState::Jog => "Jog",
            ControllerState::Hold => "Hold",
            ControllerState::Home => "Home",
            ControllerState::Alarm => "Alarm",
            ControllerState::Door => "Door",
            ControllerState::Check => "Check",
            ControllerState::Sleep => "Sleep",
            ControllerState::Unknown => "Unknown",
        };
        write!(f, "{name}")
    }
}

/// One atomically parsed status report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FluidNCStatus {
    /// Machine state
    pub state: ControllerState,
    /// Machine position; controllers reporting 3 axes default C to 0.0
    pub mpos: Position4D,
    /// Work position when the report carries one
    pub wpos: Option<Position4D>,
    /// Commanded feed rate (units/min)
    pub feed: f64,
    /// Spindle/PWM value from the FS field
    pub spindle: f64,
}

/// A classified controller line
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    /// `<State|MPos:...>` status report
    StatusReport(FluidNCStatus),
    /// Literal `ok`
    Ok,
    /// `error:N`
    Error(u8),
    /// `ALARM:N` or `[ALARM:N]`
    Alarm(u8),
    /// `[MSG:...]` or `[GC:...]` informational text (brackets stripped)
    Info(String),
    /// The exact `[MSG:DBG: Homing done]` marker; the sole reliable
    /// homing-completion signal from the firmware
    HomingComplete,
    /// `[MSG:Homed:X]` per-axis progress
    HomedAxis(char),
    /// Reset banner (`Grbl ...` / `FluidNC ...`)
    Startup(String),
    /// Anything unrecognized or malformed, kept verbatim
    Other(String),
}

/// The homing-done marker, matched case-sensitively and exactly.
const HOMING_DONE: &str = "[MSG:DBG: Homing done]";

/// Classify one trimmed controller line.
pub fn parse_line(line: &str) -> ParsedLine {
    let line = line.trim();

    if line == "ok" {
        return ParsedLine::Ok;
    }

    if let Some(code) = line.strip_prefix("error:") {
        if let Ok(code) = code.trim().parse::<u8>() {
            return ParsedLine::Error(code);
        }
        return ParsedLine::Other(line.to_string());
    }

    if line == HOMING_DONE {
        return ParsedLine::HomingComplete;
    }

    // ALARM:N arrives bare or bracketed depending on firmware version.
    let alarm_body = line
        .strip_prefix("ALARM:")
        .or_else(|| line.strip_prefix("[ALARM:").and_then(|s| s.strip_suffix(']')));
    if let Some(code) = alarm_body {
        if let Ok(code) = code.trim().parse::<u8>() {
            return ParsedLine::Alarm(code);
        }
        return ParsedLine::Other(line.to_string());
    }

    if line.starts_with('<') && line.ends_with('>') {
        return match parse_status_report(&line[1..line.len() - 1]) {
            Some(status) => ParsedLine::StatusReport(status),
            None => ParsedLine::Other(line.to_string()),
        };
    }

    if line.starts_with("[MSG:Homed:") && line.ends_with(']') {
        let axis = line["[MSG:Homed:".len()..line.len() - 1].trim();
        if let Some(letter) = axis.chars().next() {
            if axis.len() == 1 && letter.is_ascii_alphabetic() {
                return ParsedLine::HomedAxis(letter.to_ascii_uppercase());
            }
        }
        return ParsedLine::Info(line[1..line.len() - 1].to_string());
    }

    if (line.starts_with("[MSG:") || line.starts_with("[GC:")) && line.ends_with(']') {
        return ParsedLine::Info(line[1..line.len() - 1].to_string());
    }

    if line.starts_with("Grbl ") || line.starts_with("FluidNC ") {
        return ParsedLine::Startup(line.to_string());
    }

    ParsedLine::Other(line.to_string())
}

/// Parse the interior of a `<...>` status report.
///
/// First `|`-separated field is the state; later fields use fixed
/// `MPos:x,y,z[,c]`, `WPos:x,y,z[,c]`, and `FS:feed,spindle` formats.
fn parse_status_report(body: &str) -> Option<FluidNCStatus> {
    let mut parts = body.split('|');
    let state_field = parts.next()?.trim();
    if state_field.is_empty() {
        return None;
    }
    let state = ControllerState::parse(state_field);

    let mut mpos = Position4D::default();
    let mut wpos = None;
    let mut feed = 0.0;
    let mut spindle = 0.0;

    for part in parts {
        let part = part.trim();
        if let Some(coords) = part.strip_prefix("MPos:") {
            mpos = parse_axes(coords)?;
        } else if let Some(coords) = part.strip_prefix("WPos:") {
            wpos = Some(parse_axes(coords)?);
        } else if let Some(fs) = part.strip_prefix("FS:") {
            let mut fields = fs.split(',');
            feed = fields.next()?.trim().parse::<f64>().ok()?;
            spindle = fields
                .next()
                .and_then(|s| s.trim().parse::<f64>().ok())
                .unwrap_or(0.0);
        }
        // Unknown fields (WCO:, Ov:, Buf:, ...) are tolerated and skipped.
    }

    Some(FluidNCStatus {
        state,
        mpos,
        wpos,
        feed,
        spindle,
    })
}

/// Parse a comma-separated axis tuple; missing trailing axes default to
/// 0.0 (3-axis controllers omit C).
fn parse_axes(coords: &str) -> Option<Position4D> {
    let mut values = [0.0f64; 4];
    let mut count = 0;
    for (i, field) in coords.split(',').enumerate() {
        if i >= 4 {
            break;
        }
        values[i] = field.trim().parse::<f64>().ok()?;
        count += 1;
    }
    if count < 3 {
        return None;
    }
    Some(Position4D::new(values[0], values[1], values[2], values[3]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ok_and_error() {
        assert_eq!(parse_line("ok"), ParsedLine::Ok);
        assert_eq!(parse_line("error:9"), ParsedLine::Error(9));
        assert_eq!(parse_line("error:junk"), ParsedLine::Other("error:junk".into()));
    }

    #[test]
    fn parses_alarm_bare_and_bracketed() {
        assert_eq!(parse_line("ALARM:1"), ParsedLine::Alarm(1));
        assert_eq!(parse_line("[ALARM:6]"), ParsedLine::Alarm(6));
    }

    #[test]
    fn homing_done_is_exact() {
        assert_eq!(parse_line("[MSG:DBG: Homing done]"), ParsedLine::HomingComplete);
        // Case and spacing matter.
        assert!(matches!(
            parse_line("[MSG:DBG: homing done]"),
            ParsedLine::Info(_)
        ));
    }

    #[test]
    fn homed_axis_lines() {
        assert_eq!(parse_line("[MSG:Homed:X]"), ParsedLine::HomedAxis('X'));
        assert_eq!(parse_line("[MSG:Homed:c]"), ParsedLine::HomedAxis('C'));
    }

    #[test]
    fn four_axis_status_report() {
        let parsed = parse_line("<Idle|MPos:1.000,2.000,3.000,4.000|FS:0,0>");
        let ParsedLine::StatusReport(status) = parsed else {
            panic!("expected status report");
        };
        assert_eq!(status.state, ControllerState::Idle);
        assert_eq!(status.mpos, Position4D::new(1.0, 2.0, 3.0, 4.0));
        assert_eq!(status.feed, 0.0);
    }

    #[test]
    fn three_axis_report_defaults_c() {
        let parsed = parse_line("<Idle|MPos:0.000,0.000,0.000>");
        let ParsedLine::StatusReport(status) = parsed else {
            panic!("expected status report");
        };
        assert_eq!(status.mpos.c, 0.0);
        assert!(status.wpos.is_none());
    }

    #[test]
    fn work_position_and_feed() {
        let parsed =
            parse_line("<Run|MPos:10.000,5.000,90.000,0.000|WPos:10.000,5.000,90.000,0.000|FS:150,0>");
        let ParsedLine::StatusReport(status) = parsed else {
            panic!("expected status report");
        };
        assert_eq!(status.state, ControllerState::Run);
        assert_eq!(status.wpos, Some(Position4D::new(10.0, 5.0, 90.0, 0.0)));
        assert_eq!(status.feed, 150.0);
    }

    #[test]
    fn hold_substate_matches_prefix() {
        let parsed = parse_line("<Hold:0|MPos:0,0,0,0>");
        let ParsedLine::StatusReport(status) = parsed else {
            panic!("expected status report");
        };
        assert_eq!(status.state, ControllerState::Hold);
    }

    #[test]
    fn empty_line_is_other() {
        assert_eq!(parse_line(""), ParsedLine::Other(String::new()));
    }

    #[test]
    fn malformed_status_is_other() {
        assert_eq!(
            parse_line("<Idle|MPos:not,numbers,here>"),
            ParsedLine::Other("<Idle|MPos:not,numbers,here>".into())
        );
        assert_eq!(parse_line("<>"), ParsedLine::Other("<>".into()));
    }

    #[test]
    fn startup_banner() {
        assert!(matches!(
            parse_line("Grbl 3.7 [FluidNC v3.7.8 '$' for help]"),
            ParsedLine::Startup(_)
        ));
        assert!(matches!(parse_line("FluidNC v3.7.8"), ParsedLine::Startup(_)));
    }

    #[test]
    fn info_lines_keep_body() {
        assert_eq!(
            parse_line("[MSG:INFO: Caution: Unlocked]"),
            ParsedLine::Info("MSG:INFO: Caution: Unlocked".into())
        );
        assert!(matches!(parse_line("[GC:G0 G54 G17]"), ParsedLine::Info(_)));
    }

    #[test]
    fn unsolicited_garbage_never_panics() {
        for junk in ["<<<", ">", "|||", "MPos:", "[MSG:unclosed", "\u{0}\u{1}"] {
            let _ = parse_line(junk);
        }
    }
}
