//! Error and alarm code tables for the GRBL dialect.
//!
//! FluidNC reuses the GRBL code space for `error:N` and `ALARM:N`
//! responses; these tables turn the numbers into messages for error
//! records and logs.

/// Decode an `error:N` code
pub fn decode_error(code: u8) -> &'static str {
    match code {
        1 => "Expected command letter",
        2 => "Bad number format",
        3 => "Invalid statement",
        4 => "Negative value",
        5 => "Setting disabled",
        6 => "Step pulse too short",
        7 => "Failed to read settings",
        8 => "Command requires idle state",
        9 => "G-code lock (alarm or jog active)",
        10 => "Homing not enabled",
        11 => "Line overflow",
        12 => "Max step rate exceeded",
        13 => "Check door",
        14 => "Startup line too long",
        15 => "Jog target exceeds machine travel",
        16 => "Invalid jog command",
        17 => "Laser mode requires PWM",
        20 => "Unsupported or invalid g-code command",
        21 => "Modal group violation",
        22 => "Undefined feed rate",
        23 => "Command requires integer value",
        24 => "More than one g-code command requiring axis words",
        25 => "Repeated g-code word",
        26 => "Axis words missing",
        27 => "Invalid line number",
        28 => "Value word missing",
        _ => "Unknown error",
    }
}

/// Decode an `ALARM:N` code
pub fn decode_alarm(code: u8) -> &'static str {
    match code {
        1 => "Hard limit triggered",
        2 => "Soft limit exceeded",
        3 => "Abort during cycle; position lost",
        4 => "Probe fail",
        5 => "Probe not triggered",
        6 => "Homing fail: cycle reset",
        7 => "Homing fail: safety door opened",
        8 => "Homing fail: pull-off failed",
        9 => "Homing fail: limit switch not found",
        10 => "Spindle control failure",
        _ => "Unknown alarm",
    }
}

/// Format an error code with its description
pub fn format_error(code: u8) -> String {
    format!("error {}: {}", code, decode_error(code))
}

/// Format an alarm code with its description
pub fn format_alarm(code: u8) -> String {
    format!("alarm {}: {}", code, decode_alarm(code))
}
