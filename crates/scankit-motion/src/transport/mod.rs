//! Byte-stream ownership for the controller link.
//!
//! The transport owns the serial port: one writer handle shared behind a
//! mutex, one background read loop framing lines into a channel. Policy
//! (reconnects, retries) lives in the protocol engine, not here.

pub mod serial;

use scankit_core::MotionError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use serial::{list_ports, SerialLink, SerialPortInfo};

/// Serial connection parameters (8N1 by default)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Port path, e.g. `/dev/ttyUSB0` or `COM3`
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5-8)
    pub data_bits: u8,
    /// Stop bits (1 or 2)
    pub stop_bits: u8,
    /// Read timeout used by the framing loop
    #[serde(with = "duration_millis")]
    pub read_timeout: Duration,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            data_bits: 8,
            stop_bits: 1,
            read_timeout: Duration::from_millis(50),
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        (value.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Write half of the controller link.
///
/// All writes go through one implementation instance; callers share it
/// behind an `Arc`. `write_line` is for the line protocol, `write_byte`
/// for immediate controls (`?`, `!`, `~`, 0x18) which are sent
/// unterminated.
pub trait LineWriter: Send + Sync {
    /// Write a command line; a trailing `\n` is appended and the port
    /// flushed.
    fn write_line(&self, line: &str) -> Result<(), MotionError>;

    /// Write a single immediate-control byte, unterminated.
    fn write_byte(&self, byte: u8) -> Result<(), MotionError>;
}

/// Exponential reconnect backoff, 500 ms doubling to a 10 s ceiling.
///
/// The engine does not reconnect on its own; whoever supervises the
/// connection paces its reopen attempts with this.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    next: Duration,
    max: Duration,
}

impl ReconnectBackoff {
    /// Backoff with the standard 500 ms / 10 s bounds
    pub fn new() -> Self {
        Self {
            next: Duration::from_millis(500),
            max: Duration::from_secs(10),
        }
    }

    /// Delay to wait before the next attempt; doubles up to the ceiling
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }

    /// Reset after a successful connection
    pub fn reset(&mut self) {
        self.next = Duration::from_millis(500);
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new()
    }
}
