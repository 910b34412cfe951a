//! Serial port implementation of the controller link.
//!
//! Provides port enumeration filtered to CNC controller patterns and the
//! concrete [`SerialLink`] that opens the port, shares the write half
//! behind a mutex, and runs the line-framing read loop on a blocking
//! task.

use super::{ConnectionParams, LineWriter};
use parking_lot::Mutex;
use scankit_core::MotionError;
use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port_name: String,
    /// Port description (e.g., "USB Serial Port")
    pub description: String,
    /// Manufacturer name if available
    pub manufacturer: Option<String>,
    /// Serial number if available
    pub serial_number: Option<String>,
}

/// List serial ports that look like CNC controllers
///
/// Valid patterns:
/// - Windows: COM* (COM1, COM2, etc.)
/// - Linux: /dev/ttyUSB*, /dev/ttyACM*
/// - macOS: /dev/cu.usbserial-*, /dev/cu.usbmodem*
pub fn list_ports() -> Result<Vec<SerialPortInfo>, MotionError> {
    let ports = serialport::available_ports()
        .map_err(|e| MotionError::Transport(format!("failed to enumerate ports: {e}")))?;

    Ok(ports
        .iter()
        .filter(|port| is_controller_port(&port.port_name))
        .map(|port| {
            let (description, manufacturer, serial_number) = match &port.port_type {
                serialport::SerialPortType::UsbPort(usb) => (
                    format!(
                        "USB {} {}",
                        usb.manufacturer.as_deref().unwrap_or("Device"),
                        usb.product.as_deref().unwrap_or("Serial Port")
                    ),
                    usb.manufacturer.clone(),
                    usb.serial_number.clone(),
                ),
                serialport::SerialPortType::BluetoothPort => {
                    ("Bluetooth Serial".to_string(), None, None)
                }
                serialport::SerialPortType::PciPort => ("PCI Serial".to_string(), None, None),
                _ => ("Serial Port".to_string(), None, None),
            };
            SerialPortInfo {
                port_name: port.port_name.clone(),
                description,
                manufacturer,
                serial_number,
            }
        })
        .collect())
}

fn is_controller_port(port_name: &str) -> bool {
    if port_name.starts_with("COM") && port_name[3..].chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    if port_name.starts_with("/dev/ttyUSB") || port_name.starts_with("/dev/ttyACM") {
        return true;
    }
    if port_name.starts_with("/dev/cu.usbserial-") || port_name.starts_with("/dev/cu.usbmodem") {
        return true;
    }
    false
}

/// Write half of an open serial link
pub struct SerialWriter {
    port: Mutex<Box<dyn serialport::SerialPort>>,
    name: String,
}

impl LineWriter for SerialWriter {
    fn write_line(&self, line: &str) -> Result<(), MotionError> {
        let mut port = self.port.lock();
        port.write_all(line.as_bytes())
            .and_then(|_| port.write_all(b"\n"))
            .and_then(|_| port.flush())
            .map_err(|e| MotionError::Transport(format!("write to {} failed: {e}", self.name)))
    }

    fn write_byte(&self, byte: u8) -> Result<(), MotionError> {
        let mut port = self.port.lock();
        port.write_all(&[byte])
            .and_then(|_| port.flush())
            .map_err(|e| MotionError::Transport(format!("write to {} failed: {e}", self.name)))
    }
}

/// An open serial link: shared writer plus the framed line stream.
///
/// Dropped lines channel (receiver sees `None`) signals disconnection;
/// reconnecting is the protocol engine's policy.
pub struct SerialLink {
    /// Shared write half
    pub writer: Arc<SerialWriter>,
    /// Framed, trimmed, non-empty lines from the controller
    pub lines: mpsc::UnboundedReceiver<String>,
}

impl SerialLink {
    /// Open the port and start the read loop.
    pub fn open(params: &ConnectionParams) -> Result<Self, MotionError> {
        let builder = serialport::new(&params.port, params.baud_rate)
            .timeout(params.read_timeout)
            .data_bits(match params.data_bits {
                5 => serialport::DataBits::Five,
                6 => serialport::DataBits::Six,
                7 => serialport::DataBits::Seven,
                8 => serialport::DataBits::Eight,
                other => {
                    return Err(MotionError::Transport(format!("invalid data bits: {other}")))
                }
            })
            .stop_bits(match params.stop_bits {
                1 => serialport::StopBits::One,
                2 => serialport::StopBits::Two,
                other => {
                    return Err(MotionError::Transport(format!("invalid stop bits: {other}")))
                }
            })
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None);

        let port = builder.open().map_err(|e| {
            tracing::warn!("failed to open serial port {}: {}", params.port, e);
            MotionError::Transport(format!("failed to open port {}: {e}", params.port))
        })?;

        let reader = port.try_clone().map_err(|e| {
            MotionError::Transport(format!("failed to clone port handle {}: {e}", params.port))
        })?;

        let writer = Arc::new(SerialWriter {
            port: Mutex::new(port),
            name: params.port.clone(),
        });

        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let port_name = params.port.clone();
        tokio::task::spawn_blocking(move || read_loop(reader, line_tx, port_name));

        Ok(Self {
            writer,
            lines: line_rx,
        })
    }
}

/// Blocking read loop: frame bytes into trimmed lines and forward them.
///
/// Exits (dropping the sender) when the port errors out or every receiver
/// is gone.
fn read_loop(
    mut reader: Box<dyn serialport::SerialPort>,
    line_tx: mpsc::UnboundedSender<String>,
    port_name: String,
) {
    let mut pending = Vec::with_capacity(256);
    let mut chunk = [0u8; 256];

    loop {
        match reader.read(&mut chunk) {
            Ok(0) => {
                tracing::warn!("serial port {} closed by peer", port_name);
                break;
            }
            Ok(n) => {
                pending.extend_from_slice(&chunk[..n]);
                while let Some(newline) = pending.iter().position(|&b| b == b'\n') {
                    let raw: Vec<u8> = pending.drain(..=newline).collect();
                    let line = String::from_utf8_lossy(&raw).trim().to_string();
                    if !line.is_empty() && line_tx.send(line).is_err() {
                        return;
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                if line_tx.is_closed() {
                    return;
                }
            }
            Err(e) => {
                tracing::error!("serial read error on {}: {}", port_name, e);
                break;
            }
        }
    }
    // Sender drops here; the engine observes the closed channel and marks
    // the link disconnected.
}
