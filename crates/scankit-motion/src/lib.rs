//! # ScanKit Motion
//!
//! The motion half of the scanner core: serial transport, the FluidNC
//! protocol engine, the axis-typed motion adapter, and the derived
//! homing status manager.
//!
//! Typical wiring:
//!
//! ```no_run
//! use scankit_motion::adapter::MotionAdapter;
//! use scankit_motion::protocol::{EngineConfig, ProtocolEngine};
//! use scankit_motion::transport::{ConnectionParams, SerialLink};
//! use scankit_core::MachineLimits;
//! use std::sync::Arc;
//!
//! # async fn wire() -> Result<(), scankit_core::MotionError> {
//! let link = SerialLink::open(&ConnectionParams::default())?;
//! let engine = ProtocolEngine::start(
//!     link.writer.clone(),
//!     link.lines,
//!     "/dev/ttyUSB0",
//!     EngineConfig::default(),
//! );
//! let adapter = Arc::new(MotionAdapter::new(engine, MachineLimits::default()));
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod events;
pub mod homing;
pub mod protocol;
pub mod transport;

pub use adapter::{shortest_arc_target, AxisFeedrates, FeedrateProfiles, MotionAdapter};
pub use events::forward_protocol_events;
pub use homing::{HomingSnapshot, HomingState, HomingStatusManager};
pub use protocol::{
    is_motion_command, parse_line, ControllerState, EngineConfig, FluidNCStatus, ParsedLine,
    ProtocolEngine, ProtocolEvent,
};
pub use transport::{list_ports, ConnectionParams, LineWriter, ReconnectBackoff, SerialLink};
