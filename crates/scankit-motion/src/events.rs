//! Bridge from protocol-engine telemetry to the application event bus.
//!
//! The engine speaks its own compact event type so it has no bus
//! dependency in its hot path; this task translates the safety-relevant
//! subset into [`ScannerEvent`]s for UI layers and the orchestrator's
//! observers.

use scankit_core::{EventBus, ScannerEvent};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::protocol::{ProtocolEngine, ProtocolEvent};

const EVENT_SOURCE: &str = "protocol_engine";

/// Forward engine telemetry onto the bus until the engine disconnects.
pub fn forward_protocol_events(
    engine: &ProtocolEngine,
    bus: Arc<EventBus>,
    port: impl Into<String>,
) -> JoinHandle<()> {
    let mut events = engine.subscribe();
    let port = port.into();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ProtocolEvent::AlarmRaised { code, message }) => {
                    bus.publish(EVENT_SOURCE, ScannerEvent::AlarmDetected { code, message });
                }
                Ok(ProtocolEvent::HomingDone) => {
                    bus.publish(EVENT_SOURCE, ScannerEvent::HomingCompleted);
                }
                Ok(ProtocolEvent::AxisHomed(axis)) => {
                    bus.publish(
                        EVENT_SOURCE,
                        ScannerEvent::HomingProgress {
                            message: format!("axis {axis} homed"),
                        },
                    );
                }
                Ok(ProtocolEvent::Disconnected) => {
                    bus.publish(
                        EVENT_SOURCE,
                        ScannerEvent::ConnectionLost { port: port.clone() },
                    );
                    break;
                }
                Ok(ProtocolEvent::StateChanged { .. }) | Ok(ProtocolEvent::Info(_)) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("event bridge lagged {} engine events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
