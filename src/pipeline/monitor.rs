//! Bus monitor task.
//!
//! Drains the engine's advisory bus for one session: logs every message and
//! forwards the interesting ones to the owner's event callback. Nothing on
//! the bus tears a session down; teardown is always an explicit owner
//! decision.

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::engine::BusEvent;
use crate::event::{EventCallback, SessionEvent};

/// Runs until the engine closes the bus (i.e. the topology stopped).
pub(crate) async fn run_monitor(
    mut bus: mpsc::Receiver<BusEvent>,
    session_id: String,
    event_callback: Option<EventCallback>,
) {
    while let Some(event) = bus.recv().await {
        match event {
            BusEvent::Error {
                element,
                message,
                debug: detail,
            } => {
                error!(
                    session_id = %session_id,
                    element = %element,
                    message = %message,
                    detail = detail.as_deref().unwrap_or(""),
                    "engine error"
                );
                if let Some(callback) = &event_callback {
                    callback(SessionEvent::EngineError {
                        element,
                        message,
                        debug: detail,
                    });
                }
            }
            BusEvent::EndOfStream => {
                info!(session_id = %session_id, "end of stream");
                if let Some(callback) = &event_callback {
                    callback(SessionEvent::EndOfStream);
                }
            }
            BusEvent::StateChanged {
                old,
                new,
                pending,
                top_level,
            } => {
                debug!(
                    session_id = %session_id,
                    ?old,
                    ?new,
                    ?pending,
                    top_level,
                    "state changed"
                );
                // Element-level transitions are noise; only the topology's
                // own transitions reach the owner.
                if top_level {
                    if let Some(callback) = &event_callback {
                        callback(SessionEvent::StateChanged { old, new, pending });
                    }
                }
            }
        }
    }
    debug!(session_id = %session_id, "bus closed, monitor exiting");
}
