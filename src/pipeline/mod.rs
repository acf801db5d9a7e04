//! Session pipeline internals: the controller actor, the bus monitor, and
//! the per-participant recording buffers.

mod controller;
mod monitor;
mod recording;

pub(crate) use controller::{Controller, ControllerCommand};
pub(crate) use monitor::run_monitor;
pub use recording::RecordingBuffer;
