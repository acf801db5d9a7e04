//! Sink trait and implementations for recording exports.
//!
//! A [`BufferSink`] is any destination that can receive a recording buffer's
//! retained history. The crate provides three built-in sinks:
//!
//! - [`MemorySink`]: Collects the export into a single sample vector
//! - [`ChannelSink`]: Forwards chunks to a tokio mpsc channel
//! - [`WavSink`]: Writes a finalized 16-bit PCM WAV file
//!
//! Implement the trait yourself for custom destinations like network
//! endpoints or transcription services.

mod channel;
mod file;
mod memory;

pub use channel::ChannelSink;
pub use file::WavSink;
pub use memory::MemorySink;

use crate::SinkError;

/// A destination for an exported recording.
///
/// During an export, [`on_chunk`](Self::on_chunk) is invoked once per
/// retained chunk in oldest-to-newest order, then
/// [`on_complete`](Self::on_complete) exactly once.
///
/// # Implementation notes
///
/// - Callbacks run synchronously **while the recording buffer's lock is
///   held**. They must be quick and must never call back into the buffer
///   being exported (the lock is not reentrant).
/// - [`Session::export`](crate::Session::export) runs the whole walk on the
///   blocking thread pool, so blocking I/O inside a sink is fine.
/// - Returning an error aborts the export; `on_complete` is not called.
///
/// # Example
///
/// ```
/// use rtp_mixer::{BufferSink, SinkError};
///
/// struct CountingSink {
///     chunks: usize,
/// }
///
/// impl BufferSink for CountingSink {
///     fn on_chunk(&mut self, samples: &[i16]) -> Result<(), SinkError> {
///         self.chunks += 1;
///         println!("chunk of {} samples", samples.len());
///         Ok(())
///     }
///
///     fn on_complete(&mut self) -> Result<(), SinkError> {
///         println!("export done after {} chunks", self.chunks);
///         Ok(())
///     }
/// }
/// ```
pub trait BufferSink: Send {
    /// Receives one chunk of recorded samples, oldest to newest.
    fn on_chunk(&mut self, samples: &[i16]) -> Result<(), SinkError>;

    /// Called exactly once after all chunks have been delivered.
    ///
    /// Use this to flush buffers or finalize files.
    fn on_complete(&mut self) -> Result<(), SinkError>;
}
