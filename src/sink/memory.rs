//! In-memory export sink.

use crate::sink::BufferSink;
use crate::SinkError;

/// A sink that collects an export into a single sample vector.
///
/// This is the simplest way to get a participant's recorded history as one
/// contiguous buffer, e.g. to hand to a transcription service.
///
/// # Example
///
/// ```
/// use rtp_mixer::MemorySink;
///
/// let sink = MemorySink::new();
/// // ... pass to Session::export, then:
/// // let samples = sink.into_samples();
/// # let _ = sink;
/// ```
#[derive(Debug, Default)]
pub struct MemorySink {
    samples: Vec<i16>,
    complete: bool,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a sink with pre-allocated capacity.
    ///
    /// Useful when the expected export size is known (e.g. five minutes of
    /// 48kHz mono is 14.4 million samples).
    pub fn with_capacity(samples: usize) -> Self {
        Self {
            samples: Vec::with_capacity(samples),
            complete: false,
        }
    }

    /// The collected samples so far.
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Whether the export finished.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Consumes the sink, returning the collected samples.
    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }
}

impl BufferSink for MemorySink {
    fn on_chunk(&mut self, samples: &[i16]) -> Result<(), SinkError> {
        self.samples.extend_from_slice(samples);
        Ok(())
    }

    fn on_complete(&mut self) -> Result<(), SinkError> {
        self.complete = true;
        Ok(())
    }
}
