//! Tokio mpsc channel export sink.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::sink::BufferSink;
use crate::{AudioChunk, SinkError};

/// A sink that forwards exported chunks to a tokio mpsc channel.
///
/// Each retained chunk becomes one [`AudioChunk`] carrying a running
/// timestamp relative to the start of the export, so a live consumer can
/// process the history incrementally instead of waiting for the whole
/// buffer.
///
/// Chunks are delivered with `blocking_send`; [`Session::export`] runs the
/// sink on the blocking thread pool, so a slow consumer backpressures the
/// export rather than losing audio.
///
/// [`Session::export`]: crate::Session::export
///
/// # Example
///
/// ```
/// use rtp_mixer::{AudioChunk, ChannelSink};
/// use tokio::sync::mpsc;
///
/// let (tx, mut rx) = mpsc::channel::<AudioChunk>(100);
/// let sink = ChannelSink::new(tx, 48000, 1);
///
/// // Pass sink to Session::export, then receive chunks:
/// // while let Some(chunk) = rx.recv().await { ... }
/// # let _ = sink;
/// ```
pub struct ChannelSink {
    sender: mpsc::Sender<AudioChunk>,
    sample_rate: u32,
    channels: u16,
    position: Duration,
}

impl ChannelSink {
    /// Creates a new channel sink.
    ///
    /// `sample_rate` and `channels` describe the recorded audio (the
    /// session's capture format) and are stamped onto every forwarded
    /// chunk.
    pub fn new(sender: mpsc::Sender<AudioChunk>, sample_rate: u32, channels: u16) -> Self {
        Self {
            sender,
            sample_rate,
            channels,
            position: Duration::ZERO,
        }
    }
}

impl BufferSink for ChannelSink {
    fn on_chunk(&mut self, samples: &[i16]) -> Result<(), SinkError> {
        let chunk = AudioChunk::new(
            samples.to_vec(),
            self.position,
            self.sample_rate,
            self.channels,
        );
        self.position += chunk.duration();
        self.sender
            .blocking_send(chunk)
            .map_err(|_| SinkError::ChannelClosed)
    }

    fn on_complete(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_forwards_chunks_with_timestamps() {
        let (tx, mut rx) = mpsc::channel::<AudioChunk>(10);

        tokio::task::spawn_blocking(move || {
            let mut sink = ChannelSink::new(tx, 48000, 1);
            sink.on_chunk(&vec![1i16; 4800]).unwrap(); // 100ms
            sink.on_chunk(&vec![2i16; 2400]).unwrap(); // 50ms
            sink.on_complete().unwrap();
        })
        .await
        .unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.timestamp, Duration::ZERO);
        assert_eq!(first.samples.len(), 4800);
        assert_eq!(first.sample_rate, 48000);

        let second = rx.recv().await.unwrap();
        assert_eq!(second.timestamp, Duration::from_millis(100));
        assert_eq!(second.samples.len(), 2400);
    }

    #[tokio::test]
    async fn test_channel_sink_closed_receiver() {
        let (tx, rx) = mpsc::channel::<AudioChunk>(10);
        drop(rx);

        let result = tokio::task::spawn_blocking(move || {
            let mut sink = ChannelSink::new(tx, 48000, 1);
            sink.on_chunk(&[1, 2, 3])
        })
        .await
        .unwrap();

        assert!(matches!(result, Err(SinkError::ChannelClosed)));
    }
}
