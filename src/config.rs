//! Configuration types for mixing sessions.

use std::time::Duration;

/// Format of the decoded audio arriving at each capture point.
///
/// The media engine decodes every participant's RTP stream to this format
/// before it reaches the mixer and the recording buffers. The default matches
/// the wire format of the transport path: 48kHz 16-bit mono.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of audio channels.
    pub channels: u16,
}

impl Default for CaptureFormat {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 1,
        }
    }
}

impl CaptureFormat {
    /// Returns the number of samples covering the given duration.
    pub fn samples_for(&self, duration: Duration) -> usize {
        (self.sample_rate as f64 * duration.as_secs_f64()) as usize * self.channels as usize
    }
}

/// Configuration for a mixing session.
///
/// Use [`SessionConfig::default()`] for sensible defaults, or customize as
/// needed.
///
/// # Example
///
/// ```
/// use rtp_mixer::SessionConfig;
/// use std::time::Duration;
///
/// let config = SessionConfig {
///     max_history: Duration::from_secs(60),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Format of decoded audio at the capture points.
    pub capture_format: CaptureFormat,

    /// Storage granularity of each recording buffer chunk.
    ///
    /// Incoming audio is coalesced into fixed-capacity chunks of this
    /// duration. Default: 1 second (96000 bytes at 48kHz 16-bit mono).
    pub chunk_duration: Duration,

    /// Maximum audio history retained per participant.
    ///
    /// Once a participant's recording buffer holds this much audio, the
    /// oldest chunk is evicted for every new chunk started.
    /// Default: 5 minutes.
    pub max_history: Duration,

    /// RTP payload type for the re-encoded outbound stream.
    ///
    /// Default: 111 (Opus).
    pub payload_type: u8,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capture_format: CaptureFormat::default(),
            chunk_duration: Duration::from_secs(1),
            max_history: Duration::from_secs(5 * 60),
            payload_type: 111,
        }
    }
}

impl SessionConfig {
    /// Per-chunk sample capacity of the recording buffers.
    pub fn chunk_capacity(&self) -> usize {
        self.capture_format.samples_for(self.chunk_duration)
    }
}

/// Configuration for a [`SessionManager`](crate::SessionManager).
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Sessions not re-created (keepalive) within this window are expired.
    ///
    /// Default: 60 seconds.
    pub idle_timeout: Duration,

    /// How often the expiry sweep runs.
    ///
    /// Default: 60 seconds.
    pub sweep_interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_format_default() {
        let format = CaptureFormat::default();
        assert_eq!(format.sample_rate, 48000);
        assert_eq!(format.channels, 1);
    }

    #[test]
    fn test_samples_for_duration() {
        let format = CaptureFormat::default();
        assert_eq!(format.samples_for(Duration::from_secs(1)), 48000);
        assert_eq!(format.samples_for(Duration::from_millis(100)), 4800);
    }

    #[test]
    fn test_samples_for_stereo() {
        let format = CaptureFormat {
            sample_rate: 48000,
            channels: 2,
        };
        assert_eq!(format.samples_for(Duration::from_secs(1)), 96000);
    }

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.max_history, Duration::from_secs(300));
        assert_eq!(config.payload_type, 111);
        // 1 second of 48kHz mono = 48000 samples = 96000 bytes
        assert_eq!(config.chunk_capacity(), 48000);
    }

    #[test]
    fn test_manager_config_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
    }
}
