//! Error types for rtp-mixer.
//!
//! Errors are split into two categories:
//! - **Fatal errors** ([`SessionError`]): Prevent a session from being
//!   created, or reject an operation on a torn-down session
//! - **Advisory conditions**: Mid-session engine errors surfaced via
//!   [`EventCallback`](crate::EventCallback); the session keeps running

use std::path::PathBuf;

use crate::engine::{EngineError, TopologyState};

/// Fatal errors returned from session construction and control operations.
///
/// Construction-time failures abort the operation with no partial state left
/// behind. Mid-session media errors are *not* represented here - they are
/// advisory and flow through the event callback instead. No operation is
/// retried automatically; retry policy belongs to the caller.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No session identifier was supplied to the builder.
    #[error("no session id configured - call session_id() before start()")]
    MissingSessionId,

    /// No sink destination was supplied to the builder.
    #[error("no sink configured - call sink() with the remote host and port")]
    MissingSink,

    /// The sink port is outside the valid range.
    ///
    /// Port 0 means "any" for the local receive port, but is never a valid
    /// remote sink port.
    #[error("invalid sink port {port} (must be 1-65535)")]
    InvalidSinkPort {
        /// The rejected port value.
        port: u16,
    },

    /// A required topology element could not be built.
    ///
    /// Fatal to session creation; the topology is released with no partial
    /// state.
    #[error("element '{element}' could not be created: {reason}")]
    ConstructionFailed {
        /// Name of the element that failed to build.
        element: String,
        /// Why construction failed.
        reason: String,
    },

    /// Two topology points could not be connected.
    ///
    /// Fatal to session creation when it affects the fixed segments. A link
    /// failure inside a participant branch is advisory instead and surfaces
    /// as [`SessionEvent::ParticipantLinkFailed`](crate::SessionEvent::ParticipantLinkFailed).
    #[error("link failed ({from} -> {to}): {reason}")]
    LinkFailed {
        /// Upstream point of the failed link.
        from: String,
        /// Downstream point of the failed link.
        to: String,
        /// Why the link failed.
        reason: String,
    },

    /// The topology could not reach the required running state.
    #[error("could not reach {target:?} state: {reason}")]
    StateChangeFailed {
        /// The state that could not be reached.
        target: TopologyState,
        /// Why the transition failed.
        reason: String,
    },

    /// The session has already been torn down.
    ///
    /// Operating on a stopped session is a checked precondition violation,
    /// never undefined behavior.
    #[error("session has been stopped")]
    SessionStopped,

    /// No participant with the given endpoint id is known to the session.
    #[error("unknown endpoint: {endpoint}")]
    ParticipantNotFound {
        /// The endpoint id that wasn't found.
        endpoint: String,
    },

    /// No session with the given id is registered with the manager.
    #[error("unknown session: {id}")]
    SessionNotFound {
        /// The session id that wasn't found.
        id: String,
    },

    /// An export sink failed while receiving the recorded audio.
    #[error("export failed: {0}")]
    Export(#[from] SinkError),
}

impl From<EngineError> for SessionError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Construction { element, reason } => {
                Self::ConstructionFailed { element, reason }
            }
            EngineError::Link { from, to, reason } => Self::LinkFailed { from, to, reason },
            EngineError::StateChange { target, reason } => {
                Self::StateChangeFailed { target, reason }
            }
            EngineError::UnknownHandle => Self::SessionStopped,
        }
    }
}

/// Errors from a participant's recording buffer.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BufferError {
    /// A single appended chunk exceeds the per-chunk capacity.
    ///
    /// Oversized inputs are rejected outright rather than silently split or
    /// overflowed; the capture path drops the chunk and reports it.
    #[error("chunk of {size} samples exceeds per-chunk capacity of {capacity}")]
    ChunkTooLarge {
        /// Number of samples in the rejected chunk.
        size: usize,
        /// Per-chunk sample capacity of the buffer.
        capacity: usize,
    },
}

/// Errors that can occur within a [`BufferSink`](crate::BufferSink)
/// implementation.
///
/// A sink error aborts the export that triggered it; the recording buffer
/// itself is unaffected and can be exported again.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// A write operation failed.
    #[error("write failed: {reason}")]
    WriteFailed {
        /// Description of what went wrong.
        reason: String,
    },

    /// File I/O error.
    #[error("file error: {path}: {source}")]
    FileError {
        /// Path to the file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The receiving channel was closed.
    #[error("channel closed")]
    ChannelClosed,

    /// Custom error for user-implemented sinks.
    #[error("{0}")]
    Custom(String),
}

impl SinkError {
    /// Creates a custom sink error with the given message.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// Creates a write failed error with the given reason.
    pub fn write_failed(reason: impl Into<String>) -> Self {
        Self::WriteFailed {
            reason: reason.into(),
        }
    }

    /// Creates a file error for the given path.
    pub fn file_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileError {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_display() {
        let err = SessionError::InvalidSinkPort { port: 0 };
        assert_eq!(err.to_string(), "invalid sink port 0 (must be 1-65535)");
    }

    #[test]
    fn test_participant_not_found_display() {
        let err = SessionError::ParticipantNotFound {
            endpoint: "alice".to_string(),
        };
        assert_eq!(err.to_string(), "unknown endpoint: alice");
    }

    #[test]
    fn test_engine_error_mapping() {
        let err: SessionError = EngineError::Construction {
            element: "opusenc".to_string(),
            reason: "not available".to_string(),
        }
        .into();
        assert!(matches!(err, SessionError::ConstructionFailed { .. }));

        let err: SessionError = EngineError::Link {
            from: "mixer".to_string(),
            to: "opusenc".to_string(),
            reason: "caps mismatch".to_string(),
        }
        .into();
        assert!(matches!(err, SessionError::LinkFailed { .. }));
    }

    #[test]
    fn test_buffer_error_display() {
        let err = BufferError::ChunkTooLarge {
            size: 100000,
            capacity: 48000,
        };
        assert!(err.to_string().contains("100000"));
        assert!(err.to_string().contains("48000"));
    }

    #[test]
    fn test_sink_error_custom() {
        let err = SinkError::custom("something went wrong");
        assert_eq!(err.to_string(), "something went wrong");
    }

    #[test]
    fn test_sink_error_file_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = SinkError::file_error("/tmp/export.wav", io_err);
        assert!(err.to_string().contains("/tmp/export.wav"));
    }
}
