//! Builder for constructing mixing sessions.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::engine::{MediaEngine, TopologySpec};
use crate::event::EventCallback;
use crate::pipeline::{run_monitor, Controller};
use crate::session::{Session, SessionState};
use crate::{SessionConfig, SessionError};

/// Depth of the session command queue.
///
/// Commands are control-plane operations (mapping, mute, export); callers
/// await each reply, so the queue only needs to absorb short bursts.
const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Entry point for creating mixing sessions.
///
/// # Example
///
/// ```no_run
/// # use rtp_mixer::{RtpMixer, SessionError};
/// # use rtp_mixer::engine::MockEngine;
/// # async fn example() -> Result<(), SessionError> {
/// # let engine = MockEngine::new();
/// let session = RtpMixer::builder()
///     .session_id("conf-1")
///     .sink("203.0.113.5", 5004)
///     .start(&engine)
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct RtpMixer;

impl RtpMixer {
    /// Creates a new session builder with default configuration.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }
}

/// Builder for a mixing session.
///
/// A session id and a sink destination are required; everything else has
/// defaults. See [`SessionConfig`] for the tunables.
#[derive(Default)]
pub struct SessionBuilder {
    session_id: Option<String>,
    sink_host: Option<String>,
    sink_port: u16,
    seqnum_offset: u16,
    local_port: u16,
    config: SessionConfig,
    event_callback: Option<EventCallback>,
}

impl SessionBuilder {
    /// Creates a builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the session identifier (required).
    ///
    /// Must be unique among live sessions; the engine names the topology
    /// after it.
    pub fn session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    /// Sets the remote destination for the mixed stream (required).
    ///
    /// The host is not validated for reachability; an unreachable sink still
    /// yields a working session.
    pub fn sink(mut self, host: impl Into<String>, port: u16) -> Self {
        self.sink_host = Some(host.into());
        self.sink_port = port;
        self
    }

    /// Sets the sequence-number offset for the outbound RTP stream.
    pub fn seqnum_offset(mut self, offset: u16) -> Self {
        self.seqnum_offset = offset;
        self
    }

    /// Requests a specific local receive port. Default 0 (OS-assigned).
    pub fn local_port(mut self, port: u16) -> Self {
        self.local_port = port;
        self
    }

    /// Replaces the session configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers a callback for advisory session events.
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(crate::SessionEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(Arc::new(callback));
        self
    }

    fn validate(&self) -> Result<(), SessionError> {
        if self.session_id.is_none() {
            return Err(SessionError::MissingSessionId);
        }
        if self.sink_host.is_none() {
            return Err(SessionError::MissingSink);
        }
        if self.sink_port == 0 {
            return Err(SessionError::InvalidSinkPort {
                port: self.sink_port,
            });
        }
        Ok(())
    }

    /// Builds the topology, starts it playing, and spawns the session's
    /// controller and monitor tasks.
    ///
    /// # Errors
    ///
    /// Validation errors for missing/invalid builder fields;
    /// [`SessionError::ConstructionFailed`] or [`SessionError::LinkFailed`]
    /// when the engine cannot build the fixed topology;
    /// [`SessionError::StateChangeFailed`] when the topology refuses to
    /// play. On any failure nothing is left behind.
    pub async fn start(self, engine: &dyn MediaEngine) -> Result<Session, SessionError> {
        self.validate()?;

        // validate() checked these.
        let session_id = self.session_id.ok_or(SessionError::MissingSessionId)?;
        let sink_host = self.sink_host.ok_or(SessionError::MissingSink)?;

        let spec = TopologySpec {
            session_id: session_id.clone(),
            sink_host,
            sink_port: self.sink_port,
            seqnum_offset: self.seqnum_offset,
            local_port: self.local_port,
            clock_rate: self.config.capture_format.sample_rate,
            payload_type: self.config.payload_type,
        };

        let parts = engine.create_topology(&spec)?;
        parts.topology.play()?;
        let local_port = parts.topology.local_port();

        tracing::info!(
            session_id = %session_id,
            local_port,
            sink_port = self.sink_port,
            "session started"
        );

        let state = Arc::new(SessionState::new());
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

        let controller = Controller::new(
            session_id.clone(),
            parts.topology,
            parts.sources,
            cmd_rx,
            self.config,
            Arc::clone(&state),
            self.event_callback.clone(),
        );
        let controller_handle = tokio::spawn(controller.run());
        let monitor_handle = tokio::spawn(run_monitor(
            parts.bus,
            session_id.clone(),
            self.event_callback,
        ));

        Ok(Session::new(
            session_id,
            local_port,
            state,
            cmd_tx,
            controller_handle,
            monitor_handle,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockEngine;

    #[tokio::test]
    async fn test_missing_session_id() {
        let engine = MockEngine::new();
        let result = RtpMixer::builder().sink("127.0.0.1", 5004).start(&engine).await;
        assert!(matches!(result, Err(SessionError::MissingSessionId)));
    }

    #[tokio::test]
    async fn test_missing_sink() {
        let engine = MockEngine::new();
        let result = RtpMixer::builder().session_id("s").start(&engine).await;
        assert!(matches!(result, Err(SessionError::MissingSink)));
    }

    #[tokio::test]
    async fn test_sink_port_zero_rejected() {
        let engine = MockEngine::new();
        let result = RtpMixer::builder()
            .session_id("s")
            .sink("127.0.0.1", 0)
            .start(&engine)
            .await;
        assert!(matches!(
            result,
            Err(SessionError::InvalidSinkPort { port: 0 })
        ));
    }

    #[tokio::test]
    async fn test_start_reports_local_port() {
        let engine = MockEngine::new();
        let session = RtpMixer::builder()
            .session_id("s")
            .sink("203.0.113.5", 5004)
            .local_port(6000)
            .start(&engine)
            .await
            .unwrap();
        assert_eq!(session.local_port(), 6000);
        session.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_construction_failure_propagates() {
        let engine = MockEngine::new();
        engine.fail_next_construction("opusenc");
        let result = RtpMixer::builder()
            .session_id("s")
            .sink("127.0.0.1", 5004)
            .start(&engine)
            .await;
        assert!(matches!(
            result,
            Err(SessionError::ConstructionFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_play_failure_propagates() {
        let engine = MockEngine::new();
        engine.set_fail_play(true);
        let result = RtpMixer::builder()
            .session_id("s")
            .sink("127.0.0.1", 5004)
            .start(&engine)
            .await;
        assert!(matches!(
            result,
            Err(SessionError::StateChangeFailed { .. })
        ));
    }
}
