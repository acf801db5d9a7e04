//! Session handle and lifecycle.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::engine::Ssrc;
use crate::pipeline::{ControllerCommand, RecordingBuffer};
use crate::sink::{BufferSink, MemorySink};
use crate::{SessionError, SinkError};

/// Shared state between the session handle and its controller task.
pub(crate) struct SessionState {
    /// Cleared by the controller once the topology has been halted.
    pub(crate) running: AtomicBool,
    /// Branches attached over the session's lifetime.
    pub(crate) participants_joined: AtomicU64,
    /// Capture chunks appended to recording buffers.
    pub(crate) chunks_recorded: AtomicU64,
    /// Samples appended to recording buffers.
    pub(crate) samples_recorded: AtomicU64,
}

impl SessionState {
    pub(crate) fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            participants_joined: AtomicU64::new(0),
            chunks_recorded: AtomicU64::new(0),
            samples_recorded: AtomicU64::new(0),
        }
    }
}

/// Point-in-time statistics for a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    /// Participant branches attached over the session's lifetime.
    pub participants_joined: u64,
    /// Capture chunks recorded across all participants.
    pub chunks_recorded: u64,
    /// Samples recorded across all participants.
    pub samples_recorded: u64,
}

/// A running mixing session.
///
/// Created via [`RtpMixer::builder()`](crate::RtpMixer::builder). The handle
/// is the only way to mutate a session; every operation is forwarded to the
/// session's controller task and applied in order, so concurrent callers
/// never race on the topology.
///
/// Dropping the handle stops the session. Prefer the explicit
/// [`stop()`](Self::stop), which waits until the topology has actually
/// halted.
///
/// # Example
///
/// ```no_run
/// # use rtp_mixer::{RtpMixer, SessionError};
/// # use rtp_mixer::engine::MockEngine;
/// # use std::collections::HashMap;
/// # async fn example() -> Result<(), SessionError> {
/// # let engine = MockEngine::new();
/// let session = RtpMixer::builder()
///     .session_id("conf-1")
///     .sink("203.0.113.5", 5004)
///     .start(&engine)
///     .await?;
///
/// println!("receiving on port {}", session.local_port());
///
/// session
///     .map_participants(HashMap::from([(0x1234, "alice".to_string())]))
///     .await?;
///
/// let samples = session.export_samples("alice").await?;
/// println!("{} samples recorded", samples.len());
///
/// session.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct Session {
    id: String,
    local_port: u16,
    state: Arc<SessionState>,
    cmd_tx: mpsc::Sender<ControllerCommand>,
    controller_handle: Option<JoinHandle<()>>,
    monitor_handle: Option<JoinHandle<()>>,
}

impl Session {
    pub(crate) fn new(
        id: String,
        local_port: u16,
        state: Arc<SessionState>,
        cmd_tx: mpsc::Sender<ControllerCommand>,
        controller_handle: JoinHandle<()>,
        monitor_handle: JoinHandle<()>,
    ) -> Self {
        Self {
            id,
            local_port,
            state,
            cmd_tx,
            controller_handle: Some(controller_handle),
            monitor_handle: Some(monitor_handle),
        }
    }

    /// The session's identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The local port the session receives RTP on.
    ///
    /// Callers direct participants' streams here.
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Whether the session is still running.
    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    /// Current recording statistics.
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            participants_joined: self.state.participants_joined.load(Ordering::Relaxed),
            chunks_recorded: self.state.chunks_recorded.load(Ordering::Relaxed),
            samples_recorded: self.state.samples_recorded.load(Ordering::Relaxed),
        }
    }

    /// Associates RTP sources with endpoint identities.
    ///
    /// A source starts being recorded once it is mapped; audio arriving
    /// before the mapping is mixed (muted) but not recorded. Mappings merge
    /// with earlier ones. Mapping an endpoint that already had a source
    /// treats the new source as a reconnect: the endpoint's recorded history
    /// continues in the same buffer.
    pub async fn map_participants(
        &self,
        mappings: HashMap<Ssrc, String>,
    ) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(ControllerCommand::MapParticipants { mappings, reply })
            .await?;
        rx.await.map_err(|_| SessionError::SessionStopped)?
    }

    /// Declares the full set of audible endpoints.
    ///
    /// Every mapped endpoint in the set is unmuted; everyone else is muted.
    /// Applies immediately to connected participants and carries over to
    /// later joins and reconnects.
    pub async fn set_speakers(&self, speakers: HashSet<String>) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(ControllerCommand::SetSpeakers { speakers, reply })
            .await?;
        rx.await.map_err(|_| SessionError::SessionStopped)?
    }

    /// Applies a combined control update: merges source mappings, then
    /// replaces the speaker set.
    ///
    /// Equivalent to [`map_participants`](Self::map_participants) followed
    /// by [`set_speakers`](Self::set_speakers); matches the shape of a
    /// signaling-side update that carries both.
    pub async fn update(
        &self,
        mappings: HashMap<Ssrc, String>,
        speakers: HashSet<String>,
    ) -> Result<(), SessionError> {
        self.map_participants(mappings).await?;
        self.set_speakers(speakers).await
    }

    /// Mutes or unmutes a single endpoint's contribution to the mix.
    ///
    /// Recording is unaffected; a muted participant is still recorded.
    pub async fn set_mute(&self, endpoint: &str, muted: bool) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(ControllerCommand::SetMute {
            endpoint: endpoint.to_string(),
            muted,
            reply,
        })
        .await?;
        rx.await.map_err(|_| SessionError::SessionStopped)?
    }

    /// Streams an endpoint's retained recording into a sink.
    ///
    /// The export is a consistent snapshot of the endpoint's history at the
    /// moment it runs; recording continues concurrently. The sink runs on
    /// the blocking thread pool, so blocking I/O inside it is fine. Returns
    /// the sink so collected results can be read back out.
    ///
    /// # Errors
    ///
    /// [`SessionError::ParticipantNotFound`] if the endpoint was never
    /// mapped, [`SessionError::Export`] if the sink failed mid-export, or
    /// [`SessionError::SessionStopped`] if the session is gone.
    pub async fn export<S>(&self, endpoint: &str, sink: S) -> Result<S, SessionError>
    where
        S: BufferSink + 'static,
    {
        let buffer = self.recording_buffer(endpoint).await?;
        run_export(buffer, sink).await
    }

    /// Exports an endpoint's retained recording as one contiguous sample
    /// vector.
    ///
    /// Convenience wrapper around [`export`](Self::export) with a
    /// [`MemorySink`].
    pub async fn export_samples(&self, endpoint: &str) -> Result<Vec<i16>, SessionError> {
        let sink = self.export(endpoint, MemorySink::new()).await?;
        Ok(sink.into_samples())
    }

    pub(crate) async fn recording_buffer(
        &self,
        endpoint: &str,
    ) -> Result<Arc<RecordingBuffer>, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(ControllerCommand::Export {
            endpoint: endpoint.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| SessionError::SessionStopped)?
    }

    /// Stops the session, halting the topology and releasing every
    /// participant's state.
    ///
    /// Returns once the topology has actually stopped: no capture callback
    /// fires and no audio flows after this returns. Recorded history is
    /// released with the session; export before stopping.
    pub async fn stop(mut self) -> Result<(), SessionError> {
        debug!(session_id = %self.id, "stop requested");
        let (reply, rx) = oneshot::channel();
        self.send(ControllerCommand::Stop { reply }).await?;
        rx.await.map_err(|_| SessionError::SessionStopped)?;

        if let Some(handle) = self.controller_handle.take() {
            let _ = handle.await;
        }
        if let Some(handle) = self.monitor_handle.take() {
            let _ = handle.await;
        }
        Ok(())
    }

    async fn send(&self, cmd: ControllerCommand) -> Result<(), SessionError> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| SessionError::SessionStopped)
    }
}

/// Walks a recording buffer through a sink on the blocking thread pool.
///
/// Shared by [`Session::export`] and the manager's export path, which must
/// not hold its registry lock while a sink drains.
pub(crate) async fn run_export<S>(
    buffer: Arc<RecordingBuffer>,
    sink: S,
) -> Result<S, SessionError>
where
    S: BufferSink + 'static,
{
    let result = tokio::task::spawn_blocking(move || {
        let mut sink = sink;
        buffer.export(&mut sink).map(|()| sink)
    })
    .await
    .map_err(|err| SinkError::custom(format!("export task failed: {err}")))?;
    Ok(result?)
}

impl Drop for Session {
    fn drop(&mut self) {
        // Best-effort teardown for handles dropped without an explicit stop.
        if self.state.running.load(Ordering::SeqCst) {
            let (reply, _rx) = oneshot::channel();
            let _ = self.cmd_tx.try_send(ControllerCommand::Stop { reply });
        }
    }
}
