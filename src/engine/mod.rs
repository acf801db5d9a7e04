//! Boundary contract for the external media-processing engine.
//!
//! The RTP transport, jitter buffering, Opus decode/encode and the mixing
//! element itself live inside an opaque engine. This crate drives that engine
//! exclusively through the [`MediaEngine`] and [`Topology`] traits, and the
//! engine talks back through three channels:
//!
//! - a source-discovery stream ([`SourceEvent`]) announcing ssrcs as they
//!   appear and disappear on the receive path
//! - a bus stream ([`BusEvent`]) carrying advisory runtime messages
//! - per-participant capture callbacks delivering decoded audio
//!
//! [`MockEngine`](crate::engine::MockEngine) provides a scriptable
//! implementation for testing without any media stack.

mod mock;

pub use mock::{MockEngine, MockTopologyHandle};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

/// Session-relative RTP source identifier.
pub type Ssrc = u32;

/// Parameters for the fixed segments of a session topology.
///
/// These are caller-supplied and validated only by the engine; in particular
/// the sink host is never checked for reachability - an unreachable sink
/// still yields a successfully created topology.
#[derive(Debug, Clone)]
pub struct TopologySpec {
    /// Process-unique session identifier; names the topology.
    pub session_id: String,
    /// Remote host receiving the mixed, re-encoded stream.
    pub sink_host: String,
    /// Remote port for the RTP data stream (the RTCP control stream is sent
    /// alongside it).
    pub sink_port: u16,
    /// Sequence-number offset applied to the outbound RTP stream.
    pub seqnum_offset: u16,
    /// Requested local receive port; 0 means OS-assigned.
    pub local_port: u16,
    /// RTP clock rate of the inbound streams.
    pub clock_rate: u32,
    /// RTP payload type of the outbound stream.
    pub payload_type: u8,
}

/// Lifecycle states of a topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyState {
    /// Built but not processing.
    Stopped,
    /// Resources acquired, not yet flowing.
    Ready,
    /// Media flowing.
    Playing,
}

/// Advisory message from the engine's bus.
///
/// No bus event causes automatic session teardown.
#[derive(Debug, Clone)]
pub enum BusEvent {
    /// An element reported a runtime error. The session continues.
    Error {
        /// Name of the reporting element.
        element: String,
        /// Human-readable error message.
        message: String,
        /// Additional debugging detail, if any.
        debug: Option<String>,
    },
    /// The stream ended. Informational.
    EndOfStream,
    /// An element changed state.
    StateChanged {
        /// Previous state.
        old: TopologyState,
        /// New state.
        new: TopologyState,
        /// Pending state if the transition is still in progress.
        pending: Option<TopologyState>,
        /// `true` when the message came from the top-level topology rather
        /// than one of its elements. Only top-level transitions are
        /// forwarded to the session owner.
        top_level: bool,
    },
}

/// Source discovery event from the receive-path demultiplexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEvent {
    /// A new ssrc started sending data.
    Added {
        /// The discovered source.
        ssrc: Ssrc,
    },
    /// An ssrc stopped sending data.
    Removed {
        /// The vanished source.
        ssrc: Ssrc,
    },
}

/// Opaque handle to one mixer input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MixerInputId(pub u64);

/// Opaque handle to one capture point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaptureId(pub u64);

/// Handles for one participant's decode/capture branch.
///
/// Returned by [`Topology::add_branch`]. The mixer input starts **muted** so
/// a just-joined participant never pops into the mix before the controller's
/// owner explicitly unmutes it.
#[derive(Debug, Clone, Copy)]
pub struct Branch {
    /// The branch's capture point.
    pub capture: CaptureId,
    /// The branch's mixer input.
    pub mixer_input: MixerInputId,
}

/// Callback receiving decoded audio at a capture point.
///
/// Invoked on an engine-owned thread, concurrently with control-path calls.
/// Implementations must be cheap and must not block.
pub type CaptureCallback = Arc<dyn Fn(&[i16], Duration) + Send + Sync>;

/// Errors reported by the media engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A required element could not be instantiated.
    #[error("element '{element}' could not be created: {reason}")]
    Construction {
        /// Name of the element.
        element: String,
        /// Why construction failed.
        reason: String,
    },

    /// Two points could not be linked.
    #[error("link failed ({from} -> {to}): {reason}")]
    Link {
        /// Upstream point.
        from: String,
        /// Downstream point.
        to: String,
        /// Why the link failed.
        reason: String,
    },

    /// A state transition failed.
    #[error("state change to {target:?} failed: {reason}")]
    StateChange {
        /// The state that could not be reached.
        target: TopologyState,
        /// Why the transition failed.
        reason: String,
    },

    /// A branch or input handle is no longer valid.
    #[error("unknown branch or input handle")]
    UnknownHandle,
}

/// Everything the engine hands back for one created topology.
pub struct TopologyParts {
    /// Control surface for the topology.
    pub topology: Box<dyn Topology>,
    /// Source discovery events from the demultiplexer.
    pub sources: mpsc::Receiver<SourceEvent>,
    /// Advisory bus messages.
    pub bus: mpsc::Receiver<BusEvent>,
}

/// Factory for session topologies.
pub trait MediaEngine: Send + Sync {
    /// Builds the fixed topology segments for one session: receive ->
    /// demultiplex on the inbound side, mixer -> encode -> RTP session ->
    /// data + control sinks on the outbound side.
    ///
    /// Returns the topology in the [`Stopped`](TopologyState::Stopped) state.
    /// Fails if any element cannot be instantiated or the static links
    /// cannot be made; on failure no partial topology is retained.
    fn create_topology(&self, spec: &TopologySpec) -> Result<TopologyParts, EngineError>;
}

/// Control surface for one running session topology.
///
/// All methods may be called from any thread; the engine serializes its own
/// internals.
pub trait Topology: Send + Sync {
    /// Transitions the topology to [`Playing`](TopologyState::Playing).
    fn play(&self) -> Result<(), EngineError>;

    /// Halts the topology synchronously.
    ///
    /// On return, no capture callback or discovery event will fire again.
    /// This ordering is what makes dropping the recording buffers afterwards
    /// safe. The bus channel closes (after any final state transition) so
    /// tasks draining it run to completion.
    fn stop(&self);

    /// Current lifecycle state.
    fn state(&self) -> TopologyState;

    /// The local receive port bound by the inbound transport element.
    ///
    /// Meaningful once the topology is playing; when [`TopologySpec`]
    /// requested port 0 this is the OS-assigned ephemeral port.
    fn local_port(&self) -> u16;

    /// Attaches a decode -> tee -> capture branch for a newly discovered
    /// ssrc and links it to a freshly requested mixer input.
    ///
    /// The mixer input is created muted. Failure is terminal for this branch
    /// only; the rest of the topology is unaffected.
    fn add_branch(&self, ssrc: Ssrc) -> Result<Branch, EngineError>;

    /// Detaches a participant branch from the running topology.
    fn remove_branch(&self, branch: Branch);

    /// Connects a callback to a branch's capture point.
    ///
    /// Decoded audio is discarded at the capture point until a callback is
    /// connected; recording effectively starts here.
    fn connect_capture(
        &self,
        capture: CaptureId,
        callback: CaptureCallback,
    ) -> Result<(), EngineError>;

    /// Mutes or unmutes one mixer input, independent of whether its capture
    /// point keeps recording.
    fn set_mute(&self, input: MixerInputId, mute: bool) -> Result<(), EngineError>;
}
