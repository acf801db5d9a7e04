//! Mock media engine for testing without a media stack.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{
    Branch, BusEvent, CaptureCallback, CaptureId, EngineError, MediaEngine, MixerInputId,
    SourceEvent, Ssrc, Topology, TopologyParts, TopologySpec, TopologyState,
};

/// Capacity of the source-discovery and bus channels.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// First ephemeral port handed out when a spec requests port 0.
const BASE_LOCAL_PORT: u16 = 50000;

/// A scriptable [`MediaEngine`] for tests.
///
/// Created topologies do nothing on their own; tests drive them through a
/// [`MockTopologyHandle`] - injecting source discovery, pushing decoded
/// samples into connected capture callbacks, and emitting bus messages.
///
/// # Example
///
/// ```no_run
/// use rtp_mixer::engine::MockEngine;
///
/// let engine = MockEngine::new();
///
/// // ... create a session against `engine`, then:
/// let topo = engine.topology("conf-1").unwrap();
/// topo.add_source(42);
/// ```
#[derive(Clone, Default)]
pub struct MockEngine {
    inner: Arc<EngineInner>,
}

#[derive(Default)]
struct EngineInner {
    next_port: AtomicU16,
    fail_construction: Mutex<Option<String>>,
    fail_play: AtomicBool,
    topologies: Mutex<HashMap<String, Arc<TopologyInner>>>,
}

impl MockEngine {
    /// Creates a new mock engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `create_topology` call fail as if the named element
    /// could not be instantiated.
    pub fn fail_next_construction(&self, element: impl Into<String>) {
        *self.inner.fail_construction.lock() = Some(element.into());
    }

    /// Makes every `play()` call fail until cleared.
    pub fn set_fail_play(&self, fail: bool) {
        self.inner.fail_play.store(fail, Ordering::SeqCst);
    }

    /// Returns the control handle for the topology created under the given
    /// session id, if any.
    pub fn topology(&self, session_id: &str) -> Option<MockTopologyHandle> {
        self.inner
            .topologies
            .lock()
            .get(session_id)
            .cloned()
            .map(MockTopologyHandle)
    }
}

impl MediaEngine for MockEngine {
    fn create_topology(&self, spec: &TopologySpec) -> Result<TopologyParts, EngineError> {
        if let Some(element) = self.inner.fail_construction.lock().take() {
            return Err(EngineError::Construction {
                element,
                reason: "element factory returned nothing".to_string(),
            });
        }

        let local_port = if spec.local_port != 0 {
            spec.local_port
        } else {
            BASE_LOCAL_PORT + self.inner.next_port.fetch_add(1, Ordering::SeqCst)
        };

        let (source_tx, source_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (bus_tx, bus_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let inner = Arc::new(TopologyInner {
            local_port,
            fail_play: self.inner.fail_play.load(Ordering::SeqCst),
            state: Mutex::new(TopologyState::Stopped),
            source_tx,
            bus_tx: Mutex::new(Some(bus_tx)),
            next_handle: AtomicU64::new(1),
            fail_next_branch: AtomicBool::new(false),
            branches: Mutex::new(HashMap::new()),
            removed_branches: AtomicU64::new(0),
        });

        self.inner
            .topologies
            .lock()
            .insert(spec.session_id.clone(), Arc::clone(&inner));

        Ok(TopologyParts {
            topology: Box::new(MockTopology(inner)),
            sources: source_rx,
            bus: bus_rx,
        })
    }
}

struct BranchState {
    branch: Branch,
    callback: Option<CaptureCallback>,
    muted: bool,
}

struct TopologyInner {
    local_port: u16,
    fail_play: bool,
    state: Mutex<TopologyState>,
    source_tx: mpsc::Sender<SourceEvent>,
    /// Taken on stop so the bus channel closes and its consumers exit.
    bus_tx: Mutex<Option<mpsc::Sender<BusEvent>>>,
    next_handle: AtomicU64,
    fail_next_branch: AtomicBool,
    branches: Mutex<HashMap<Ssrc, BranchState>>,
    removed_branches: AtomicU64,
}

impl TopologyInner {
    fn emit_bus(&self, event: BusEvent) {
        // Dropping on overflow mirrors a bus nobody is watching.
        if let Some(bus_tx) = &*self.bus_tx.lock() {
            let _ = bus_tx.try_send(event);
        }
    }
}

struct MockTopology(Arc<TopologyInner>);

impl Topology for MockTopology {
    fn play(&self) -> Result<(), EngineError> {
        if self.0.fail_play {
            return Err(EngineError::StateChange {
                target: TopologyState::Playing,
                reason: "transition refused".to_string(),
            });
        }
        let old = {
            let mut state = self.0.state.lock();
            std::mem::replace(&mut *state, TopologyState::Playing)
        };
        self.0.emit_bus(BusEvent::StateChanged {
            old,
            new: TopologyState::Playing,
            pending: None,
            top_level: true,
        });
        Ok(())
    }

    fn stop(&self) {
        let old = {
            let mut state = self.0.state.lock();
            std::mem::replace(&mut *state, TopologyState::Stopped)
        };
        // Disconnect every capture so no callback can fire after stop returns.
        self.0.branches.lock().clear();
        self.0.emit_bus(BusEvent::StateChanged {
            old,
            new: TopologyState::Stopped,
            pending: None,
            top_level: true,
        });
        // Closing the bus after the final transition lets consumers drain
        // it and then observe end-of-channel.
        self.0.bus_tx.lock().take();
    }

    fn state(&self) -> TopologyState {
        *self.0.state.lock()
    }

    fn local_port(&self) -> u16 {
        self.0.local_port
    }

    fn add_branch(&self, ssrc: Ssrc) -> Result<Branch, EngineError> {
        if self.0.fail_next_branch.swap(false, Ordering::SeqCst) {
            return Err(EngineError::Link {
                from: format!("demux.src_{ssrc}"),
                to: "decodebin.sink".to_string(),
                reason: "pad link refused".to_string(),
            });
        }
        let id = self.0.next_handle.fetch_add(2, Ordering::SeqCst);
        let branch = Branch {
            capture: CaptureId(id),
            mixer_input: MixerInputId(id + 1),
        };
        self.0.branches.lock().insert(
            ssrc,
            BranchState {
                branch,
                callback: None,
                muted: true, // mixer inputs start muted
            },
        );
        Ok(branch)
    }

    fn remove_branch(&self, branch: Branch) {
        let mut branches = self.0.branches.lock();
        branches.retain(|_, state| state.branch.mixer_input != branch.mixer_input);
        self.0.removed_branches.fetch_add(1, Ordering::SeqCst);
    }

    fn connect_capture(
        &self,
        capture: CaptureId,
        callback: CaptureCallback,
    ) -> Result<(), EngineError> {
        let mut branches = self.0.branches.lock();
        let state = branches
            .values_mut()
            .find(|state| state.branch.capture == capture)
            .ok_or(EngineError::UnknownHandle)?;
        state.callback = Some(callback);
        Ok(())
    }

    fn set_mute(&self, input: MixerInputId, mute: bool) -> Result<(), EngineError> {
        let mut branches = self.0.branches.lock();
        let state = branches
            .values_mut()
            .find(|state| state.branch.mixer_input == input)
            .ok_or(EngineError::UnknownHandle)?;
        state.muted = mute;
        Ok(())
    }
}

/// Test-side control handle for one mock topology.
///
/// Obtained from [`MockEngine::topology`]. Methods act as the media engine's
/// own threads would: discovery events land on the controller's queue and
/// sample pushes run the registered capture callback inline.
#[derive(Clone)]
pub struct MockTopologyHandle(Arc<TopologyInner>);

impl MockTopologyHandle {
    /// Announces a new ssrc on the receive path.
    pub fn add_source(&self, ssrc: Ssrc) {
        let _ = self.0.source_tx.try_send(SourceEvent::Added { ssrc });
    }

    /// Announces that an ssrc stopped sending.
    pub fn remove_source(&self, ssrc: Ssrc) {
        let _ = self.0.source_tx.try_send(SourceEvent::Removed { ssrc });
    }

    /// Delivers decoded audio to the ssrc's capture point.
    ///
    /// Returns `true` if a connected callback consumed the samples. Audio
    /// pushed before `connect_capture`, after branch removal, or after stop
    /// is discarded, exactly like a capture point with no listener.
    pub fn push_samples(&self, ssrc: Ssrc, samples: &[i16], duration: Duration) -> bool {
        if *self.0.state.lock() != TopologyState::Playing {
            return false;
        }
        let callback = {
            let branches = self.0.branches.lock();
            branches.get(&ssrc).and_then(|state| state.callback.clone())
        };
        match callback {
            Some(callback) => {
                callback(samples, duration);
                true
            }
            None => false,
        }
    }

    /// Emits a runtime error on the bus.
    pub fn emit_error(&self, element: &str, message: &str) {
        self.0.emit_bus(BusEvent::Error {
            element: element.to_string(),
            message: message.to_string(),
            debug: None,
        });
    }

    /// Emits an end-of-stream message on the bus.
    pub fn emit_eos(&self) {
        self.0.emit_bus(BusEvent::EndOfStream);
    }

    /// Emits a state-changed message, optionally from a child element.
    pub fn emit_state_changed(&self, old: TopologyState, new: TopologyState, top_level: bool) {
        self.0.emit_bus(BusEvent::StateChanged {
            old,
            new,
            pending: None,
            top_level,
        });
    }

    /// Makes the next `add_branch` call fail with a link error.
    pub fn fail_next_branch(&self) {
        self.0.fail_next_branch.store(true, Ordering::SeqCst);
    }

    /// Current topology state.
    pub fn state(&self) -> TopologyState {
        *self.0.state.lock()
    }

    /// Number of attached branches.
    pub fn branch_count(&self) -> usize {
        self.0.branches.lock().len()
    }

    /// Number of branches detached so far.
    pub fn removed_branch_count(&self) -> u64 {
        self.0.removed_branches.load(Ordering::SeqCst)
    }

    /// Mute state of the ssrc's mixer input, if the branch exists.
    pub fn is_muted(&self, ssrc: Ssrc) -> Option<bool> {
        self.0.branches.lock().get(&ssrc).map(|state| state.muted)
    }

    /// Whether the ssrc's capture point has a connected callback.
    pub fn capture_connected(&self, ssrc: Ssrc) -> bool {
        self.0
            .branches
            .lock()
            .get(&ssrc)
            .is_some_and(|state| state.callback.is_some())
    }
}
