//! Session controller actor.
//!
//! All structural topology mutations - attaching and detaching participant
//! branches, mapping sources to endpoints, mute changes, export handoff -
//! happen on a single task that owns the [`Topology`] handle. Engine
//! discovery events and owner commands are both funneled into that task, so
//! no two mutations ever race.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::engine::{Branch, SourceEvent, Ssrc, Topology};
use crate::event::{EventCallback, SessionEvent};
use crate::pipeline::RecordingBuffer;
use crate::session::SessionState;
use crate::{SessionConfig, SessionError};

/// Commands accepted by the controller task.
pub(crate) enum ControllerCommand {
    /// Associates sources with endpoint identities; staged branches for the
    /// named ssrcs are bound and start recording.
    MapParticipants {
        mappings: HashMap<Ssrc, String>,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    /// Declares the full set of endpoints that should be audible; everyone
    /// else is muted.
    SetSpeakers {
        speakers: HashSet<String>,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    /// Mutes or unmutes a single endpoint.
    SetMute {
        endpoint: String,
        muted: bool,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    /// Hands out the endpoint's recording buffer for an export.
    Export {
        endpoint: String,
        reply: oneshot::Sender<Result<Arc<RecordingBuffer>, SessionError>>,
    },
    /// Halts the topology and ends the task.
    Stop { reply: oneshot::Sender<()> },
}

/// Per-endpoint state held by the controller.
///
/// The recording buffer outlives the branch: a participant who leaves (or
/// reconnects under a new ssrc) keeps their recorded history.
struct EndpointEntry {
    /// The ssrc currently bound to this endpoint, if any. Removal events
    /// for any other (superseded) ssrc must not touch the live branch.
    ssrc: Option<Ssrc>,
    branch: Option<Branch>,
    buffer: Arc<RecordingBuffer>,
}

/// The actor that serializes all session mutations.
pub(crate) struct Controller {
    session_id: String,
    topology: Box<dyn Topology>,
    sources: mpsc::Receiver<SourceEvent>,
    commands: mpsc::Receiver<ControllerCommand>,
    config: SessionConfig,
    state: Arc<SessionState>,
    event_callback: Option<EventCallback>,

    /// Source-to-endpoint identity, supplied by the owner.
    ssrc_to_endpoint: HashMap<Ssrc, String>,
    /// Endpoints that have ever been mapped, keyed by identity.
    endpoints: HashMap<String, EndpointEntry>,
    /// Branches attached for sources the owner has not mapped yet. Their
    /// audio joins the mix (muted) but is not recorded.
    unmapped: HashMap<Ssrc, Branch>,
    /// Endpoints currently allowed to be audible.
    speakers: HashSet<String>,
}

impl Controller {
    pub(crate) fn new(
        session_id: String,
        topology: Box<dyn Topology>,
        sources: mpsc::Receiver<SourceEvent>,
        commands: mpsc::Receiver<ControllerCommand>,
        config: SessionConfig,
        state: Arc<SessionState>,
        event_callback: Option<EventCallback>,
    ) -> Self {
        Self {
            session_id,
            topology,
            sources,
            commands,
            config,
            state,
            event_callback,
            ssrc_to_endpoint: HashMap::new(),
            endpoints: HashMap::new(),
            unmapped: HashMap::new(),
            speakers: HashSet::new(),
        }
    }

    /// Runs until a `Stop` command arrives or the command channel closes.
    ///
    /// Discovery events are drained before commands, so a command reply
    /// implies every earlier source event has been applied.
    pub(crate) async fn run(mut self) {
        let mut sources_open = true;
        loop {
            tokio::select! {
                biased;

                event = self.sources.recv(), if sources_open => match event {
                    Some(SourceEvent::Added { ssrc }) => self.on_source_added(ssrc),
                    Some(SourceEvent::Removed { ssrc }) => self.on_source_removed(ssrc),
                    None => sources_open = false,
                },

                cmd = self.commands.recv() => match cmd {
                    Some(ControllerCommand::Stop { reply }) => {
                        self.shutdown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        // Session handle dropped without an explicit stop.
                        self.shutdown();
                        break;
                    }
                },
            }
        }
    }

    fn handle_command(&mut self, cmd: ControllerCommand) {
        match cmd {
            ControllerCommand::MapParticipants { mappings, reply } => {
                let _ = reply.send(self.map_participants(mappings));
            }
            ControllerCommand::SetSpeakers { speakers, reply } => {
                let _ = reply.send(self.set_speakers(speakers));
            }
            ControllerCommand::SetMute {
                endpoint,
                muted,
                reply,
            } => {
                let _ = reply.send(self.set_mute(&endpoint, muted));
            }
            ControllerCommand::Export { endpoint, reply } => {
                let result = match self.endpoints.get(&endpoint) {
                    Some(entry) => Ok(Arc::clone(&entry.buffer)),
                    None => Err(SessionError::ParticipantNotFound { endpoint }),
                };
                let _ = reply.send(result);
            }
            ControllerCommand::Stop { .. } => unreachable!("handled in run()"),
        }
    }

    /// A new ssrc appeared on the receive path: attach its decode branch.
    ///
    /// The branch joins the mix muted. If the owner has already mapped the
    /// ssrc to an endpoint the branch is bound immediately; otherwise it is
    /// staged until a mapping arrives.
    fn on_source_added(&mut self, ssrc: Ssrc) {
        let branch = match self.topology.add_branch(ssrc) {
            Ok(branch) => branch,
            Err(err) => {
                warn!(
                    session_id = %self.session_id,
                    ssrc,
                    error = %err,
                    "failed to attach participant branch"
                );
                self.emit(SessionEvent::ParticipantLinkFailed {
                    ssrc,
                    reason: err.to_string(),
                });
                return;
            }
        };

        self.state.participants_joined.fetch_add(1, Ordering::Relaxed);
        info!(session_id = %self.session_id, ssrc, "participant joined");
        self.emit(SessionEvent::ParticipantJoined { ssrc });

        match self.ssrc_to_endpoint.get(&ssrc).cloned() {
            Some(endpoint) => self.bind_branch(ssrc, branch, endpoint),
            None => {
                debug!(session_id = %self.session_id, ssrc, "source not mapped yet, staging");
                self.unmapped.insert(ssrc, branch);
            }
        }
    }

    /// An ssrc went silent for good: detach its branch.
    ///
    /// The endpoint's recording buffer is retained so the history stays
    /// exportable until teardown. A removal for an ssrc the endpoint no
    /// longer holds (superseded by a reconnect) is stale and must not touch
    /// the live branch: a demux may time the old source out well after the
    /// participant rejoined.
    fn on_source_removed(&mut self, ssrc: Ssrc) {
        if let Some(branch) = self.unmapped.remove(&ssrc) {
            info!(session_id = %self.session_id, ssrc, "participant left");
            self.topology.remove_branch(branch);
            self.emit(SessionEvent::ParticipantLeft { ssrc });
            return;
        }

        if let Some(endpoint) = self.ssrc_to_endpoint.get(&ssrc) {
            if let Some(entry) = self.endpoints.get_mut(endpoint) {
                if entry.ssrc != Some(ssrc) {
                    debug!(
                        session_id = %self.session_id,
                        ssrc,
                        endpoint = %endpoint,
                        "ignoring stale removal for superseded source"
                    );
                    return;
                }
                entry.ssrc = None;
                if let Some(branch) = entry.branch.take() {
                    self.topology.remove_branch(branch);
                }
                info!(session_id = %self.session_id, ssrc, "participant left");
                self.emit(SessionEvent::ParticipantLeft { ssrc });
            }
        }
    }

    /// Applies owner-supplied ssrc-to-endpoint mappings.
    ///
    /// Staged branches for the named ssrcs are bound and start recording.
    /// Mappings merge with earlier ones; re-mapping an already bound source
    /// takes effect when that source next reconnects.
    fn map_participants(&mut self, mappings: HashMap<Ssrc, String>) -> Result<(), SessionError> {
        for (ssrc, endpoint) in mappings {
            self.ssrc_to_endpoint.insert(ssrc, endpoint.clone());
            if let Some(branch) = self.unmapped.remove(&ssrc) {
                self.bind_branch(ssrc, branch, endpoint);
            }
        }
        Ok(())
    }

    /// Binds a branch to its endpoint: starts recording into the endpoint's
    /// buffer and applies the current speaker set.
    ///
    /// On reconnect (the endpoint already had a branch) the old branch is
    /// muted and detached, and the existing buffer keeps accumulating, so a
    /// dropped-and-rejoined participant has one continuous history.
    fn bind_branch(&mut self, ssrc: Ssrc, branch: Branch, endpoint: String) {
        let chunk_capacity = self.config.chunk_capacity();
        let max_history = self.config.max_history;

        let entry = self
            .endpoints
            .entry(endpoint.clone())
            .or_insert_with(|| EndpointEntry {
                ssrc: None,
                branch: None,
                buffer: Arc::new(RecordingBuffer::new(chunk_capacity, max_history)),
            });

        let superseded = entry.ssrc.replace(ssrc);
        if let Some(old) = entry.branch.take() {
            debug!(
                session_id = %self.session_id,
                endpoint = %endpoint,
                ssrc,
                "endpoint reconnected, replacing branch"
            );
            let _ = self.topology.set_mute(old.mixer_input, true);
            self.topology.remove_branch(old);
        }

        let buffer = Arc::clone(&entry.buffer);

        // Drop the superseded source's mapping so its eventual removal
        // event cannot be mistaken for this endpoint's live source.
        if let Some(old_ssrc) = superseded {
            if old_ssrc != ssrc && self.ssrc_to_endpoint.get(&old_ssrc) == Some(&endpoint) {
                self.ssrc_to_endpoint.remove(&old_ssrc);
            }
        }
        let state = Arc::clone(&self.state);
        let session_id = self.session_id.clone();
        let callback_endpoint = endpoint.clone();
        let callback: crate::engine::CaptureCallback = Arc::new(move |samples, duration| {
            match buffer.append(samples, duration) {
                Ok(()) => {
                    state.chunks_recorded.fetch_add(1, Ordering::Relaxed);
                    state
                        .samples_recorded
                        .fetch_add(samples.len() as u64, Ordering::Relaxed);
                }
                Err(err) => {
                    warn!(
                        session_id = %session_id,
                        endpoint = %callback_endpoint,
                        error = %err,
                        "dropping capture chunk"
                    );
                }
            }
        });

        if let Err(err) = self.topology.connect_capture(branch.capture, callback) {
            warn!(
                session_id = %self.session_id,
                endpoint = %endpoint,
                ssrc,
                error = %err,
                "failed to connect capture, detaching branch"
            );
            self.topology.remove_branch(branch);
            if let Some(entry) = self.endpoints.get_mut(&endpoint) {
                entry.ssrc = None;
            }
            self.emit(SessionEvent::ParticipantLinkFailed {
                ssrc,
                reason: err.to_string(),
            });
            return;
        }

        let muted = !self.speakers.contains(&endpoint);
        let _ = self.topology.set_mute(branch.mixer_input, muted);

        if let Some(entry) = self.endpoints.get_mut(&endpoint) {
            entry.branch = Some(branch);
        }
    }

    /// Replaces the speaker set and re-applies mute state to every bound
    /// branch.
    fn set_speakers(&mut self, speakers: HashSet<String>) -> Result<(), SessionError> {
        self.speakers = speakers;
        for (endpoint, entry) in &self.endpoints {
            if let Some(branch) = entry.branch {
                let muted = !self.speakers.contains(endpoint);
                let _ = self.topology.set_mute(branch.mixer_input, muted);
            }
        }
        Ok(())
    }

    /// Mutes or unmutes one endpoint, keeping the speaker set consistent so
    /// the next `set_speakers` or reconnect doesn't silently revert it.
    fn set_mute(&mut self, endpoint: &str, muted: bool) -> Result<(), SessionError> {
        let entry = self
            .endpoints
            .get(endpoint)
            .ok_or_else(|| SessionError::ParticipantNotFound {
                endpoint: endpoint.to_string(),
            })?;

        if let Some(branch) = entry.branch {
            self.topology.set_mute(branch.mixer_input, muted)?;
        }

        if muted {
            self.speakers.remove(endpoint);
        } else {
            self.speakers.insert(endpoint.to_string());
        }
        Ok(())
    }

    /// Halts the topology, then releases all per-participant state.
    ///
    /// `Topology::stop` returns only once no capture callback will fire
    /// again, which is what makes dropping the buffers afterwards safe.
    fn shutdown(&mut self) {
        info!(session_id = %self.session_id, "stopping session");
        self.topology.stop();
        self.state.running.store(false, Ordering::SeqCst);
        self.endpoints.clear();
        self.unmapped.clear();
        self.ssrc_to_endpoint.clear();
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(callback) = &self.event_callback {
            callback(event);
        }
    }
}
