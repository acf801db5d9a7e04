//! Advisory session events.
//!
//! Events are non-fatal notifications about session behavior. The session
//! keeps running after every event - they exist for logging, metrics, and
//! for the host to react to participant lifecycle, not for error handling.

use std::sync::Arc;

use crate::engine::{Ssrc, TopologyState};

/// Advisory events emitted while a session runs.
///
/// No event causes automatic teardown. Use the [`EventCallback`] registered
/// on the builder to log these or to drive host-side bookkeeping (e.g.
/// unmuting a participant after [`ParticipantJoined`]).
///
/// [`ParticipantJoined`]: SessionEvent::ParticipantJoined
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The media engine reported a runtime error from an element.
    ///
    /// The session continues; whether to tear it down is the owner's call.
    EngineError {
        /// Name of the element that reported the error.
        element: String,
        /// Human-readable error message.
        message: String,
        /// Additional debugging detail, if the engine supplied any.
        debug: Option<String>,
    },

    /// The topology reached end-of-stream. Informational.
    EndOfStream,

    /// The top-level topology changed state.
    ///
    /// Transitions of individual elements are filtered out; only the
    /// session's own topology is reported.
    StateChanged {
        /// Previous state.
        old: TopologyState,
        /// New state.
        new: TopologyState,
        /// Pending state if the transition is still in progress.
        pending: Option<TopologyState>,
    },

    /// A participant's branch was attached and linked to a muted mixer
    /// input.
    ///
    /// The host typically responds by mapping the ssrc to an endpoint
    /// (which starts recording) and/or unmuting the participant.
    ParticipantJoined {
        /// The newly discovered source.
        ssrc: Ssrc,
    },

    /// A participant's source disappeared and its branch was detached.
    ///
    /// The participant's recorded audio stays exportable until teardown.
    ParticipantLeft {
        /// The vanished source.
        ssrc: Ssrc,
    },

    /// A participant's branch could not be attached or linked.
    ///
    /// Terminal for that participant only - from the mix's perspective the
    /// join never happened. Not retried.
    ParticipantLinkFailed {
        /// The source whose branch failed.
        ssrc: Ssrc,
        /// Why the attach/link failed.
        reason: String,
    },
}

/// Callback type for receiving session events.
///
/// Register via [`SessionBuilder::on_event()`].
///
/// [`SessionBuilder::on_event()`]: crate::SessionBuilder::on_event
///
/// # Example
///
/// ```ignore
/// let session = RtpMixer::builder()
///     .on_event(|event| {
///         tracing::warn!(?event, "session event");
///     })
///     .start(&engine)
///     .await?;
/// ```
pub type EventCallback = Arc<dyn Fn(SessionEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// Convenience for creating event callbacks without manually wrapping in
/// `Arc`.
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(SessionEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}
