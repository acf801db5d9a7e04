//! Multi-party RTP audio mixing sessions with per-participant recording.
//!
//! Each session receives participants' RTP audio on a single local port,
//! mixes the selected speakers into one re-encoded outbound stream, and
//! keeps a bounded recording of every mapped participant's recent audio
//! (five minutes by default) available for export at any time.
//!
//! The media processing itself - RTP transport, jitter buffering, decode,
//! mix, encode - lives behind the [`engine::MediaEngine`] trait. This crate
//! supplies the session semantics on top: participant lifecycle, recording,
//! mute control, export, and multi-session management.
//!
//! # Quick start
//!
//! ```no_run
//! use rtp_mixer::{RtpMixer, SessionError};
//! use rtp_mixer::engine::MockEngine;
//! use std::collections::{HashMap, HashSet};
//!
//! # async fn example() -> Result<(), SessionError> {
//! # let engine = MockEngine::new();
//! let session = RtpMixer::builder()
//!     .session_id("conf-1")
//!     .sink("203.0.113.5", 5004)
//!     .on_event(|event| tracing::info!(?event, "session event"))
//!     .start(&engine)
//!     .await?;
//!
//! // Tell participants to send RTP here.
//! println!("receive port: {}", session.local_port());
//!
//! // Identify sources once signaling knows who they are.
//! session
//!     .map_participants(HashMap::from([(0x1234, "alice".to_string())]))
//!     .await?;
//!
//! // Choose who is audible in the mix.
//! session.set_speakers(HashSet::from(["alice".to_string()])).await?;
//!
//! // Pull a participant's recent audio whenever needed.
//! let samples = session.export_samples("alice").await?;
//!
//! session.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **Session**: one mixing topology; a handle whose operations are
//!   serialized through a controller task that owns the topology
//! - **Recording**: each mapped participant gets a fixed-memory, time-bounded
//!   buffer that keeps only the most recent audio
//! - **Export**: a [`BufferSink`] receives a consistent snapshot of a
//!   participant's history; [`MemorySink`], [`ChannelSink`] and [`WavSink`]
//!   are provided
//! - **Manager**: [`SessionManager`] keys sessions by id, makes creation
//!   idempotent and expires sessions whose keepalive stops

#![warn(missing_docs)]

mod builder;
mod chunk;
mod config;
pub mod engine;
mod error;
mod event;
mod manager;
mod pipeline;
mod session;
mod sink;

pub use builder::{RtpMixer, SessionBuilder};
pub use chunk::AudioChunk;
pub use config::{CaptureFormat, ManagerConfig, SessionConfig};
pub use error::{BufferError, SessionError, SinkError};
pub use event::{event_callback, EventCallback, SessionEvent};
pub use manager::SessionManager;
pub use pipeline::RecordingBuffer;
pub use session::{Session, SessionStats};
pub use sink::{BufferSink, ChannelSink, MemorySink, WavSink};
