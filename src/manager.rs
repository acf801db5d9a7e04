//! Multi-session registry with keepalive expiry.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::engine::{MediaEngine, Ssrc};
use crate::event::EventCallback;
use crate::session::Session;
use crate::sink::BufferSink;
use crate::{ManagerConfig, RtpMixer, SessionConfig, SessionError};

struct ManagedSession {
    session: Session,
    /// Refreshed only by `create`; the creating service re-issues create as
    /// a keepalive.
    last_touch: Instant,
}

/// Owns a set of sessions keyed by id, with idempotent creation and
/// keepalive-based expiry.
///
/// [`create`](Self::create) doubles as the keepalive: re-creating an
/// existing session refreshes its expiry clock and returns the existing
/// receive port. Sessions not re-created within the configured idle timeout
/// are stopped and removed by a background sweep.
///
/// # Example
///
/// ```no_run
/// # use rtp_mixer::{SessionManager, ManagerConfig, SessionConfig, SessionError};
/// # use rtp_mixer::engine::MockEngine;
/// # use std::sync::Arc;
/// # async fn example() -> Result<(), SessionError> {
/// let engine = Arc::new(MockEngine::new());
/// let manager = SessionManager::new(engine, ManagerConfig::default(), SessionConfig::default());
///
/// let (port, created) = manager.create("conf-1", "203.0.113.5", 5004).await?;
/// assert!(created);
///
/// // Same call later acts as a keepalive.
/// let (same_port, created) = manager.create("conf-1", "203.0.113.5", 5004).await?;
/// assert_eq!(port, same_port);
/// assert!(!created);
/// # Ok(())
/// # }
/// ```
pub struct SessionManager {
    engine: Arc<dyn MediaEngine>,
    session_config: SessionConfig,
    event_callback: Option<EventCallback>,
    sessions: Arc<Mutex<HashMap<String, ManagedSession>>>,
    sweeper: JoinHandle<()>,
}

impl SessionManager {
    /// Creates a manager and starts its expiry sweep.
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        manager_config: ManagerConfig,
        session_config: SessionConfig,
    ) -> Self {
        let sessions: Arc<Mutex<HashMap<String, ManagedSession>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let sweeper = Self::spawn_sweeper(&sessions, manager_config);
        Self {
            engine,
            session_config,
            event_callback: None,
            sessions,
            sweeper,
        }
    }

    /// Registers a callback applied to every session created from now on.
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(crate::SessionEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(Arc::new(callback));
        self
    }

    fn spawn_sweeper(
        sessions: &Arc<Mutex<HashMap<String, ManagedSession>>>,
        config: ManagerConfig,
    ) -> JoinHandle<()> {
        let sessions = Arc::downgrade(sessions);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.sweep_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(sessions) = sessions.upgrade() else {
                    break;
                };
                let expired: Vec<(String, Session)> = {
                    let mut map = sessions.lock().await;
                    let now = Instant::now();
                    let ids: Vec<String> = map
                        .iter()
                        .filter(|(_, managed)| {
                            now.duration_since(managed.last_touch) >= config.idle_timeout
                        })
                        .map(|(id, _)| id.clone())
                        .collect();
                    ids.into_iter()
                        .filter_map(|id| map.remove(&id).map(|managed| (id, managed.session)))
                        .collect()
                };
                for (id, session) in expired {
                    info!(session_id = %id, "expiring idle session");
                    let _ = session.stop().await;
                }
            }
        })
    }

    /// Creates the session, or refreshes it if it already exists.
    ///
    /// Returns the session's local receive port and whether a new session
    /// was actually created. An existing session's topology is left
    /// untouched; only its expiry clock is refreshed.
    pub async fn create(
        &self,
        id: &str,
        sink_host: &str,
        sink_port: u16,
    ) -> Result<(u16, bool), SessionError> {
        let mut sessions = self.sessions.lock().await;

        if let Some(managed) = sessions.get_mut(id) {
            debug!(session_id = %id, "keepalive for existing session");
            managed.last_touch = Instant::now();
            return Ok((managed.session.local_port(), false));
        }

        let mut builder = RtpMixer::builder()
            .session_id(id)
            .sink(sink_host, sink_port)
            .config(self.session_config.clone());
        if let Some(callback) = &self.event_callback {
            let callback = Arc::clone(callback);
            builder = builder.on_event(move |event| callback(event));
        }
        let session = builder.start(self.engine.as_ref()).await?;

        let port = session.local_port();
        sessions.insert(
            id.to_string(),
            ManagedSession {
                session,
                last_touch: Instant::now(),
            },
        );
        Ok((port, true))
    }

    /// Maps sources to endpoints on the named session.
    pub async fn map_participants(
        &self,
        id: &str,
        mappings: HashMap<Ssrc, String>,
    ) -> Result<(), SessionError> {
        let sessions = self.sessions.lock().await;
        let managed = Self::lookup(&sessions, id)?;
        managed.session.map_participants(mappings).await
    }

    /// Declares the audible endpoints of the named session.
    pub async fn set_speakers(
        &self,
        id: &str,
        speakers: HashSet<String>,
    ) -> Result<(), SessionError> {
        let sessions = self.sessions.lock().await;
        let managed = Self::lookup(&sessions, id)?;
        managed.session.set_speakers(speakers).await
    }

    /// Applies a combined mapping + speaker update to the named session.
    pub async fn update(
        &self,
        id: &str,
        mappings: HashMap<Ssrc, String>,
        speakers: HashSet<String>,
    ) -> Result<(), SessionError> {
        let sessions = self.sessions.lock().await;
        let managed = Self::lookup(&sessions, id)?;
        managed.session.update(mappings, speakers).await
    }

    /// Mutes or unmutes one endpoint of the named session.
    pub async fn set_mute(
        &self,
        id: &str,
        endpoint: &str,
        muted: bool,
    ) -> Result<(), SessionError> {
        let sessions = self.sessions.lock().await;
        let managed = Self::lookup(&sessions, id)?;
        managed.session.set_mute(endpoint, muted).await
    }

    /// Exports an endpoint's recording from the named session.
    ///
    /// The registry lock is released before the sink drains, so a slow sink
    /// never stalls creates, keepalives or the expiry sweep.
    pub async fn export<S>(&self, id: &str, endpoint: &str, sink: S) -> Result<S, SessionError>
    where
        S: BufferSink + 'static,
    {
        let buffer = {
            let sessions = self.sessions.lock().await;
            let managed = Self::lookup(&sessions, id)?;
            managed.session.recording_buffer(endpoint).await?
        };
        crate::session::run_export(buffer, sink).await
    }

    /// Stops and removes the named session.
    pub async fn delete(&self, id: &str) -> Result<(), SessionError> {
        let managed = {
            let mut sessions = self.sessions.lock().await;
            sessions
                .remove(id)
                .ok_or_else(|| SessionError::SessionNotFound { id: id.to_string() })?
        };
        managed.session.stop().await
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Stops every session and ends the expiry sweep.
    pub async fn shutdown(self) {
        self.sweeper.abort();
        let sessions = {
            let mut map = self.sessions.lock().await;
            map.drain().collect::<Vec<_>>()
        };
        for (id, managed) in sessions {
            debug!(session_id = %id, "stopping session on shutdown");
            let _ = managed.session.stop().await;
        }
    }

    fn lookup<'a>(
        sessions: &'a HashMap<String, ManagedSession>,
        id: &str,
    ) -> Result<&'a ManagedSession, SessionError> {
        sessions
            .get(id)
            .ok_or_else(|| SessionError::SessionNotFound { id: id.to_string() })
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{MockEngine, TopologyState};
    use std::time::Duration;

    fn manager(engine: &Arc<MockEngine>, idle: Duration, sweep: Duration) -> SessionManager {
        SessionManager::new(
            Arc::clone(engine) as Arc<dyn MediaEngine>,
            ManagerConfig {
                idle_timeout: idle,
                sweep_interval: sweep,
            },
            SessionConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let engine = Arc::new(MockEngine::new());
        let mgr = manager(&engine, Duration::from_secs(60), Duration::from_secs(60));

        let (port, created) = mgr.create("conf-1", "127.0.0.1", 5004).await.unwrap();
        assert!(created);

        let (same_port, created) = mgr.create("conf-1", "127.0.0.1", 5004).await.unwrap();
        assert!(!created);
        assert_eq!(port, same_port);
        assert_eq!(mgr.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_delete_stops_session() {
        let engine = Arc::new(MockEngine::new());
        let mgr = manager(&engine, Duration::from_secs(60), Duration::from_secs(60));

        mgr.create("conf-1", "127.0.0.1", 5004).await.unwrap();
        mgr.delete("conf-1").await.unwrap();

        assert_eq!(mgr.session_count().await, 0);
        assert_eq!(
            engine.topology("conf-1").unwrap().state(),
            TopologyState::Stopped
        );
    }

    #[tokio::test]
    async fn test_delete_unknown_session() {
        let engine = Arc::new(MockEngine::new());
        let mgr = manager(&engine, Duration::from_secs(60), Duration::from_secs(60));
        assert!(matches!(
            mgr.delete("ghost").await,
            Err(SessionError::SessionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_ops_on_unknown_session() {
        let engine = Arc::new(MockEngine::new());
        let mgr = manager(&engine, Duration::from_secs(60), Duration::from_secs(60));
        assert!(matches!(
            mgr.map_participants("ghost", HashMap::new()).await,
            Err(SessionError::SessionNotFound { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_session_expires() {
        let engine = Arc::new(MockEngine::new());
        let mgr = manager(&engine, Duration::from_secs(60), Duration::from_secs(10));

        mgr.create("conf-1", "127.0.0.1", 5004).await.unwrap();
        assert_eq!(mgr.session_count().await, 1);

        tokio::time::sleep(Duration::from_secs(90)).await;

        assert_eq!(mgr.session_count().await, 0);
        assert_eq!(
            engine.topology("conf-1").unwrap().state(),
            TopologyState::Stopped
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_defers_expiry() {
        let engine = Arc::new(MockEngine::new());
        let mgr = manager(&engine, Duration::from_secs(60), Duration::from_secs(10));

        mgr.create("conf-1", "127.0.0.1", 5004).await.unwrap();

        // Keepalive at t=40 pushes expiry past t=60.
        tokio::time::sleep(Duration::from_secs(40)).await;
        let (_, created) = mgr.create("conf-1", "127.0.0.1", 5004).await.unwrap();
        assert!(!created);

        tokio::time::sleep(Duration::from_secs(40)).await;
        assert_eq!(mgr.session_count().await, 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(mgr.session_count().await, 0);
    }
}
