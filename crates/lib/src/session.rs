//! Gateway session state shared by the dispatch loop and the heartbeat scheduler.
//!
//! All fields live behind one mutex; every read or write goes through
//! [`SessionHandle`], so the last-seen sequence number and the heartbeat timer
//! always have a single writer at a time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::gateway::heartbeat::HeartbeatTimer;
use crate::gateway::model::{AuthorizedUser, ReadyEvent};

/// Lifecycle of one gateway connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Connecting,
    AwaitingHello,
    Identifying,
    Running,
    Closed,
}

#[derive(Debug, Default)]
pub struct SessionState {
    pub state: ConnectionState,
    pub session_id: Option<String>,
    pub resume_gateway_url: Option<String>,
    pub heartbeat_interval: Option<Duration>,
    pub last_sequence: Option<u64>,
    /// Set once the Ready event has been processed.
    pub client: Option<AuthorizedUser>,
    pub heartbeat: HeartbeatTimer,
}

/// Point-in-time copy of the session, for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    pub session_id: Option<String>,
    pub heartbeat_interval: Option<Duration>,
    pub last_sequence: Option<u64>,
    pub last_round_trip: Option<Duration>,
    pub heartbeat_pending: bool,
    pub has_client: bool,
}

/// Shared handle to one connection's session. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct SessionHandle {
    inner: Arc<Mutex<SessionState>>,
}

impl SessionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.lock().await.state
    }

    pub async fn set_state(&self, state: ConnectionState) {
        let mut g = self.inner.lock().await;
        if g.state != state {
            log::debug!("gateway session: {:?} -> {:?}", g.state, state);
            g.state = state;
        }
    }

    /// Forget everything learned on a previous connection and start over at Connecting.
    pub async fn reset(&self) {
        let mut g = self.inner.lock().await;
        if g.client.is_some() || g.last_sequence.is_some() {
            log::debug!("gateway session: discarding state from the previous connection");
        }
        *g = SessionState::default();
    }

    pub async fn set_heartbeat_interval(&self, interval: Duration) {
        self.inner.lock().await.heartbeat_interval = Some(interval);
    }

    /// Record a sequence number seen on an inbound envelope.
    pub async fn observe_sequence(&self, seq: u64) {
        self.inner.lock().await.last_sequence = Some(seq);
    }

    pub async fn last_sequence(&self) -> Option<u64> {
        self.inner.lock().await.last_sequence
    }

    pub async fn mark_heartbeat_sent(&self, at: Instant) {
        self.inner.lock().await.heartbeat.start(at);
    }

    /// Stop the heartbeat timer; returns the round trip if a heartbeat was in flight.
    pub async fn acknowledge_heartbeat(&self, at: Instant) -> Option<Duration> {
        self.inner.lock().await.heartbeat.stop(at)
    }

    /// Capture the session identity carried by Ready and build the authorized client.
    pub async fn establish(&self, token: &str, ready: &ReadyEvent) -> AuthorizedUser {
        let client = AuthorizedUser {
            token: token.to_string(),
            user: ready.user.clone(),
        };
        let mut g = self.inner.lock().await;
        g.session_id = Some(ready.session_id.clone());
        g.resume_gateway_url = ready.resume_gateway_url.clone();
        g.client = Some(client.clone());
        client
    }

    pub async fn client(&self) -> Option<AuthorizedUser> {
        self.inner.lock().await.client.clone()
    }

    pub async fn session_id(&self) -> Option<String> {
        self.inner.lock().await.session_id.clone()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let g = self.inner.lock().await;
        SessionSnapshot {
            state: g.state,
            session_id: g.session_id.clone(),
            heartbeat_interval: g.heartbeat_interval,
            last_sequence: g.last_sequence,
            last_round_trip: g.heartbeat.last_round_trip,
            heartbeat_pending: g.heartbeat.sent_at.is_some(),
            has_client: g.client.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::model::User;

    fn ready() -> ReadyEvent {
        serde_json::from_value(serde_json::json!({
            "v": 10,
            "user": {"id": "42", "username": "tilde", "bot": true},
            "session_id": "abc",
            "resume_gateway_url": "wss://resume.example",
            "guilds": []
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn establish_sets_identity_and_session() {
        let session = SessionHandle::new();
        assert!(session.client().await.is_none());

        let client = session.establish("secret", &ready()).await;
        assert_eq!(client.token, "secret");
        assert_eq!(client.user, User { id: "42".into(), username: "tilde".into(), bot: true, ..User::default() });
        assert_eq!(session.session_id().await.as_deref(), Some("abc"));
        assert!(session.snapshot().await.has_client);
    }

    #[tokio::test]
    async fn heartbeat_round_trip_is_measured_once() {
        let session = SessionHandle::new();
        let start = Instant::now();
        session.mark_heartbeat_sent(start).await;
        assert!(session.snapshot().await.heartbeat_pending);

        let rtt = session.acknowledge_heartbeat(start + Duration::from_millis(120)).await;
        assert_eq!(rtt, Some(Duration::from_millis(120)));
        assert_eq!(session.acknowledge_heartbeat(start + Duration::from_secs(1)).await, None);

        let snap = session.snapshot().await;
        assert!(!snap.heartbeat_pending);
        assert_eq!(snap.last_round_trip, Some(Duration::from_millis(120)));
    }

    #[tokio::test]
    async fn reset_discards_previous_connection() {
        let session = SessionHandle::new();
        session.establish("secret", &ready()).await;
        session.observe_sequence(12).await;
        session.set_heartbeat_interval(Duration::from_secs(41)).await;
        session.mark_heartbeat_sent(Instant::now()).await;
        session.set_state(ConnectionState::Closed).await;

        session.reset().await;
        let snap = session.snapshot().await;
        assert_eq!(snap.state, ConnectionState::Connecting);
        assert_eq!(snap.session_id, None);
        assert_eq!(snap.last_sequence, None);
        assert_eq!(snap.heartbeat_interval, None);
        assert!(!snap.heartbeat_pending);
        assert!(!snap.has_client);
        assert!(session.client().await.is_none());
    }

    #[tokio::test]
    async fn sequence_and_state_updates() {
        let session = SessionHandle::new();
        assert_eq!(session.state().await, ConnectionState::Connecting);
        session.set_state(ConnectionState::Running).await;
        session.observe_sequence(7).await;
        session.observe_sequence(8).await;
        assert_eq!(session.last_sequence().await, Some(8));
        assert_eq!(session.state().await, ConnectionState::Running);
    }
}
