use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

pub type SessionId = Uuid;

/// Metadata attached to a connection when it is created. Written exactly once;
/// the handle carries it for the rest of the connection's life, so a hub
/// instance can recover it by enumerating open connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub room_id: String,
    pub uid: String,
    pub connected_at: DateTime<Utc>,
}

/// A relayed payload. Text and binary frames fan out the same way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

/// What the client-side end of a connection observes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Frame(Frame),
    Close,
}

/// Server-side connection handle. Owned jointly by the transport tracker and
/// whichever hub turn is currently holding a snapshot of it.
pub struct Session {
    id: SessionId,
    meta: SessionMeta,
    outbound: mpsc::UnboundedSender<SessionEvent>,
    /// Millis since epoch of the last observed heartbeat response; 0 until one
    /// has been observed.
    last_heartbeat_ms: AtomicU64,
}

impl Session {
    /// Allocate a duplex connection pair: the server-side handle and the
    /// event stream its client-side end reads from.
    pub fn open_pair(
        room_id: String,
        uid: String,
    ) -> (Arc<Session>, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session {
            id: Uuid::new_v4(),
            meta: SessionMeta {
                room_id,
                uid,
                connected_at: Utc::now(),
            },
            outbound: tx,
            last_heartbeat_ms: AtomicU64::new(0),
        });
        (session, rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn meta(&self) -> &SessionMeta {
        &self.meta
    }

    /// Best-effort delivery into the connection's outbound channel. A `false`
    /// return means the client end is gone; callers treat that as a silent
    /// failure.
    pub fn send_frame(&self, frame: Frame) -> bool {
        self.outbound.send(SessionEvent::Frame(frame)).is_ok()
    }

    /// Best-effort close signal to the client end.
    pub fn close(&self) -> bool {
        self.outbound.send(SessionEvent::Close).is_ok()
    }

    pub fn record_heartbeat(&self, at_ms: u64) {
        self.last_heartbeat_ms.store(at_ms, Ordering::Relaxed);
    }

    pub fn last_heartbeat_ms(&self) -> Option<u64> {
        match self.last_heartbeat_ms.load(Ordering::Relaxed) {
            0 => None,
            at => Some(at),
        }
    }

    pub fn connected_at_ms(&self) -> u64 {
        self.meta.connected_at.timestamp_millis().max(0) as u64
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("meta", &self.meta)
            .finish()
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Build a session whose `connected_at` lies `age_ms` in the past.
    pub fn backdated_session(
        room_id: &str,
        uid: &str,
        age_ms: i64,
    ) -> (Arc<Session>, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session {
            id: Uuid::new_v4(),
            meta: SessionMeta {
                room_id: room_id.to_string(),
                uid: uid.to_string(),
                connected_at: Utc::now() - chrono::Duration::milliseconds(age_ms),
            },
            outbound: tx,
            last_heartbeat_ms: AtomicU64::new(0),
        });
        (session, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pair_carries_metadata_and_delivers_frames() {
        let (session, mut rx) = Session::open_pair("room-a".into(), "u1".into());
        assert_eq!(session.meta().room_id, "room-a");
        assert_eq!(session.meta().uid, "u1");

        assert!(session.send_frame(Frame::Text("hello".into())));
        assert_eq!(
            rx.recv().await,
            Some(SessionEvent::Frame(Frame::Text("hello".into())))
        );

        assert!(session.close());
        assert_eq!(rx.recv().await, Some(SessionEvent::Close));
    }

    #[tokio::test]
    async fn send_after_client_end_dropped_reports_failure() {
        let (session, rx) = Session::open_pair("room-a".into(), "u1".into());
        drop(rx);
        assert!(!session.send_frame(Frame::Text("lost".into())));
        assert!(!session.close());
    }

    #[test]
    fn heartbeat_timestamp_starts_unobserved() {
        let (session, _rx) = Session::open_pair("room-a".into(), "u1".into());
        assert_eq!(session.last_heartbeat_ms(), None);
        session.record_heartbeat(1_234);
        assert_eq!(session.last_heartbeat_ms(), Some(1_234));
    }

    #[test]
    fn metadata_round_trips_through_serde() {
        let (session, _rx) = Session::open_pair("room-a".into(), "u1".into());
        let json = serde_json::to_string(session.meta()).unwrap();
        let meta: SessionMeta = serde_json::from_str(&json).unwrap();
        assert_eq!(&meta, session.meta());
    }
}
