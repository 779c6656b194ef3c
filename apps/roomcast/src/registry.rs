use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::session::{Session, SessionId};

/// Process-wide record of open connections, keyed by room. This is the
/// transport's accept/track primitive: it outlives individual hub instances,
/// which is what lets a re-activated hub recover its sessions (and their
/// attached metadata) by enumeration instead of a side table.
#[derive(Default)]
pub struct ConnectionTracker {
    rooms: DashMap<String, HashMap<SessionId, Arc<Session>>>,
}

impl ConnectionTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn track(&self, session: &Arc<Session>) {
        self.rooms
            .entry(session.meta().room_id.clone())
            .or_default()
            .insert(session.id(), Arc::clone(session));
    }

    fn untrack(&self, room_id: &str, id: &SessionId) {
        if let Some(mut room) = self.rooms.get_mut(room_id) {
            room.remove(id);
        }
        self.rooms.remove_if(room_id, |_, room| room.is_empty());
    }

    pub fn open_sessions(&self, room_id: &str) -> Vec<Arc<Session>> {
        self.rooms
            .get(room_id)
            .map(|room| room.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn open_session_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map(|room| room.len()).unwrap_or(0)
    }
}

/// A hub's view of the tracked connection set for its room.
///
/// A session is a member from the moment `register` returns until
/// `unregister` is called, whether that happens through a close notification
/// or a sweep eviction. `unregister` is idempotent.
pub struct SessionRegistry {
    tracker: Arc<ConnectionTracker>,
    room_id: String,
}

impl SessionRegistry {
    pub fn new(tracker: Arc<ConnectionTracker>, room_id: String) -> Self {
        Self { tracker, room_id }
    }

    pub fn register(&self, session: &Arc<Session>) {
        self.tracker.track(session);
    }

    pub fn unregister(&self, id: &SessionId) {
        self.tracker.untrack(&self.room_id, id);
    }

    /// Snapshot of the currently registered sessions, optionally restricted
    /// to one uid tag. Mutations after the call do not affect the returned
    /// listing.
    pub fn list_all(&self, uid_tag: Option<&str>) -> Vec<Arc<Session>> {
        let mut sessions = self.tracker.open_sessions(&self.room_id);
        if let Some(uid) = uid_tag {
            sessions.retain(|s| s.meta().uid == uid);
        }
        sessions
    }
}
