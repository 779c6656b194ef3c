use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::broadcast::{self, BroadcastFilter, BroadcastReport};
use crate::config::Config;
use crate::heartbeat::{self, HeartbeatResponder};
use crate::registry::{ConnectionTracker, SessionRegistry};
use crate::scheduler::{LifecycleScheduler, WakeState};
use crate::session::{now_ms, Frame, Session, SessionEvent, SessionId};
use crate::storage::{StoreError, WakeStore};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("wake store failure: {0}")]
    Store(#[from] StoreError),
}

/// Per-room broadcast hub. Cloneable handle over shared inner state; all
/// mutating turns (create, relay, close notification, sweep) serialize on one
/// lock, so within a room nothing interleaves.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

pub struct WeakHub(Weak<HubInner>);

struct HubInner {
    room_id: String,
    config: Arc<Config>,
    registry: SessionRegistry,
    responder: Arc<HeartbeatResponder>,
    scheduler: LifecycleScheduler,
    state: Mutex<HubState>,
}

struct HubState {
    /// Sessions tracked as active since this instance activated; the sweep
    /// operates on this set, while broadcasts enumerate the full registry.
    active: HashMap<SessionId, Arc<Session>>,
    wake: WakeState,
}

impl WeakHub {
    pub fn upgrade(&self) -> Option<Hub> {
        self.0.upgrade().map(|inner| Hub { inner })
    }

    #[cfg(test)]
    pub(crate) fn dangling() -> Self {
        WeakHub(Weak::new())
    }
}

impl Hub {
    /// Build and activate an instance for one room. The initialization
    /// barrier completes here, before the handle escapes: the active set is
    /// rehydrated from the transport's tracked connections and the wake state
    /// is recovered from the durable slot.
    pub(crate) async fn activate(
        room_id: String,
        config: Arc<Config>,
        tracker: Arc<ConnectionTracker>,
        responder: Arc<HeartbeatResponder>,
        store: Arc<dyn WakeStore>,
    ) -> Result<Hub, ServiceError> {
        let registry = SessionRegistry::new(tracker, room_id.clone());
        let scheduler =
            LifecycleScheduler::new(room_id.clone(), config.sweep_interval, Arc::clone(&store));
        let hub = Hub {
            inner: Arc::new(HubInner {
                room_id,
                config,
                registry,
                responder,
                scheduler,
                state: Mutex::new(HubState {
                    active: HashMap::new(),
                    wake: WakeState::Unarmed,
                }),
            }),
        };

        let mut state = hub.inner.state.lock().await;
        for session in hub.inner.registry.list_all(None) {
            state.active.insert(session.id(), session);
        }
        let rehydrated = state.active.len();
        hub.inner
            .scheduler
            .recover(&mut state.wake, hub.downgrade())
            .await?;
        let wake = state.wake;
        drop(state);

        info!(
            room = %hub.inner.room_id,
            sessions = rehydrated,
            armed = wake.is_armed(),
            "hub activated"
        );
        Ok(hub)
    }

    pub fn downgrade(&self) -> WeakHub {
        WeakHub(Arc::downgrade(&self.inner))
    }

    /// Connection factory: allocate the duplex pair, track and register the
    /// server end with its metadata, and arm the sweep timer when this is the
    /// first reason to tick. One logical step: if arming fails, the session
    /// is unregistered again and the error propagates.
    pub async fn create_room(
        &self,
        uid: &str,
    ) -> Result<(Arc<Session>, mpsc::UnboundedReceiver<SessionEvent>), ServiceError> {
        let (session, events) = Session::open_pair(self.inner.room_id.clone(), uid.to_string());

        let mut state = self.inner.state.lock().await;
        self.inner.registry.register(&session);
        state.active.insert(session.id(), Arc::clone(&session));

        if self.inner.config.auto_close {
            if let Err(err) = self
                .inner
                .scheduler
                .arm(&mut state.wake, self.downgrade())
                .await
            {
                state.active.remove(&session.id());
                self.inner.registry.unregister(&session.id());
                return Err(err.into());
            }
        }
        drop(state);

        info!(room = %self.inner.room_id, session = %session.id(), uid, "session created");
        Ok((session, events))
    }

    /// Transport ingress for one inbound frame. The keep-alive responder gets
    /// the frame first and answers without touching application logic;
    /// everything else relays to the rest of the room.
    pub async fn ingress(&self, session: &Arc<Session>, frame: Frame) {
        if self.inner.responder.try_respond(session, &frame) {
            return;
        }
        self.broadcast(frame, BroadcastFilter::excluding(session.id()))
            .await;
    }

    /// Fan a frame out over a fresh registry snapshot. Fire-and-forget per
    /// session; sessions already closed but not yet unregistered simply fail
    /// silently.
    pub async fn broadcast(&self, frame: Frame, filter: BroadcastFilter) -> BroadcastReport {
        let _turn = self.inner.state.lock().await;
        let snapshot = self.inner.registry.list_all(None);
        let report = broadcast::dispatch(&snapshot, &frame, &filter);
        debug!(
            room = %self.inner.room_id,
            delivered = report.delivered,
            failed = report.failed,
            "broadcast dispatched"
        );
        report
    }

    /// Close notification from the transport: the session leaves the
    /// registry. The sweep timer is left alone; an empty room stops ticking
    /// at its next wake-up.
    pub async fn on_close(&self, session: &Session) {
        let mut state = self.inner.state.lock().await;
        self.inner.registry.unregister(&session.id());
        state.active.remove(&session.id());
        drop(state);
        info!(room = %self.inner.room_id, session = %session.id(), "session closed");
    }

    /// Sweep turn, entered from the armed timer. Evicts every session whose
    /// heartbeat has gone silent, then rearms while members remain or stops
    /// ticking entirely.
    pub(crate) async fn on_wake(&self) {
        if !self.inner.config.auto_close {
            return;
        }

        let mut state = self.inner.state.lock().await;
        let now = now_ms();
        let snapshot: Vec<Arc<Session>> = state.active.values().cloned().collect();
        let mut evicted = 0usize;
        for session in snapshot {
            if heartbeat::is_alive_at(&session, self.inner.config.liveness_timeout, now) {
                continue;
            }
            if !session.close() {
                warn!(
                    room = %self.inner.room_id,
                    session = %session.id(),
                    "close for evicted session was not deliverable"
                );
            }
            self.inner.registry.unregister(&session.id());
            state.active.remove(&session.id());
            evicted += 1;
        }

        state.wake = WakeState::Unarmed;
        if state.active.is_empty() {
            self.inner.scheduler.disarm(&mut state.wake).await;
        } else if let Err(err) = self
            .inner
            .scheduler
            .arm(&mut state.wake, self.downgrade())
            .await
        {
            warn!(room = %self.inner.room_id, %err, "failed to rearm sweep timer");
        }
        let remaining = state.active.len();
        drop(state);

        info!(
            room = %self.inner.room_id,
            evicted,
            remaining,
            "sweep completed"
        );
    }

    pub async fn status(&self) -> (usize, WakeState) {
        let state = self.inner.state.lock().await;
        (state.active.len(), state.wake)
    }
}

/// Host-managed directory of hub instances, keyed by room name. Every
/// operation for a room routes through the one instance held here; a dormant
/// instance can be dropped and a later request re-activates it behind the
/// initialization barrier.
#[derive(Clone)]
pub struct HubDirectory {
    inner: Arc<DirectoryInner>,
}

struct DirectoryInner {
    config: Arc<Config>,
    tracker: Arc<ConnectionTracker>,
    responder: Arc<HeartbeatResponder>,
    store: Arc<dyn WakeStore>,
    hubs: Mutex<HashMap<String, Hub>>,
}

impl HubDirectory {
    pub fn new(config: Config, store: Arc<dyn WakeStore>) -> Self {
        let responder = Arc::new(HeartbeatResponder::new(
            config.heartbeat_request.clone(),
            config.heartbeat_response.clone(),
        ));
        Self {
            inner: Arc::new(DirectoryInner {
                config: Arc::new(config),
                tracker: ConnectionTracker::new(),
                responder,
                store,
                hubs: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Get the live instance for a room, activating one if none exists.
    pub async fn hub(&self, room_id: &str) -> Result<Hub, ServiceError> {
        let mut hubs = self.inner.hubs.lock().await;
        if let Some(hub) = hubs.get(room_id) {
            return Ok(hub.clone());
        }
        let hub = Hub::activate(
            room_id.to_string(),
            Arc::clone(&self.inner.config),
            Arc::clone(&self.inner.tracker),
            Arc::clone(&self.inner.responder),
            Arc::clone(&self.inner.store),
        )
        .await?;
        hubs.insert(room_id.to_string(), hub.clone());
        Ok(hub)
    }

    pub async fn peek(&self, room_id: &str) -> Option<Hub> {
        self.inner.hubs.lock().await.get(room_id).cloned()
    }

    /// Drop a hub instance. Open connections stay tracked by the transport
    /// layer and the wake slot stays persisted, so the next request for the
    /// room rebuilds the instance with its state intact.
    pub async fn deactivate(&self, room_id: &str) {
        self.inner.hubs.lock().await.remove(room_id);
    }

    pub fn open_session_count(&self, room_id: &str) -> usize {
        self.inner.tracker.open_session_count(room_id)
    }

    /// Create a new tagged connection in a room and hand back its client end.
    pub async fn create_room(
        &self,
        room_id: &str,
        uid: &str,
    ) -> Result<RoomConnection, ServiceError> {
        let hub = self.hub(room_id).await?;
        let (session, events) = hub.create_room(uid).await?;
        Ok(RoomConnection {
            directory: self.clone(),
            room_id: room_id.to_string(),
            session,
            events,
        })
    }
}

/// Client-side end of a connection pair. Sends route back through the
/// directory, so frames from a long-lived connection keep reaching whichever
/// hub instance currently owns the room.
pub struct RoomConnection {
    pub(crate) directory: HubDirectory,
    pub(crate) room_id: String,
    pub(crate) session: Arc<Session>,
    pub(crate) events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl RoomConnection {
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub async fn send(&self, frame: Frame) -> Result<(), ServiceError> {
        let hub = self.directory.hub(&self.room_id).await?;
        hub.ingress(&self.session, frame).await;
        Ok(())
    }

    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Notify the hub that this connection is gone. If the room cannot be
    /// activated the session stays tracked; the next successful sweep evicts
    /// it once its heartbeat goes silent.
    pub async fn close(self) {
        match self.directory.hub(&self.room_id).await {
            Ok(hub) => hub.on_close(&self.session).await,
            Err(err) => warn!(
                room = %self.room_id,
                session = %self.session.id(),
                %err,
                "room not reachable during close; leaving eviction to the sweep"
            ),
        }
    }
}
