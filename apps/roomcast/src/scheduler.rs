use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::hub::WeakHub;
use crate::storage::{StoreError, WakeStore};

/// Whether a sweep wake-up is pending for a room. `Armed` is persisted
/// through the wake store so it survives a hub instance being reclaimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeState {
    Unarmed,
    Armed(DateTime<Utc>),
}

impl WakeState {
    pub fn is_armed(&self) -> bool {
        matches!(self, WakeState::Armed(_))
    }
}

/// Owns the durable wake slot for one room. State itself lives inside the
/// hub's turn-serialized state; the scheduler mutates it, persists it, and
/// spawns the one-shot timer that will call the hub back.
pub struct LifecycleScheduler {
    room_id: String,
    sweep_interval: Duration,
    store: Arc<dyn WakeStore>,
}

impl LifecycleScheduler {
    pub fn new(room_id: String, sweep_interval: Duration, store: Arc<dyn WakeStore>) -> Self {
        Self {
            room_id,
            sweep_interval,
            store,
        }
    }

    /// Persist `now + sweep_interval` and start ticking. No-op while already
    /// armed. On a store failure the state is left untouched so the caller
    /// can unwind.
    pub async fn arm(&self, state: &mut WakeState, hub: WeakHub) -> Result<(), StoreError> {
        if state.is_armed() {
            return Ok(());
        }
        let due = Utc::now() + chrono::Duration::milliseconds(self.sweep_interval.as_millis() as i64);
        self.store.store_wake(&self.room_id, due).await?;
        *state = WakeState::Armed(due);
        self.spawn_timer(hub, due);
        debug!(room = %self.room_id, %due, "sweep timer armed");
        Ok(())
    }

    /// Stop ticking and clear the persisted slot. A failed clear is logged
    /// and tolerated: a stale slot recovered later fires one sweep against an
    /// empty room and settles back to unarmed.
    pub async fn disarm(&self, state: &mut WakeState) {
        *state = WakeState::Unarmed;
        if let Err(err) = self.store.clear_wake(&self.room_id).await {
            warn!(room = %self.room_id, %err, "failed to clear persisted wake time");
        }
        debug!(room = %self.room_id, "sweep timer disarmed");
    }

    /// Activation-time recovery: a persisted wake time from a prior
    /// activation is re-armed (due immediately if the instant already
    /// passed); otherwise the room starts unarmed.
    pub async fn recover(&self, state: &mut WakeState, hub: WeakHub) -> Result<(), StoreError> {
        match self.store.load_wake(&self.room_id).await? {
            Some(due) => {
                *state = WakeState::Armed(due);
                self.spawn_timer(hub, due);
                debug!(room = %self.room_id, %due, "recovered persisted wake time");
            }
            None => *state = WakeState::Unarmed,
        }
        Ok(())
    }

    /// One-shot timer holding only a weak hub handle: a reclaimed hub is not
    /// kept alive by its timer, and the persisted slot lets the next
    /// activation pick the schedule back up.
    fn spawn_timer(&self, hub: WeakHub, due: DateTime<Utc>) {
        let delay = (due - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(hub) = hub.upgrade() {
                hub.on_wake().await;
            }
        });
    }
}
