use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("wake store error: {0}")]
    Backend(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Durable single-slot wake time per room: overwrite on rearm, clear on
/// disarm, read back on activation. The core consumes only this capability;
/// what sits behind it is the substrate's business.
#[async_trait]
pub trait WakeStore: Send + Sync {
    async fn store_wake(&self, room_id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn load_wake(&self, room_id: &str) -> Result<Option<DateTime<Utc>>, StoreError>;

    async fn clear_wake(&self, room_id: &str) -> Result<(), StoreError>;
}

fn wake_key(room_id: &str) -> String {
    format!("room:{}:wake_at", room_id)
}

pub struct RedisWakeStore {
    redis: ConnectionManager,
}

impl RedisWakeStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)?;
        let redis = ConnectionManager::new(client).await?;
        Ok(Self { redis })
    }
}

#[async_trait]
impl WakeStore for RedisWakeStore {
    async fn store_wake(&self, room_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        conn.set::<_, _, ()>(wake_key(room_id), at.timestamp_millis())
            .await?;
        Ok(())
    }

    async fn load_wake(&self, room_id: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let mut conn = self.redis.clone();
        let millis: Option<i64> = conn.get(wake_key(room_id)).await?;
        Ok(millis.and_then(DateTime::from_timestamp_millis))
    }

    async fn clear_wake(&self, room_id: &str) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(wake_key(room_id)).await?;
        Ok(())
    }
}

/// In-memory adapter for tests and single-process wiring.
#[derive(Default)]
pub struct InMemoryWakeStore {
    slots: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl InMemoryWakeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WakeStore for InMemoryWakeStore {
    async fn store_wake(&self, room_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.slots.lock().await.insert(room_id.to_string(), at);
        Ok(())
    }

    async fn load_wake(&self, room_id: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.slots.lock().await.get(room_id).copied())
    }

    async fn clear_wake(&self, room_id: &str) -> Result<(), StoreError> {
        self.slots.lock().await.remove(room_id);
        Ok(())
    }
}
