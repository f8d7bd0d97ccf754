use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use thiserror::Error;
use uuid::Uuid;

const REDIS_KEY_PREFIX: &str = "chat_guard:security:attempts:v1";
const REDIS_SCAN_BATCH: usize = 200;

#[derive(Debug, Error)]
pub enum CounterError {
    #[error("attempt counter backend unavailable: {0}")]
    Unavailable(String),
    #[error("attempt counter state is invalid: {0}")]
    InvalidState(String),
}

pub type CounterFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CounterError>> + Send + 'a>>;

/// Per-user count of security incidents. Increments are atomic; counts only
/// grow until reset.
pub trait AttemptCounter: Send + Sync {
    fn increment<'a>(&'a self, user_id: Uuid) -> CounterFuture<'a, u64>;
    fn get<'a>(&'a self, user_id: Uuid) -> CounterFuture<'a, u64>;
    fn reset<'a>(&'a self, user_id: Uuid) -> CounterFuture<'a, ()>;
    /// Returns how many users had a count before clearing.
    fn clear_all<'a>(&'a self) -> CounterFuture<'a, u64>;
}

/// Process-local counter. Counts are lost on restart.
#[derive(Clone, Default)]
pub struct InMemoryAttemptCounter {
    counts: Arc<Mutex<HashMap<Uuid, Arc<AtomicU64>>>>,
}

impl InMemoryAttemptCounter {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, user_id: Uuid) -> Result<Arc<AtomicU64>, CounterError> {
        let mut counts = self
            .counts
            .lock()
            .map_err(|_| CounterError::InvalidState("counter lock poisoned".to_string()))?;
        Ok(counts
            .entry(user_id)
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .clone())
    }

    fn current(&self, user_id: Uuid) -> Result<u64, CounterError> {
        let counts = self
            .counts
            .lock()
            .map_err(|_| CounterError::InvalidState("counter lock poisoned".to_string()))?;
        Ok(counts
            .get(&user_id)
            .map(|slot| slot.load(Ordering::SeqCst))
            .unwrap_or(0))
    }
}

impl AttemptCounter for InMemoryAttemptCounter {
    fn increment<'a>(&'a self, user_id: Uuid) -> CounterFuture<'a, u64> {
        Box::pin(async move {
            let slot = self.slot(user_id)?;
            Ok(slot.fetch_add(1, Ordering::SeqCst) + 1)
        })
    }

    fn get<'a>(&'a self, user_id: Uuid) -> CounterFuture<'a, u64> {
        Box::pin(async move { self.current(user_id) })
    }

    fn reset<'a>(&'a self, user_id: Uuid) -> CounterFuture<'a, ()> {
        Box::pin(async move {
            let mut counts = self
                .counts
                .lock()
                .map_err(|_| CounterError::InvalidState("counter lock poisoned".to_string()))?;
            counts.remove(&user_id);
            Ok(())
        })
    }

    fn clear_all<'a>(&'a self) -> CounterFuture<'a, u64> {
        Box::pin(async move {
            let mut counts = self
                .counts
                .lock()
                .map_err(|_| CounterError::InvalidState("counter lock poisoned".to_string()))?;
            let cleared = counts.len() as u64;
            counts.clear();
            Ok(cleared)
        })
    }
}

/// Counter shared across instances through Redis `INCR`.
#[derive(Clone)]
pub struct RedisAttemptCounter {
    connection: ConnectionManager,
}

impl RedisAttemptCounter {
    pub async fn connect(redis_url: &str) -> Result<Self, CounterError> {
        let client = redis::Client::open(redis_url).map_err(redis_unavailable)?;
        let mut connection = ConnectionManager::new(client)
            .await
            .map_err(redis_unavailable)?;
        let _: String = redis::cmd("PING")
            .query_async(&mut connection)
            .await
            .map_err(redis_unavailable)?;

        Ok(Self { connection })
    }

    fn key(user_id: Uuid) -> String {
        format!("{REDIS_KEY_PREFIX}:{user_id}")
    }
}

impl AttemptCounter for RedisAttemptCounter {
    fn increment<'a>(&'a self, user_id: Uuid) -> CounterFuture<'a, u64> {
        Box::pin(async move {
            let mut connection = self.connection.clone();
            let value: i64 = connection
                .incr(Self::key(user_id), 1_i64)
                .await
                .map_err(redis_unavailable)?;
            non_negative(value)
        })
    }

    fn get<'a>(&'a self, user_id: Uuid) -> CounterFuture<'a, u64> {
        Box::pin(async move {
            let mut connection = self.connection.clone();
            let value: Option<i64> = connection
                .get(Self::key(user_id))
                .await
                .map_err(redis_unavailable)?;
            non_negative(value.unwrap_or(0))
        })
    }

    fn reset<'a>(&'a self, user_id: Uuid) -> CounterFuture<'a, ()> {
        Box::pin(async move {
            let mut connection = self.connection.clone();
            let _: i64 = connection
                .del(Self::key(user_id))
                .await
                .map_err(redis_unavailable)?;
            Ok(())
        })
    }

    fn clear_all<'a>(&'a self) -> CounterFuture<'a, u64> {
        Box::pin(async move {
            let mut connection = self.connection.clone();
            let pattern = format!("{REDIS_KEY_PREFIX}:*");
            let mut cursor = 0_u64;
            let mut cleared = 0_u64;

            loop {
                let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(REDIS_SCAN_BATCH)
                    .query_async(&mut connection)
                    .await
                    .map_err(redis_unavailable)?;

                if !keys.is_empty() {
                    let removed: i64 = connection.del(keys).await.map_err(redis_unavailable)?;
                    cleared += non_negative(removed)?;
                }

                if next_cursor == 0 {
                    return Ok(cleared);
                }
                cursor = next_cursor;
            }
        })
    }
}

fn non_negative(value: i64) -> Result<u64, CounterError> {
    u64::try_from(value)
        .map_err(|_| CounterError::InvalidState(format!("negative attempt count {value}")))
}

fn redis_unavailable(err: redis::RedisError) -> CounterError {
    CounterError::Unavailable(err.to_string())
}
