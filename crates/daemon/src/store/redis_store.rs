//! Redis-backed queue store.
//!
//! Pending tasks live in a list (`LPUSH` at the tail, `RPOP` at the head) and
//! the current task in a plain string key.

use super::{QueueStore, StoreError, VideoTask};
use crate::config::StoreConfig;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{debug, error, info};

/// Queue store backed by a Redis list and key.
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
    queue_key: String,
    current_key: String,
}

impl RedisStore {
    /// Connect to Redis and verify the connection with `PING`.
    ///
    /// Any failure here is reported as [`StoreError::Unavailable`]; the daemon
    /// cannot run without its store.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        Self::connect_url(&config.url(), &config.queue_key, &config.current_key).await
    }

    /// Connect to the server at `url` using the given queue and current-task keys
    pub async fn connect_url(
        url: &str,
        queue_key: &str,
        current_key: &str,
    ) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(|e| {
            error!("Failed to connect to Redis at {}: {}", url, e);
            StoreError::Unavailable(e.to_string())
        })?;

        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                error!("Failed to connect to Redis at {}: {}", url, e);
                StoreError::Unavailable(e.to_string())
            })?;

        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| {
                error!("Redis at {} did not answer PING: {}", url, e);
                StoreError::Unavailable(e.to_string())
            })?;

        info!(
            "Connected to queue store at {} (queue key '{}', current key '{}')",
            url, queue_key, current_key
        );

        Ok(Self {
            conn,
            queue_key: queue_key.to_string(),
            current_key: current_key.to_string(),
        })
    }
}

#[async_trait]
impl QueueStore for RedisStore {
    async fn enqueue(&self, task: &VideoTask) -> Result<(), StoreError> {
        let value = task.to_store_value()?;
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(&self.queue_key, value).await?;
        debug!("Enqueued {}", task);
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<VideoTask>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.rpop(&self.queue_key, None).await?;
        Ok(value.map(|path| VideoTask::from(path.as_str())))
    }

    async fn length(&self) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let len: usize = conn.llen(&self.queue_key).await?;
        Ok(len)
    }

    async fn set_current(&self, task: &VideoTask) -> Result<(), StoreError> {
        let value = task.to_store_value()?;
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(&self.current_key, value).await?;
        Ok(())
    }

    async fn get_current(&self) -> Result<Option<VideoTask>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(&self.current_key).await?;
        Ok(value.map(|path| VideoTask::from(path.as_str())))
    }

    async fn clear_current(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(&self.current_key).await?;
        Ok(())
    }
}
