//! Queue store for pending video tasks
//!
//! A durable FIFO of source paths plus a single-slot register naming the task
//! currently being encoded. Every component receives the store as an
//! `Arc<dyn QueueStore>`; it is the only shared mutable state in the daemon.

pub mod memory;
pub mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Error type for queue store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing service could not be reached
    #[error("Queue store unavailable: {0}")]
    Unavailable(String),

    /// A command against the backing service failed
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Task path cannot be represented in the store
    #[error("Task path is not valid UTF-8: {}", .0.display())]
    InvalidTask(PathBuf),
}

/// A source video waiting to be, or being, encoded.
///
/// Tasks are plain paths; the same path may be queued more than once.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VideoTask(PathBuf);

impl VideoTask {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    /// String form written to the store
    pub fn to_store_value(&self) -> Result<&str, StoreError> {
        self.0
            .to_str()
            .ok_or_else(|| StoreError::InvalidTask(self.0.clone()))
    }
}

impl From<PathBuf> for VideoTask {
    fn from(path: PathBuf) -> Self {
        Self(path)
    }
}

impl From<&str> for VideoTask {
    fn from(path: &str) -> Self {
        Self(PathBuf::from(path))
    }
}

impl fmt::Display for VideoTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Operations on the pending queue and the current-task register.
///
/// Each call is atomic on its own. `dequeue` followed by `set_current` is not:
/// a crash between the two loses the task from both.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Append a task to the tail of the queue
    async fn enqueue(&self, task: &VideoTask) -> Result<(), StoreError>;

    /// Remove and return the oldest task; `None` when nothing is pending
    async fn dequeue(&self) -> Result<Option<VideoTask>, StoreError>;

    /// Number of pending tasks
    async fn length(&self) -> Result<usize, StoreError>;

    async fn set_current(&self, task: &VideoTask) -> Result<(), StoreError>;

    async fn get_current(&self) -> Result<Option<VideoTask>, StoreError>;

    async fn clear_current(&self) -> Result<(), StoreError>;
}

/// Shared handle passed to the watcher, worker and reporter
pub type SharedStore = Arc<dyn QueueStore>;
