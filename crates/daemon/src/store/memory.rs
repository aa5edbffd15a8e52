//! In-process queue store.
//!
//! Same semantics as the Redis store without durability. Used by the test
//! suites of the watcher, worker and reporter.

use super::{QueueStore, StoreError, VideoTask};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct Inner {
    queue: VecDeque<VideoTask>,
    current: Option<VideoTask>,
}

/// Non-durable [`QueueStore`] guarded by a single mutex.
///
/// The lock is never held across an await point.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-filled with pending tasks, oldest first
    pub fn with_tasks<I, T>(tasks: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<VideoTask>,
    {
        let store = Self::new();
        store
            .lock()
            .queue
            .extend(tasks.into_iter().map(Into::into));
        store
    }

    /// Synchronous view of the current-task register
    pub fn current_snapshot(&self) -> Option<VideoTask> {
        self.lock().current.clone()
    }

    /// Synchronous view of the pending tasks, oldest first
    pub fn pending_snapshot(&self) -> Vec<VideoTask> {
        self.lock().queue.iter().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock still holds consistent data: every critical section
        // is a single collection operation.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn enqueue(&self, task: &VideoTask) -> Result<(), StoreError> {
        self.lock().queue.push_back(task.clone());
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<VideoTask>, StoreError> {
        Ok(self.lock().queue.pop_front())
    }

    async fn length(&self) -> Result<usize, StoreError> {
        Ok(self.lock().queue.len())
    }

    async fn set_current(&self, task: &VideoTask) -> Result<(), StoreError> {
        self.lock().current = Some(task.clone());
        Ok(())
    }

    async fn get_current(&self) -> Result<Option<VideoTask>, StoreError> {
        Ok(self.lock().current.clone())
    }

    async fn clear_current(&self) -> Result<(), StoreError> {
        self.lock().current = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(future)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        // N enqueues followed by N dequeues return the tasks in enqueue order
        #[test]
        fn prop_fifo_order(names in prop::collection::vec("[a-z0-9_]{1,12}", 0..32)) {
            let store = MemoryStore::new();
            let tasks: Vec<VideoTask> = names
                .iter()
                .map(|n| VideoTask::from(format!("/watch/{}.mp4", n).as_str()))
                .collect();

            let dequeued = block_on(async {
                for task in &tasks {
                    store.enqueue(task).await.unwrap();
                }
                let mut out = Vec::new();
                while let Some(task) = store.dequeue().await.unwrap() {
                    out.push(task);
                }
                out
            });

            prop_assert_eq!(dequeued, tasks);
        }
    }

    #[tokio::test]
    async fn test_dequeue_empty_has_no_side_effect() {
        let store = MemoryStore::new();

        assert_eq!(store.dequeue().await.unwrap(), None);
        assert_eq!(store.dequeue().await.unwrap(), None);
        assert_eq!(store.length().await.unwrap(), 0);
        assert_eq!(store.get_current().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_duplicates_are_kept() {
        let store = MemoryStore::new();
        let task = VideoTask::from("/watch/clip.mp4");

        store.enqueue(&task).await.unwrap();
        store.enqueue(&task).await.unwrap();

        assert_eq!(store.length().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_current_register() {
        let store = MemoryStore::new();
        let task = VideoTask::from("/watch/clip.mp4");

        store.set_current(&task).await.unwrap();
        assert_eq!(store.get_current().await.unwrap(), Some(task.clone()));
        assert_eq!(store.current_snapshot(), Some(task));

        store.clear_current().await.unwrap();
        assert_eq!(store.get_current().await.unwrap(), None);

        // Clearing an empty register is fine
        store.clear_current().await.unwrap();
    }

    #[test]
    fn test_with_tasks_preserves_order() {
        let store = MemoryStore::with_tasks(["/a.mp4", "/b.mkv"]);
        assert_eq!(
            store.pending_snapshot(),
            vec![VideoTask::from("/a.mp4"), VideoTask::from("/b.mkv")]
        );
    }
}
