//! Worker loop
//!
//! Takes one task at a time from the queue store, publishes it in the
//! current-task register, runs the encode operation and clears the register.
//! Tasks are processed strictly in FIFO order, never concurrently.

use crate::encode::{EncodeOperation, EncodeOutcome};
use crate::store::{SharedStore, StoreError, VideoTask};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Where the worker is in its cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerState {
    /// Waiting for a task
    Idle,
    /// Task taken off the queue, register not yet confirmed
    TaskSelected(VideoTask),
    /// Encode operation running
    Encoding(VideoTask),
}

/// Single sequential consumer of the queue
pub struct Worker {
    store: SharedStore,
    encoder: Arc<EncodeOperation>,
    wakeup: Arc<Notify>,
    poll_interval: Duration,
    state: WorkerState,
}

impl Worker {
    /// `poll_interval` bounds how long an idle worker waits when no wake-up
    /// arrives.
    pub fn new(
        store: SharedStore,
        encoder: Arc<EncodeOperation>,
        wakeup: Arc<Notify>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            encoder,
            wakeup,
            poll_interval,
            state: WorkerState::Idle,
        }
    }

    pub fn state(&self) -> &WorkerState {
        &self.state
    }

    /// Process at most one task.
    ///
    /// Returns `Ok(None)` when the queue is empty. Only a failed dequeue is
    /// reported as an error; register writes that fail are logged and the
    /// task is still encoded.
    pub async fn step(&mut self) -> Result<Option<EncodeOutcome>, StoreError> {
        let Some(task) = self.store.dequeue().await? else {
            return Ok(None);
        };

        self.state = WorkerState::TaskSelected(task.clone());
        if let Err(e) = self.store.set_current(&task).await {
            error!("Failed to record current task {}: {}", task, e);
        }

        info!("Encoding: {}", task);
        self.state = WorkerState::Encoding(task.clone());
        let outcome = self.encoder.run(&task).await;

        if let Err(e) = self.store.clear_current().await {
            error!("Failed to clear current task {}: {}", task, e);
        }
        self.state = WorkerState::Idle;
        debug!("Finished {}: {:?}", task, outcome);

        Ok(Some(outcome))
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Cancelling during an encode drops it, which kills the ffmpeg child.
    /// The task is left in the current-task register.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Worker started");

        loop {
            let result = tokio::select! {
                _ = shutdown.cancelled() => None,
                result = self.step() => Some(result),
            };

            let Some(result) = result else {
                if let WorkerState::TaskSelected(task) | WorkerState::Encoding(task) = &self.state {
                    warn!("Shutdown interrupted encoding of {}", task);
                }
                break;
            };

            match result {
                Ok(Some(_)) => continue,
                Ok(None) => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::timeout(self.poll_interval, self.wakeup.notified()) => {}
                    }
                }
                Err(e) => {
                    error!("Failed to read from queue store: {}", e);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
            }
        }

        info!("Worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EncodeProfile;
    use crate::encode::{write_encoded, EncodeError, MockMetadataCopier, MockTranscoder};
    use crate::store::{MemoryStore, MockQueueStore, QueueStore};
    use std::path::Path;
    use tempfile::TempDir;

    fn encoder(
        transcoder: MockTranscoder,
        metadata: MockMetadataCopier,
        output_dir: &Path,
        skip_existing: bool,
    ) -> Arc<EncodeOperation> {
        Arc::new(EncodeOperation::new(
            Arc::new(transcoder),
            Arc::new(metadata),
            EncodeProfile::default(),
            output_dir.to_path_buf(),
            skip_existing,
        ))
    }

    fn worker(store: SharedStore, encoder: Arc<EncodeOperation>) -> Worker {
        Worker::new(store, encoder, Arc::new(Notify::new()), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_empty_queue_is_a_no_op() {
        let out_dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let mut worker = worker(
            store.clone(),
            encoder(MockTranscoder::new(), MockMetadataCopier::new(), out_dir.path(), false),
        );

        assert_eq!(worker.step().await.unwrap(), None);
        assert_eq!(worker.state(), &WorkerState::Idle);
        assert_eq!(store.current_snapshot(), None);
    }

    #[tokio::test]
    async fn test_failed_task_does_not_block_the_next() {
        let out_dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::with_tasks(["/watch/a.mp4", "/watch/b.mp4"]));

        let mut transcoder = MockTranscoder::new();
        transcoder
            .expect_transcode()
            .withf(|input, _, _| input == Path::new("/watch/a.mp4"))
            .times(1)
            .returning(|_, _, _| {
                Err(EncodeError::FfmpegFailed {
                    code: 1,
                    stderr: "Invalid data found when processing input".to_string(),
                })
            });
        transcoder
            .expect_transcode()
            .withf(|input, _, _| input == Path::new("/watch/b.mp4"))
            .times(1)
            .returning(write_encoded);

        let mut metadata = MockMetadataCopier::new();
        metadata
            .expect_copy_tags()
            .withf(|source, _| source == Path::new("/watch/b.mp4"))
            .times(1)
            .returning(|_, _| Ok(()));

        let mut worker = worker(store.clone(), encoder(transcoder, metadata, out_dir.path(), false));

        let first = worker.step().await.unwrap().unwrap();
        assert!(matches!(first, EncodeOutcome::Failed { .. }));
        assert_eq!(store.current_snapshot(), None);

        let second = worker.step().await.unwrap().unwrap();
        assert_eq!(
            second,
            EncodeOutcome::Encoded {
                output: out_dir.path().join("b_encoded.mkv")
            }
        );

        assert_eq!(worker.step().await.unwrap(), None);
        assert_eq!(store.length().await.unwrap(), 0);
        assert_eq!(store.current_snapshot(), None);
    }

    #[tokio::test]
    async fn test_current_task_is_published_while_encoding() {
        let out_dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::with_tasks(["/watch/clip.mkv"]));

        let observer = store.clone();
        let mut transcoder = MockTranscoder::new();
        transcoder
            .expect_transcode()
            .times(1)
            .returning(move |input, output, profile| {
                assert_eq!(
                    observer.current_snapshot(),
                    Some(VideoTask::from("/watch/clip.mkv"))
                );
                // Already dequeued while it runs
                assert!(observer.pending_snapshot().is_empty());
                write_encoded(input, output, profile)
            });

        let mut metadata = MockMetadataCopier::new();
        metadata.expect_copy_tags().times(1).returning(|_, _| Ok(()));

        let mut worker = worker(store.clone(), encoder(transcoder, metadata, out_dir.path(), false));
        worker.step().await.unwrap();

        assert_eq!(store.current_snapshot(), None);
        assert_eq!(worker.state(), &WorkerState::Idle);
    }

    #[tokio::test]
    async fn test_skipped_task_still_clears_register() {
        let out_dir = TempDir::new().unwrap();
        std::fs::write(out_dir.path().join("clip_encoded.mkv"), b"done").unwrap();
        let store = Arc::new(MemoryStore::with_tasks(["/watch/clip.mp4"]));

        let mut transcoder = MockTranscoder::new();
        transcoder.expect_transcode().times(0);
        let mut metadata = MockMetadataCopier::new();
        metadata.expect_copy_tags().times(0);

        let mut worker = worker(store.clone(), encoder(transcoder, metadata, out_dir.path(), true));
        let outcome = worker.step().await.unwrap().unwrap();

        assert!(matches!(outcome, EncodeOutcome::Skipped { .. }));
        assert_eq!(store.current_snapshot(), None);
        assert_eq!(store.length().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dequeue_error_is_reported() {
        let out_dir = TempDir::new().unwrap();
        let mut store = MockQueueStore::new();
        store
            .expect_dequeue()
            .times(1)
            .returning(|| Err(StoreError::Unavailable("connection reset".to_string())));
        store.expect_set_current().times(0);

        let mut worker = worker(
            Arc::new(store),
            encoder(MockTranscoder::new(), MockMetadataCopier::new(), out_dir.path(), false),
        );

        assert!(matches!(worker.step().await, Err(StoreError::Unavailable(_))));
        assert_eq!(worker.state(), &WorkerState::Idle);
    }

    #[tokio::test]
    async fn test_register_failure_does_not_drop_task() {
        let out_dir = TempDir::new().unwrap();
        let mut store = MockQueueStore::new();
        store
            .expect_dequeue()
            .times(1)
            .returning(|| Ok(Some(VideoTask::from("/watch/clip.mp4"))));
        store
            .expect_set_current()
            .times(1)
            .returning(|_| Err(StoreError::Unavailable("timeout".to_string())));
        store.expect_clear_current().times(1).returning(|| Ok(()));

        let mut transcoder = MockTranscoder::new();
        transcoder.expect_transcode().times(1).returning(write_encoded);
        let mut metadata = MockMetadataCopier::new();
        metadata.expect_copy_tags().times(1).returning(|_, _| Ok(()));

        let mut worker = worker(Arc::new(store), encoder(transcoder, metadata, out_dir.path(), false));
        let outcome = worker.step().await.unwrap().unwrap();

        assert!(matches!(outcome, EncodeOutcome::Encoded { .. }));
    }

    #[tokio::test]
    async fn test_wakeup_starts_idle_worker() {
        let out_dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let wakeup = Arc::new(Notify::new());
        let (done_tx, done_rx) = std::sync::mpsc::channel();

        let mut transcoder = MockTranscoder::new();
        transcoder.expect_transcode().times(1).returning(write_encoded);
        let mut metadata = MockMetadataCopier::new();
        metadata
            .expect_copy_tags()
            .times(1)
            .returning(move |source, _| {
                let _ = done_tx.send(source.to_path_buf());
                Ok(())
            });

        // Poll interval far longer than the test: only the wake-up can start work
        let worker = Worker::new(
            store.clone(),
            encoder(transcoder, metadata, out_dir.path(), false),
            wakeup.clone(),
            Duration::from_secs(3600),
        );
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(worker.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        store.enqueue(&VideoTask::from("/watch/new.avi")).await.unwrap();
        wakeup.notify_one();

        let mut encoded = None;
        for _ in 0..50 {
            if let Ok(path) = done_rx.try_recv() {
                encoded = Some(path);
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(encoded.as_deref(), Some(Path::new("/watch/new.avi")));

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker did not stop")
            .unwrap();
        assert_eq!(store.current_snapshot(), None);
    }

    #[tokio::test]
    async fn test_shutdown_while_idle() {
        let out_dir = TempDir::new().unwrap();
        let worker = worker(
            Arc::new(MemoryStore::new()),
            encoder(MockTranscoder::new(), MockMetadataCopier::new(), out_dir.path(), false),
        );

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(worker.run(shutdown.clone()));
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker did not stop")
            .unwrap();
    }
}
