//! Progress reporter
//!
//! Periodically samples the queue store and renders the backlog as a
//! terminal progress bar. Never writes to the store.

use crate::store::{SharedStore, StoreError, VideoTask};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const BAR_TEMPLATE: &str = "{msg} [{bar:40.cyan/blue}] {pos}/{len} files [{prefix}]";

/// One sample of the pipeline as shown to the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressView {
    /// Pending tasks plus the current one, if any
    pub total: u64,
    /// 1 while a task is being encoded
    pub position: u64,
    pub message: String,
    pub queue_length: usize,
}

impl ProgressView {
    pub fn new(queue_length: usize, current: Option<&VideoTask>) -> Self {
        let busy = u64::from(current.is_some());
        let message = match current {
            Some(task) => format!("Currently encoding: {}", task),
            None => "No encoding in progress.".to_string(),
        };

        Self {
            total: queue_length as u64 + busy,
            position: busy,
            message,
            queue_length,
        }
    }

    /// Read the queue length and current task from the store
    pub async fn sample(store: &SharedStore) -> Result<Self, StoreError> {
        let queue_length = store.length().await?;
        let current = store.get_current().await?;
        Ok(Self::new(queue_length, current.as_ref()))
    }

    pub fn postfix(&self) -> String {
        format!("queue_length={}", self.queue_length)
    }
}

/// Renders [`ProgressView`] samples on an interval
pub struct ProgressReporter {
    store: SharedStore,
    interval: Duration,
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Reporter drawing to stderr
    pub fn new(store: SharedStore, interval: Duration) -> Self {
        Self::with_bar(store, interval, ProgressBar::new(0))
    }

    pub fn with_bar(store: SharedStore, interval: Duration, bar: ProgressBar) -> Self {
        let style = ProgressStyle::with_template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        bar.set_style(style);

        Self {
            store,
            interval,
            bar,
        }
    }

    /// Sample once and redraw. A failed sample leaves the bar unchanged.
    pub async fn refresh(&self) {
        match ProgressView::sample(&self.store).await {
            Ok(view) => self.render(&view),
            Err(e) => warn!("Failed to sample queue for progress: {}", e),
        }
    }

    fn render(&self, view: &ProgressView) {
        self.bar.set_length(view.total);
        self.bar.set_position(view.position);
        self.bar.set_message(view.message.clone());
        self.bar.set_prefix(view.postfix());
    }

    /// Refresh every interval until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.refresh().await,
            }
        }

        self.bar.finish_and_clear();
        debug!("Progress reporter stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, MockQueueStore, QueueStore};
    use std::sync::Arc;

    #[test]
    fn test_idle_view() {
        let view = ProgressView::new(0, None);
        assert_eq!(view.total, 0);
        assert_eq!(view.position, 0);
        assert_eq!(view.message, "No encoding in progress.");
        assert_eq!(view.postfix(), "queue_length=0");
    }

    #[test]
    fn test_busy_view_counts_current_task() {
        let task = VideoTask::from("/watch/clip.mp4");
        let view = ProgressView::new(4, Some(&task));

        assert_eq!(view.total, 5);
        assert_eq!(view.position, 1);
        assert_eq!(view.message, "Currently encoding: /watch/clip.mp4");
        assert_eq!(view.postfix(), "queue_length=4");
    }

    #[test]
    fn test_pending_without_current() {
        let view = ProgressView::new(3, None);
        assert_eq!(view.total, 3);
        assert_eq!(view.position, 0);
    }

    #[tokio::test]
    async fn test_refresh_renders_store_state() {
        let store = Arc::new(MemoryStore::with_tasks(["/watch/a.mp4", "/watch/b.mkv"]));
        store
            .set_current(&VideoTask::from("/watch/now.avi"))
            .await
            .unwrap();

        let bar = ProgressBar::hidden();
        let reporter = ProgressReporter::with_bar(store.clone(), Duration::from_secs(5), bar.clone());
        reporter.refresh().await;

        assert_eq!(bar.length(), Some(3));
        assert_eq!(bar.position(), 1);
        assert_eq!(bar.message(), "Currently encoding: /watch/now.avi");
        assert_eq!(bar.prefix(), "queue_length=2");

        // Read-only
        assert_eq!(store.pending_snapshot().len(), 2);
        assert_eq!(store.current_snapshot(), Some(VideoTask::from("/watch/now.avi")));
    }

    #[tokio::test]
    async fn test_failed_sample_keeps_previous_render() {
        let mut store = MockQueueStore::new();
        let mut calls = 0;
        store.expect_length().times(2).returning(move || {
            calls += 1;
            if calls == 1 {
                Ok(2)
            } else {
                Err(StoreError::Unavailable("connection refused".to_string()))
            }
        });
        store.expect_get_current().times(1).returning(|| Ok(None));

        let bar = ProgressBar::hidden();
        let reporter = ProgressReporter::with_bar(Arc::new(store), Duration::from_secs(5), bar.clone());

        reporter.refresh().await;
        reporter.refresh().await;

        assert_eq!(bar.length(), Some(2));
        assert_eq!(bar.message(), "No encoding in progress.");
    }

    #[tokio::test]
    async fn test_reporter_stops_on_shutdown() {
        let reporter = ProgressReporter::with_bar(
            Arc::new(MemoryStore::new()),
            Duration::from_millis(10),
            ProgressBar::hidden(),
        );
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(reporter.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("reporter did not stop")
            .unwrap();
    }
}
