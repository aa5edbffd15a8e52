//! Directory watcher
//!
//! Subscribes to file-creation notifications in the watched directory
//! (non-recursive) and pushes every new video file into the queue store.
//! Files already present at startup are not picked up.

use crate::config::EncodeProfile;
use crate::encode::WORKING_FILE_MARKERS;
use crate::store::{SharedStore, VideoTask};
use notify::event::CreateKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Error type for watcher setup
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Failed to watch {}: {source}", path.display())]
    Subscribe {
        path: PathBuf,
        source: notify::Error,
    },
}

/// Decides which created paths become tasks.
#[derive(Debug, Clone)]
pub struct VideoFilter {
    /// Lowercase extensions without the leading dot
    extensions: Vec<String>,
    /// File name ending of encoder outputs, when outputs land in the watched dir.
    /// Also turns on rejection of the encoder's hidden working files.
    output_marker: Option<String>,
}

impl VideoFilter {
    pub fn new<S: AsRef<str>>(extensions: &[S]) -> Self {
        Self {
            extensions: extensions
                .iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_lowercase())
                .collect(),
            output_marker: None,
        }
    }

    /// Also reject files named like the encoder's own output, and the hidden
    /// partial and tag-copy files it writes beside it
    pub fn ignoring_outputs(mut self, profile: &EncodeProfile) -> Self {
        self.output_marker = Some(format!("{}.{}", profile.suffix, profile.container).to_lowercase());
        self
    }

    /// Checks if a file has a recognized video extension (case-insensitive).
    pub fn is_video_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }

    fn is_own_output(&self, path: &Path) -> bool {
        match (&self.output_marker, path.file_name().and_then(|n| n.to_str())) {
            (Some(marker), Some(name)) => {
                name.to_lowercase().ends_with(marker.as_str()) || is_working_file(name)
            }
            _ => false,
        }
    }

    /// Whether a created path should be enqueued
    pub fn accepts(&self, path: &Path) -> bool {
        self.is_video_file(path) && !self.is_own_output(path) && !path.is_dir()
    }
}

fn is_working_file(name: &str) -> bool {
    name.starts_with('.') && WORKING_FILE_MARKERS.iter().any(|m| name.contains(m))
}

/// Paths of newly created video files carried by a notification.
///
/// Anything other than a creation event yields nothing.
pub fn created_videos(event: &Event, filter: &VideoFilter) -> Vec<PathBuf> {
    match event.kind {
        EventKind::Create(CreateKind::Folder) => Vec::new(),
        EventKind::Create(_) => event
            .paths
            .iter()
            .filter(|p| filter.accepts(p))
            .cloned()
            .collect(),
        _ => Vec::new(),
    }
}

/// Long-lived watcher over one directory.
pub struct DirectoryWatcher {
    dir: PathBuf,
    filter: VideoFilter,
    store: SharedStore,
    wakeup: Arc<Notify>,
    watcher: RecommendedWatcher,
    events_rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
}

impl DirectoryWatcher {
    /// Subscribe to `dir`. Notifications are buffered until [`run`] is called.
    ///
    /// `wakeup` is signalled after every successful enqueue so an idle worker
    /// does not have to wait for its next poll.
    ///
    /// [`run`]: DirectoryWatcher::run
    pub fn new(
        dir: PathBuf,
        filter: VideoFilter,
        store: SharedStore,
        wakeup: Arc<Notify>,
    ) -> Result<Self, WatchError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |result| {
                // Unbounded channel: never blocks the notify thread
                if events_tx.send(result).is_err() {
                    debug!("Watcher event dropped, receiver closed");
                }
            },
            Config::default(),
        )
        .map_err(|source| WatchError::Subscribe {
            path: dir.clone(),
            source,
        })?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|source| WatchError::Subscribe {
                path: dir.clone(),
                source,
            })?;

        info!("Watching directory: {}", dir.display());

        Ok(Self {
            dir,
            filter,
            store,
            wakeup,
            watcher,
            events_rx,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Consume notifications until `shutdown` is cancelled.
    ///
    /// Errors reported by the notification source and failed enqueues are
    /// logged; neither stops the watcher.
    pub async fn run(self, shutdown: CancellationToken) {
        let Self {
            dir,
            filter,
            store,
            wakeup,
            mut watcher,
            mut events_rx,
        } = self;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                next = events_rx.recv() => match next {
                    Some(Ok(event)) => enqueue_created(&event, &filter, &store, &wakeup).await,
                    Some(Err(e)) => warn!(?e, "Notification error in {}", dir.display()),
                    None => {
                        warn!("Notification source closed for {}", dir.display());
                        break;
                    }
                },
            }
        }

        if let Err(e) = watcher.unwatch(&dir) {
            warn!(?e, "Failed to unwatch {}", dir.display());
        }
        info!("Stopped watching directory: {}", dir.display());
    }
}

async fn enqueue_created(event: &Event, filter: &VideoFilter, store: &SharedStore, wakeup: &Notify) {
    for path in created_videos(event, filter) {
        let task = VideoTask::new(path);
        match store.enqueue(&task).await {
            Ok(()) => {
                info!("New file detected: {}", task);
                wakeup.notify_one();
            }
            Err(e) => error!("Failed to enqueue {}: {}", task, e),
        }
    }
}
