//! Daemon startup and supervision
//!
//! Owns the queue store, the encode operation and the directory watcher, and
//! runs the watcher, worker and progress reporter until shutdown.

use crate::config::{Config, ConfigError};
use crate::encode::EncodeOperation;
use crate::progress::ProgressReporter;
use crate::startup::{requeue_stale_current, run_startup_checks, StartupError};
use crate::store::{RedisStore, SharedStore, StoreError};
use crate::watcher::{DirectoryWatcher, VideoFilter, WatchError};
use crate::worker::Worker;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// Queue store error
    #[error("{0}")]
    Store(#[from] StoreError),

    /// Watch directory could not be subscribed
    #[error("{0}")]
    Watch(#[from] WatchError),

    /// A pipeline task panicked
    #[error("Pipeline task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Daemon state containing all runtime components
pub struct Daemon {
    /// Configuration the daemon was started with
    pub config: Config,
    store: SharedStore,
    encoder: Arc<EncodeOperation>,
    watcher: DirectoryWatcher,
    wakeup: Arc<Notify>,
}

impl Daemon {
    /// Initialize the daemon
    ///
    /// This performs the full startup sequence:
    /// 1. Run startup checks (ffmpeg, encoder) unless `skip_checks`
    /// 2. Connect to the Redis queue store
    /// 3. Validate the configuration
    /// 4. Re-queue a stale current task when recovery is enabled
    /// 5. Subscribe to the watch directory
    pub async fn new(config: Config, skip_checks: bool) -> Result<Self, DaemonError> {
        if !skip_checks {
            // The checks shell out to ffmpeg and wait on it
            let codec = config.encode.video_codec.clone();
            tokio::task::spawn_blocking(move || run_startup_checks(&codec)).await??;
        }

        let store = RedisStore::connect(&config.store).await?;
        Self::with_store(config, Arc::new(store)).await
    }

    /// Initialize the daemon on an existing store with the ffmpeg encoder
    pub async fn with_store(config: Config, store: SharedStore) -> Result<Self, DaemonError> {
        let output_dir = required_dir(config.output.dir.as_deref(), "output")?;
        let encoder = EncodeOperation::with_ffmpeg(
            config.encode.clone(),
            output_dir,
            config.output.skip_existing,
        );
        Self::with_components(config, store, Arc::new(encoder)).await
    }

    /// Initialize the daemon without running tool checks
    ///
    /// Useful for testing when ffmpeg and Redis are not available.
    pub async fn with_components(
        config: Config,
        store: SharedStore,
        encoder: Arc<EncodeOperation>,
    ) -> Result<Self, DaemonError> {
        config.validate()?;
        let watch_dir = required_dir(config.watch.dir.as_deref(), "watch")?;

        if config.recovery.requeue_stale_current {
            requeue_stale_current(store.as_ref()).await?;
        }

        let mut filter = VideoFilter::new(&config.watch.extensions);
        if same_directory(&watch_dir, encoder.output_dir()) {
            // Outputs land in the watched directory; they must not be re-queued
            filter = filter.ignoring_outputs(encoder.profile());
        }

        let wakeup = Arc::new(Notify::new());
        let watcher = DirectoryWatcher::new(watch_dir, filter, store.clone(), wakeup.clone())?;

        Ok(Self {
            config,
            store,
            encoder,
            watcher,
            wakeup,
        })
    }

    /// Get the shared queue store
    pub fn store(&self) -> SharedStore {
        self.store.clone()
    }

    /// Run until Ctrl-C
    pub async fn run(self) -> Result<(), DaemonError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
            }
        })
        .await
    }

    /// Run the watcher, worker and reporter until `shutdown_signal` resolves
    ///
    /// An encode in flight at shutdown is abandoned and its ffmpeg process
    /// killed.
    pub async fn run_until<F>(self, shutdown_signal: F) -> Result<(), DaemonError>
    where
        F: Future<Output = ()>,
    {
        let shutdown = CancellationToken::new();
        let interval = Duration::from_secs(self.config.progress.update_frequency_secs);

        let worker = Worker::new(
            self.store.clone(),
            self.encoder.clone(),
            self.wakeup.clone(),
            interval,
        );
        let reporter = ProgressReporter::new(self.store.clone(), interval);

        let watcher_handle = tokio::spawn(self.watcher.run(shutdown.clone()));
        let worker_handle = tokio::spawn(worker.run(shutdown.clone()));
        let reporter_handle = tokio::spawn(reporter.run(shutdown.clone()));

        info!("Video encoder started");
        shutdown_signal.await;
        info!("Shutting down");
        shutdown.cancel();

        let (watcher_result, worker_result, reporter_result) =
            tokio::join!(watcher_handle, worker_handle, reporter_handle);

        for result in [&watcher_result, &worker_result, &reporter_result] {
            if let Err(e) = result {
                error!("Pipeline task failed: {}", e);
            }
        }
        watcher_result?;
        worker_result?;
        reporter_result?;

        info!("Video encoder stopped");
        Ok(())
    }
}

fn required_dir(dir: Option<&Path>, name: &str) -> Result<PathBuf, ConfigError> {
    dir.map(Path::to_path_buf)
        .ok_or_else(|| ConfigError::Invalid(format!("{} directory is not set", name)))
}

/// Compare two directories, resolving them when they exist
fn same_directory(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
