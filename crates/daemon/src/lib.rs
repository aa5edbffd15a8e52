//! stave
//!
//! Watch-folder transcoding daemon: new videos are queued in Redis and encoded
//! one at a time by a single worker.

pub mod daemon;
pub mod encode;
pub mod logging;
pub mod progress;
pub mod startup;
pub mod store;
pub mod watcher;
pub mod worker;

pub use stave_config as config;
pub use stave_config::Config;
pub use daemon::{Daemon, DaemonError};
pub use encode::{
    output_path_for, partial_path_for, EncodeError, EncodeOperation, EncodeOutcome,
    MetadataCopier, Transcoder,
};
pub use logging::{init_logging, LoggingError};
pub use progress::{ProgressReporter, ProgressView};
pub use startup::{
    check_ffmpeg_available, parse_ffmpeg_version, requeue_stale_current, run_startup_checks,
    StartupError,
};
pub use store::{MemoryStore, QueueStore, RedisStore, SharedStore, StoreError, VideoTask};
pub use watcher::{DirectoryWatcher, VideoFilter, WatchError};
pub use worker::{Worker, WorkerState};
