//! CLI entry point for stave
//!
//! Parses command line arguments, builds the configuration and starts the
//! daemon.

use clap::Parser;
use stave::config::ConfigError;
use stave::{init_logging, Config, Daemon};
use std::path::PathBuf;
use std::process::ExitCode;

/// stave - watch a directory and transcode new videos one at a time
#[derive(Parser, Debug)]
#[command(name = "stave")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory to watch for new video files
    #[arg(short = 'w', long)]
    watch_dir: Option<PathBuf>,

    /// Directory encoded files are written to
    #[arg(short = 'o', long)]
    output_dir: Option<PathBuf>,

    /// Seconds between progress refreshes [default: 5]
    #[arg(short = 'u', long)]
    update_frequency: Option<u64>,

    /// Skip tasks whose output already exists instead of overwriting it
    #[arg(short = 'n', long)]
    no_squash: bool,

    /// Redis host [default: localhost]
    #[arg(short = 'r', long)]
    redis_host: Option<String>,

    /// Redis port [default: 6379]
    #[arg(short = 'p', long)]
    redis_port: Option<u16>,

    /// Redis database index [default: 0]
    #[arg(short = 'd', long)]
    redis_db: Option<i64>,

    /// Optional configuration file (config.toml); a missing file means defaults
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Log file path [default: video_encoder.log]
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Put a task left in the current-task register back on the queue at startup
    #[arg(long)]
    requeue_stale: bool,

    /// Skip startup checks (ffmpeg availability). For testing only.
    #[arg(long)]
    skip_checks: bool,
}

impl Args {
    /// Build the configuration: defaults, then file, then environment, then flags
    fn build_config(&self) -> Result<Config, ConfigError> {
        let mut config = match &self.config {
            Some(path) => Config::load_or_default(path)?,
            None => {
                let mut config = Config::default();
                config.apply_env_overrides();
                config
            }
        };
        self.apply_to(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn apply_to(&self, config: &mut Config) {
        if let Some(dir) = &self.watch_dir {
            config.watch.dir = Some(dir.clone());
        }
        if let Some(dir) = &self.output_dir {
            config.output.dir = Some(dir.clone());
        }
        if let Some(secs) = self.update_frequency {
            config.progress.update_frequency_secs = secs;
        }
        if self.no_squash {
            config.output.skip_existing = true;
        }
        if let Some(host) = &self.redis_host {
            config.store.host = host.clone();
        }
        if let Some(port) = self.redis_port {
            config.store.port = port;
        }
        if let Some(db) = self.redis_db {
            config.store.db = db;
        }
        if let Some(file) = &self.log_file {
            config.logging.file = file.clone();
        }
        if self.requeue_stale {
            config.recovery.requeue_stale_current = true;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match args.build_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    // Held for the process lifetime; dropping it flushes the log file
    let _log_guard = match init_logging(&config.logging.file) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return ExitCode::FAILURE;
        }
    };

    println!("Watching {}", display_dir(&config.watch.dir));
    println!("Writing encodes to {}", display_dir(&config.output.dir));
    println!("Queue store: {}", config.redis_url());
    if args.skip_checks {
        println!("WARNING: Skipping startup checks (--skip-checks enabled)");
    }

    let daemon = match Daemon::new(config, args.skip_checks).await {
        Ok(daemon) => daemon,
        Err(e) => {
            tracing::error!("Failed to initialize daemon: {}", e);
            eprintln!("Failed to initialize daemon: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = daemon.run().await {
        tracing::error!("Daemon error: {}", e);
        eprintln!("Daemon error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn display_dir(dir: &Option<PathBuf>) -> String {
    dir.as_ref()
        .map(|d| d.display().to_string())
        .unwrap_or_default()
}
