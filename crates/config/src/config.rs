//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Configuration is structurally valid but unusable
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Watched directory configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchConfig {
    /// Directory observed (non-recursively) for new video files
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Recognized video extensions, without the leading dot
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

fn default_extensions() -> Vec<String> {
    vec!["mp4".to_string(), "mkv".to_string(), "avi".to_string()]
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            dir: None,
            extensions: default_extensions(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct OutputConfig {
    /// Directory receiving encoded files
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Skip a source whose encoded output already exists ("no squash")
    #[serde(default)]
    pub skip_existing: bool,
}

/// Queue store (Redis) configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    #[serde(default = "default_store_host")]
    pub host: String,
    #[serde(default = "default_store_port")]
    pub port: u16,
    /// Redis database index
    #[serde(default)]
    pub db: i64,
    /// List holding pending tasks
    #[serde(default = "default_queue_key")]
    pub queue_key: String,
    /// Key holding the task currently being encoded
    #[serde(default = "default_current_key")]
    pub current_key: String,
}

fn default_store_host() -> String {
    "localhost".to_string()
}

fn default_store_port() -> u16 {
    6379
}

fn default_queue_key() -> String {
    "video_queue".to_string()
}

fn default_current_key() -> String {
    "current_task".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: default_store_host(),
            port: default_store_port(),
            db: 0,
            queue_key: default_queue_key(),
            current_key: default_current_key(),
        }
    }
}

impl StoreConfig {
    /// Connection URL, `redis://host:port/db`
    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}

/// Fixed encoder settings applied to every task.
///
/// Defaults: lossless-quality HEVC on NVENC (`qp 0`, preset `slow`) with
/// Opus audio at 192 kbit/s, written as `<stem>_encoded.mkv`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncodeProfile {
    #[serde(default = "default_video_codec")]
    pub video_codec: String,
    #[serde(default = "default_preset")]
    pub preset: String,
    /// Constant quantizer (0 = lossless quality)
    #[serde(default)]
    pub qp: u8,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
    /// Output container extension
    #[serde(default = "default_container")]
    pub container: String,
    /// Appended to the source stem to form the output name
    #[serde(default = "default_suffix")]
    pub suffix: String,
}

fn default_video_codec() -> String {
    "hevc_nvenc".to_string()
}

fn default_preset() -> String {
    "slow".to_string()
}

fn default_audio_codec() -> String {
    "libopus".to_string()
}

fn default_audio_bitrate() -> String {
    "192k".to_string()
}

fn default_container() -> String {
    "mkv".to_string()
}

fn default_suffix() -> String {
    "_encoded".to_string()
}

impl Default for EncodeProfile {
    fn default() -> Self {
        Self {
            video_codec: default_video_codec(),
            preset: default_preset(),
            qp: 0,
            audio_codec: default_audio_codec(),
            audio_bitrate: default_audio_bitrate(),
            container: default_container(),
            suffix: default_suffix(),
        }
    }
}

/// Progress display and polling configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressConfig {
    /// Seconds between progress samples; also the idle poll cap of the worker
    #[serde(default = "default_update_frequency_secs")]
    pub update_frequency_secs: u64,
}

fn default_update_frequency_secs() -> u64 {
    5
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            update_frequency_secs: default_update_frequency_secs(),
        }
    }
}

/// Log sink configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_file")]
    pub file: PathBuf,
}

fn default_log_file() -> PathBuf {
    PathBuf::from("video_encoder.log")
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: default_log_file(),
        }
    }
}

/// Crash recovery configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RecoveryConfig {
    /// Push a current task left over from a crash back onto the queue at boot
    #[serde(default)]
    pub requeue_stale_current: bool,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub encode: EncodeProfile,
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - STAVE_WATCH_DIR -> watch.dir
    /// - STAVE_OUTPUT_DIR -> output.dir
    /// - STAVE_SKIP_EXISTING -> output.skip_existing
    /// - STAVE_UPDATE_FREQUENCY -> progress.update_frequency_secs
    /// - STAVE_REDIS_HOST -> store.host
    /// - STAVE_REDIS_PORT -> store.port
    /// - STAVE_REDIS_DB -> store.db
    /// - STAVE_LOG_FILE -> logging.file
    pub fn apply_env_overrides(&mut self) {
        if let Some(dir) = env::var_os("STAVE_WATCH_DIR") {
            self.watch.dir = Some(PathBuf::from(dir));
        }

        if let Some(dir) = env::var_os("STAVE_OUTPUT_DIR") {
            self.output.dir = Some(PathBuf::from(dir));
        }

        if let Ok(val) = env::var("STAVE_SKIP_EXISTING") {
            // Accept "true", "1", "yes" as true; "false", "0", "no" as false
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.output.skip_existing = true,
                "false" | "0" | "no" => self.output.skip_existing = false,
                _ => {} // Invalid value, keep existing
            }
        }

        if let Ok(val) = env::var("STAVE_UPDATE_FREQUENCY") {
            if let Ok(secs) = val.parse::<u64>() {
                self.progress.update_frequency_secs = secs;
            }
        }

        if let Ok(host) = env::var("STAVE_REDIS_HOST") {
            if !host.is_empty() {
                self.store.host = host;
            }
        }

        if let Ok(val) = env::var("STAVE_REDIS_PORT") {
            if let Ok(port) = val.parse::<u16>() {
                self.store.port = port;
            }
        }

        if let Ok(val) = env::var("STAVE_REDIS_DB") {
            if let Ok(db) = val.parse::<i64>() {
                self.store.db = db;
            }
        }

        if let Some(file) = env::var_os("STAVE_LOG_FILE") {
            self.logging.file = PathBuf::from(file);
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = match Self::load_from_file(path) {
            Ok(config) => config,
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Config::default()
            }
            Err(e) => return Err(e),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Connection URL for the queue store
    pub fn redis_url(&self) -> String {
        self.store.url()
    }

    /// Check that the settings required to run the daemon are present
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watch.dir.is_none() {
            return Err(ConfigError::Invalid("watch directory is not set".to_string()));
        }
        if self.output.dir.is_none() {
            return Err(ConfigError::Invalid("output directory is not set".to_string()));
        }
        if self.progress.update_frequency_secs == 0 {
            return Err(ConfigError::Invalid(
                "update frequency must be at least one second".to_string(),
            ));
        }
        if self.watch.extensions.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one video extension is required".to_string(),
            ));
        }
        Ok(())
    }
}
