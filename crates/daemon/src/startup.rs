//! Startup checks module
//!
//! Preflight checks run before the daemon starts consuming the queue:
//! - FFmpeg availability (`ffmpeg -version`)
//! - Configured video encoder present in the FFmpeg build (warning only)
//! - Optional recovery of a task left in the current-task register

use crate::store::{QueueStore, StoreError, VideoTask};
use std::process::Command;
use thiserror::Error;
use tracing::{info, warn};

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("FFmpeg not available: {0}")]
    FfmpegUnavailable(String),
}

/// Parse FFmpeg version string and extract major version number
///
/// Handles various FFmpeg version formats:
/// - Standard: "ffmpeg version 6.1 ..."
/// - N-prefixed: "ffmpeg version n6.1-... ..."
pub fn parse_ffmpeg_version(version_output: &str) -> Option<u32> {
    let version_line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains("ffmpeg version"))?;

    let version_part = version_line
        .to_lowercase()
        .split("ffmpeg version")
        .nth(1)?
        .split_whitespace()
        .next()?
        .to_string();

    let version_str = version_part.trim_start_matches('n');

    // Major version sits before the first '.' or '-'
    version_str.split(['.', '-']).next()?.parse().ok()
}

/// Check that `ffmpeg -version` runs successfully
///
/// Returns the detected major version when it can be parsed; git builds
/// without a numeric version still pass.
pub fn check_ffmpeg_available() -> Result<Option<u32>, StartupError> {
    let output = Command::new("ffmpeg")
        .arg("-version")
        .output()
        .map_err(|e| {
            StartupError::FfmpegUnavailable(format!(
                "ffmpeg -version failed; is FFmpeg installed and in PATH? Error: {}",
                e
            ))
        })?;

    if !output.status.success() {
        return Err(StartupError::FfmpegUnavailable(
            "ffmpeg -version failed; is FFmpeg installed and in PATH?".to_string(),
        ));
    }

    let version_output = String::from_utf8_lossy(&output.stdout);
    let major = parse_ffmpeg_version(&version_output);
    match major {
        Some(major) => info!("Found FFmpeg {}", major),
        None => info!(
            "Found FFmpeg ({})",
            version_output.lines().next().unwrap_or("unknown version")
        ),
    }

    Ok(major)
}

/// Whether `ffmpeg -encoders` output lists an encoder by name
///
/// Encoder lines look like ` V....D hevc_nvenc  NVIDIA NVENC hevc encoder`.
pub fn encoder_listed(encoders_output: &str, encoder: &str) -> bool {
    encoders_output.lines().any(|line| {
        let mut fields = line.split_whitespace();
        matches!(
            (fields.next(), fields.next()),
            (Some(flags), Some(name)) if flags.len() == 6 && name == encoder
        )
    })
}

/// Warn when the FFmpeg build does not ship the configured video encoder.
///
/// Not fatal: each encode will then fail and be logged on its own.
pub fn check_encoder_listed(encoder: &str) {
    let output = match Command::new("ffmpeg")
        .args(["-hide_banner", "-encoders"])
        .output()
    {
        Ok(output) if output.status.success() => output,
        _ => {
            warn!("Could not list FFmpeg encoders; skipping check for {}", encoder);
            return;
        }
    };

    if !encoder_listed(&String::from_utf8_lossy(&output.stdout), encoder) {
        warn!(
            "FFmpeg build does not list encoder '{}'; encodes are likely to fail",
            encoder
        );
    }
}

/// Run the tool checks in order: FFmpeg availability, then the encoder
pub fn run_startup_checks(video_codec: &str) -> Result<(), StartupError> {
    check_ffmpeg_available()?;
    check_encoder_listed(video_codec);
    Ok(())
}

/// Push a task left in the current-task register back onto the queue.
///
/// A non-empty register at boot means the previous process stopped mid-encode.
/// The task is re-enqueued at the tail and the register cleared.
pub async fn requeue_stale_current(
    store: &dyn QueueStore,
) -> Result<Option<VideoTask>, StoreError> {
    let Some(task) = store.get_current().await? else {
        return Ok(None);
    };

    store.enqueue(&task).await?;
    store.clear_current().await?;
    warn!("Re-queued interrupted task: {}", task);

    Ok(Some(task))
}
