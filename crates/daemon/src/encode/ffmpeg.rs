//! FFmpeg-backed transcoder and metadata copier
//!
//! Builds and runs the `ffmpeg` invocations used by the encode operation.
//! Children are spawned with `kill_on_drop` so abandoning an encode on
//! shutdown also stops the process.

use super::{EncodeError, MetadataCopier, Transcoder};
use crate::config::EncodeProfile;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Number of stderr lines kept in a failure report
const STDERR_TAIL_LINES: usize = 5;

/// Build the transcode command for one source file
///
/// Creates a Command configured with:
/// - No stdin interaction and unconditional overwrite of the output
/// - Video codec, preset and constant quantizer from the profile
/// - Audio codec and bitrate from the profile
pub fn build_transcode_command(input: &Path, output: &Path, profile: &EncodeProfile) -> Command {
    let mut cmd = Command::new("ffmpeg");

    cmd.arg("-nostdin").arg("-y");
    cmd.arg("-i").arg(input);

    cmd.arg("-c:v").arg(&profile.video_codec);
    cmd.arg("-preset").arg(&profile.preset);
    cmd.arg("-qp").arg(profile.qp.to_string());

    cmd.arg("-c:a").arg(&profile.audio_codec);
    cmd.arg("-b:a").arg(&profile.audio_bitrate);

    cmd.arg(output);
    cmd
}

/// Temporary sibling used while rewriting tags on `output`.
///
/// Keeps the container extension so ffmpeg selects the same muxer:
/// `/out/clip_encoded.mkv` -> `/out/.clip_encoded.tags.mkv`
pub fn metadata_temp_path(output: &Path) -> PathBuf {
    let stem = output.file_stem().unwrap_or_default().to_string_lossy();
    let name = match output.extension() {
        Some(ext) => format!(".{}.tags.{}", stem, ext.to_string_lossy()),
        None => format!(".{}.tags", stem),
    };
    output.with_file_name(name)
}

/// Build the tag copy command.
///
/// Streams of `output` are copied untouched into `temp` while the global
/// (container-level) tags are taken from `source`. Per-stream tags stay as
/// the transcode wrote them.
pub fn build_metadata_command(source: &Path, output: &Path, temp: &Path) -> Command {
    let mut cmd = Command::new("ffmpeg");

    cmd.arg("-nostdin").arg("-y");
    cmd.arg("-i").arg(output);
    cmd.arg("-i").arg(source);
    cmd.arg("-map").arg("0");
    cmd.arg("-map_metadata").arg("1");
    cmd.arg("-c").arg("copy");
    cmd.arg(temp);
    cmd
}

/// Run an ffmpeg command to completion and map its exit status
async fn run_ffmpeg(mut cmd: Command) -> Result<(), EncodeError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("Running {:?}", cmd.as_std());

    let output = cmd.output().await.map_err(EncodeError::Spawn)?;

    if output.status.success() {
        return Ok(());
    }

    match output.status.code() {
        Some(code) => Err(EncodeError::FfmpegFailed {
            code,
            stderr: stderr_tail(&output.stderr),
        }),
        None => Err(EncodeError::FfmpegTerminated),
    }
}

/// Last few lines of ffmpeg's diagnostic output
fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let mut lines: Vec<&str> = text
        .lines()
        .rev()
        .filter(|l| !l.trim().is_empty())
        .take(STDERR_TAIL_LINES)
        .collect();
    lines.reverse();
    lines.join("\n")
}

/// [`Transcoder`] running the `ffmpeg` binary from `PATH`
#[derive(Debug, Clone, Default)]
pub struct FfmpegTranscoder;

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        profile: &EncodeProfile,
    ) -> Result<(), EncodeError> {
        run_ffmpeg(build_transcode_command(input, output, profile)).await
    }
}

/// [`MetadataCopier`] remuxing the output with the source's tags
#[derive(Debug, Clone, Default)]
pub struct FfmpegMetadataCopier;

#[async_trait]
impl MetadataCopier for FfmpegMetadataCopier {
    async fn copy_tags(&self, source: &Path, destination: &Path) -> Result<(), EncodeError> {
        let temp = metadata_temp_path(destination);

        if let Err(e) = run_ffmpeg(build_metadata_command(source, destination, &temp)).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(EncodeError::Metadata(e.to_string()));
        }

        tokio::fs::rename(&temp, destination).await.map_err(|e| {
            EncodeError::Metadata(format!(
                "failed to replace {} with tagged copy: {}",
                destination.display(),
                e
            ))
        })
    }
}
