//! Encode operation
//!
//! Wraps the external transcode and metadata-copy collaborators with the
//! skip-existing policy. Failures are contained here: the worker loop only
//! ever sees an [`EncodeOutcome`].
//!
//! Work happens on a hidden partial file next to the output, which is renamed
//! into place once it is fully transcoded and tagged. The output path only
//! ever holds a complete encode.

pub mod ffmpeg;

pub use ffmpeg::{
    build_metadata_command, build_transcode_command, FfmpegMetadataCopier, FfmpegTranscoder,
};

use crate::config::EncodeProfile;
use crate::store::VideoTask;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Markers carried by the hidden working files written next to an output
pub const WORKING_FILE_MARKERS: [&str; 2] = [".partial.", ".tags."];

/// Error type for encoding operations
#[derive(Debug, Error)]
pub enum EncodeError {
    /// ffmpeg could not be started
    #[error("Failed to start ffmpeg: {0}")]
    Spawn(std::io::Error),

    /// ffmpeg exited with non-zero status
    #[error("ffmpeg failed with exit code {code}: {stderr}")]
    FfmpegFailed { code: i32, stderr: String },

    /// ffmpeg was terminated by a signal
    #[error("ffmpeg process was terminated by signal")]
    FfmpegTerminated,

    /// Tags could not be copied onto the output
    #[error("Metadata copy failed: {0}")]
    Metadata(String),

    /// IO error preparing the output
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// External codec backend
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Transcode `input` into `output` using the profile's fixed settings.
    /// Long running; returns when the output is complete.
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        profile: &EncodeProfile,
    ) -> Result<(), EncodeError>;
}

/// External tag reader/writer
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataCopier: Send + Sync {
    /// Read every tag from `source` and persist the same set on `destination`
    async fn copy_tags(&self, source: &Path, destination: &Path) -> Result<(), EncodeError>;
}

/// Result of one encode operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeOutcome {
    /// Output written and tagged
    Encoded { output: PathBuf },
    /// Output already existed and skip-existing is on
    Skipped { output: PathBuf },
    /// Transcode or tag copy failed; the error has been logged
    Failed { output: PathBuf, reason: String },
}

impl EncodeOutcome {
    pub fn output(&self) -> &Path {
        match self {
            EncodeOutcome::Encoded { output }
            | EncodeOutcome::Skipped { output }
            | EncodeOutcome::Failed { output, .. } => output,
        }
    }
}

/// Derive the output path for a source file.
///
/// `<output_dir>/<source stem><suffix>.<container>`, e.g. `/in/movie.mp4`
/// with output dir `/out` and the default profile gives
/// `/out/movie_encoded.mkv`.
pub fn output_path_for(source: &Path, output_dir: &Path, profile: &EncodeProfile) -> PathBuf {
    let stem = source.file_stem().unwrap_or_default().to_string_lossy();
    output_dir.join(format!("{}{}.{}", stem, profile.suffix, profile.container))
}

/// Hidden sibling an output is assembled in before being renamed into place.
///
/// `/out/clip_encoded.mkv` -> `/out/.clip_encoded.partial.mkv`
pub fn partial_path_for(output: &Path) -> PathBuf {
    let stem = output.file_stem().unwrap_or_default().to_string_lossy();
    let name = match output.extension() {
        Some(ext) => format!(".{}.partial.{}", stem, ext.to_string_lossy()),
        None => format!(".{}.partial", stem),
    };
    output.with_file_name(name)
}

/// Transcode + metadata copy + skip policy for one task
pub struct EncodeOperation {
    transcoder: Arc<dyn Transcoder>,
    metadata: Arc<dyn MetadataCopier>,
    profile: EncodeProfile,
    output_dir: PathBuf,
    skip_existing: bool,
}

impl EncodeOperation {
    pub fn new(
        transcoder: Arc<dyn Transcoder>,
        metadata: Arc<dyn MetadataCopier>,
        profile: EncodeProfile,
        output_dir: PathBuf,
        skip_existing: bool,
    ) -> Self {
        Self {
            transcoder,
            metadata,
            profile,
            output_dir,
            skip_existing,
        }
    }

    /// Operation wired to the `ffmpeg` binary
    pub fn with_ffmpeg(profile: EncodeProfile, output_dir: PathBuf, skip_existing: bool) -> Self {
        Self::new(
            Arc::new(FfmpegTranscoder),
            Arc::new(FfmpegMetadataCopier),
            profile,
            output_dir,
            skip_existing,
        )
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn profile(&self) -> &EncodeProfile {
        &self.profile
    }

    /// Encode one task. Never fails: errors are logged with the source path
    /// and reported as [`EncodeOutcome::Failed`].
    pub async fn run(&self, task: &VideoTask) -> EncodeOutcome {
        let source = task.path();
        let output = output_path_for(source, &self.output_dir, &self.profile);

        if self.skip_existing && self.output_exists(&output).await {
            info!(
                "Skipping encoding of {}, output already exists: {}",
                source.display(),
                output.display()
            );
            return EncodeOutcome::Skipped { output };
        }

        match self.encode(source, &output).await {
            Ok(()) => {
                info!("Encoded: {} -> {}", source.display(), output.display());
                EncodeOutcome::Encoded { output }
            }
            Err(e) => {
                error!("Failed to encode {}: {}", source.display(), e);
                EncodeOutcome::Failed {
                    output,
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn output_exists(&self, output: &Path) -> bool {
        match tokio::fs::try_exists(output).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!("Could not check for existing output {}: {}", output.display(), e);
                false
            }
        }
    }

    async fn encode(&self, source: &Path, output: &Path) -> Result<(), EncodeError> {
        tokio::fs::create_dir_all(&self.output_dir).await?;

        let partial = partial_path_for(output);
        let result = self.encode_via(source, &partial, output).await;

        if result.is_err() {
            if let Err(e) = tokio::fs::remove_file(&partial).await {
                debug!("No partial output removed at {}: {}", partial.display(), e);
            }
        }
        result
    }

    async fn encode_via(
        &self,
        source: &Path,
        partial: &Path,
        output: &Path,
    ) -> Result<(), EncodeError> {
        self.transcoder
            .transcode(source, partial, &self.profile)
            .await?;

        // Tags are written only once the transcode has produced the file
        self.metadata.copy_tags(source, partial).await?;

        tokio::fs::rename(partial, output).await?;
        Ok(())
    }
}

/// Stand-in transcode that writes a small finished file at `output`
#[cfg(test)]
pub(crate) fn write_encoded(
    _input: &Path,
    output: &Path,
    _profile: &EncodeProfile,
) -> Result<(), EncodeError> {
    std::fs::write(output, b"encoded").map_err(Into::into)
}
