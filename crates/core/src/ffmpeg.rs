//! FFmpeg/FFprobe command wrappers.
//!
//! Used for video and audio files: `ffprobe` supplies duration, dimensions
//! and container tags (where video workflows are embedded), `ffmpeg` grabs a
//! frame for the thumbnail. Both run with a configurable executable path and
//! a hard timeout. A missing executable is reported as
//! [`FfmpegError::NotFound`] so callers can degrade instead of failing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;

use crate::config::GalleryConfig;

/// Error type for FFmpeg/FFprobe operations.
#[derive(Debug, thiserror::Error)]
pub enum FfmpegError {
    #[error("ffprobe/ffmpeg binary not found: {0}")]
    NotFound(std::io::Error),

    #[error("ffprobe/ffmpeg execution failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("ffprobe/ffmpeg timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to parse ffprobe output: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("media file not found: {0}")]
    MediaNotFound(String),
}

impl FfmpegError {
    /// Whether the tool itself is unavailable (as opposed to the file being bad).
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

// ---------------------------------------------------------------------------
// ffprobe JSON output structures
// ---------------------------------------------------------------------------

/// Top-level ffprobe JSON output (`-print_format json -show_format -show_streams`).
#[derive(Debug, Deserialize)]
pub struct FfprobeOutput {
    #[serde(default)]
    pub streams: Vec<FfprobeStream>,
    pub format: FfprobeFormat,
}

/// A single stream from ffprobe output.
#[derive(Debug, Deserialize)]
pub struct FfprobeStream {
    pub index: i32,
    pub codec_name: Option<String>,
    pub codec_type: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub duration: Option<String>,
    pub tags: Option<HashMap<String, String>>,
}

/// Format-level metadata from ffprobe.
#[derive(Debug, Deserialize)]
pub struct FfprobeFormat {
    pub duration: Option<String>,
    pub format_name: Option<String>,
    /// Container tags. ComfyUI video nodes write `prompt`, `workflow` and
    /// `comment` here.
    pub tags: Option<HashMap<String, String>>,
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Configured ffprobe/ffmpeg invoker.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    pub ffprobe_path: PathBuf,
    pub ffmpeg_path: PathBuf,
    pub timeout: Duration,
}

impl Ffmpeg {
    pub fn from_config(config: &GalleryConfig) -> Self {
        Self {
            ffprobe_path: config.ffprobe_path.clone(),
            ffmpeg_path: config.ffmpeg_path.clone(),
            timeout: config.probe_timeout,
        }
    }

    /// Run `ffprobe` on a media file and return the parsed JSON output.
    pub async fn probe(&self, path: &Path) -> Result<FfprobeOutput, FfmpegError> {
        if !path.exists() {
            return Err(FfmpegError::MediaNotFound(
                path.to_string_lossy().to_string(),
            ));
        }

        let mut cmd = Command::new(&self.ffprobe_path);
        cmd.args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path);

        let stdout = self.run(cmd).await?;
        serde_json::from_slice::<FfprobeOutput>(&stdout)
            .map_err(|e| FfmpegError::ParseError(e.to_string()))
    }

    /// Grab the frame at `timestamp_secs` as a JPEG scaled to `width`,
    /// preserving the aspect ratio.
    pub async fn extract_frame(
        &self,
        input: &Path,
        output: &Path,
        timestamp_secs: f64,
        width: u32,
    ) -> Result<(), FfmpegError> {
        if !input.exists() {
            return Err(FfmpegError::MediaNotFound(
                input.to_string_lossy().to_string(),
            ));
        }

        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(["-y", "-v", "error", "-ss", &format!("{timestamp_secs:.3}"), "-i"])
            .arg(input)
            .args([
                "-frames:v",
                "1",
                "-vf",
                &format!("scale={width}:-2"),
                "-q:v",
                "3",
            ])
            .arg(output);

        self.run(cmd).await.map(|_| ())
    }

    /// Spawn `cmd`, enforce the timeout and return stdout on success.
    async fn run(&self, mut cmd: Command) -> Result<Vec<u8>, FfmpegError> {
        // The child is killed when the output future is dropped on timeout.
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FfmpegError::NotFound(e));
            }
            Ok(Err(e)) => return Err(FfmpegError::IoError(e)),
            Err(_elapsed) => return Err(FfmpegError::Timeout(self.timeout)),
        };

        if !output.status.success() {
            return Err(FfmpegError::ExecutionFailed {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        Ok(output.stdout)
    }
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

/// Find the first video stream in the ffprobe output.
fn first_video_stream(probe: &FfprobeOutput) -> Option<&FfprobeStream> {
    probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
}

/// Media duration in seconds: format-level first, then the first stream
/// that reports one.
pub fn parse_duration(probe: &FfprobeOutput) -> Option<f64> {
    let format = probe
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok());
    format
        .or_else(|| {
            probe
                .streams
                .iter()
                .filter_map(|s| s.duration.as_deref())
                .find_map(|d| d.parse::<f64>().ok())
        })
        .filter(|d| d.is_finite() && *d >= 0.0)
}

/// Resolution of the first video stream. `None` for audio-only files.
pub fn parse_resolution(probe: &FfprobeOutput) -> Option<(u32, u32)> {
    let stream = first_video_stream(probe)?;
    let width = u32::try_from(stream.width?).ok()?;
    let height = u32::try_from(stream.height?).ok()?;
    (width > 0 && height > 0).then_some((width, height))
}

/// Case-insensitive lookup of a container tag, falling back to stream tags.
pub fn container_tag<'a>(probe: &'a FfprobeOutput, key: &str) -> Option<&'a str> {
    let find = |tags: &'a HashMap<String, String>| {
        tags.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    };
    probe
        .format
        .tags
        .as_ref()
        .and_then(find)
        .or_else(|| probe.streams.iter().filter_map(|s| s.tags.as_ref()).find_map(find))
}
