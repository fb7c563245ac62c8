use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Suffix appended to an input path to name its fast-start output.
pub const FAST_START_SUFFIX: &str = ".processing";

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("failed to execute {tool}: {source}")]
    Spawn {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        tool: &'static str,
        status: String,
        stderr: String,
    },

    #[error("failed to decode ffprobe output: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("ffprobe reported no streams")]
    NoStreams,

    #[error("first stream has no display aspect ratio")]
    MissingAspectRatio,
}

/// Reads stream metadata from a local container file.
#[async_trait]
pub trait MediaProber: Send + Sync {
    /// Display aspect ratio of the first stream, e.g. `16:9`.
    async fn display_aspect_ratio(&self, path: &Path) -> Result<String, MediaError>;
}

/// Rewrites a container so its index precedes the media data.
#[async_trait]
pub trait FastStartRemuxer: Send + Sync {
    /// Writes to [`fast_start_output_path`] of `input` and returns that path.
    /// A failed run may leave a partial file behind.
    async fn fast_start(&self, input: &Path) -> Result<PathBuf, MediaError>;
}

pub fn fast_start_output_path(input: &Path) -> PathBuf {
    let mut path = input.as_os_str().to_owned();
    path.push(FAST_START_SUFFIX);
    PathBuf::from(path)
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeStream {
    display_aspect_ratio: Option<String>,
}

/// Extract `streams[0].display_aspect_ratio` from `ffprobe -print_format json`.
pub fn parse_display_aspect_ratio(stdout: &[u8]) -> Result<String, MediaError> {
    let output: ProbeOutput = serde_json::from_slice(stdout)?;
    let first = output.streams.into_iter().next().ok_or(MediaError::NoStreams)?;
    first
        .display_aspect_ratio
        .filter(|ratio| !ratio.is_empty())
        .ok_or(MediaError::MissingAspectRatio)
}

/// Shells out to the ffmpeg/ffprobe binaries.
#[derive(Clone, Debug)]
pub struct Ffmpeg {
    ffmpeg_path: String,
    ffprobe_path: String,
}

impl Ffmpeg {
    pub fn new(ffmpeg_path: impl Into<String>, ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
        }
    }
}

#[async_trait]
impl MediaProber for Ffmpeg {
    async fn display_aspect_ratio(&self, path: &Path) -> Result<String, MediaError> {
        let output = Command::new(&self.ffprobe_path)
            .arg("-v")
            .arg("error")
            .arg("-print_format")
            .arg("json")
            .arg("-show_streams")
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| MediaError::Spawn {
                tool: "ffprobe",
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(MediaError::Failed {
                tool: "ffprobe",
                status: output.status.to_string(),
                stderr,
            });
        }

        let ratio = parse_display_aspect_ratio(&output.stdout)?;
        debug!(path = %path.display(), %ratio, "ffprobe aspect ratio");
        Ok(ratio)
    }
}

#[async_trait]
impl FastStartRemuxer for Ffmpeg {
    async fn fast_start(&self, input: &Path) -> Result<PathBuf, MediaError> {
        let output_path = fast_start_output_path(input);

        let output = Command::new(&self.ffmpeg_path)
            .arg("-i")
            .arg(input)
            .arg("-c")
            .arg("copy")
            .arg("-movflags")
            .arg("faststart")
            .arg("-f")
            .arg("mp4")
            .arg("-y") // Overwrite output file
            .arg(&output_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| MediaError::Spawn {
                tool: "ffmpeg",
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(input = %input.display(), "ffmpeg fast-start remux failed");
            return Err(MediaError::Failed {
                tool: "ffmpeg",
                status: output.status.to_string(),
                stderr,
            });
        }

        Ok(output_path)
    }
}

/// First line of `<binary> -version`, if the binary runs.
pub async fn tool_version(binary: &str) -> Option<String> {
    let output = Command::new(binary).arg("-version").output().await.ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(str::to_string)
}
