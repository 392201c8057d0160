//! External downloader invocation (yt-dlp) and its report format.

use crate::config::DownloaderConfig;
use crate::error::PipelineError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tokio::process::Command;

/// File extensions the pipeline accepts as finished audio.
pub const AUDIO_EXTENSIONS: &[&str] = &["m4a", "mp3", "opus", "ogg", "flac", "aac", "wav"];

/// Whether a path carries a known audio extension.
pub fn is_audio_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let lowered = ext.to_ascii_lowercase();
            AUDIO_EXTENSIONS.contains(&lowered.as_str())
        })
        .unwrap_or(false)
}

/// Parsed subset of the downloader's per-item JSON report.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DownloadReport {
    #[serde(default)]
    pub id: String,
    pub title: Option<String>,
    pub track: Option<String>,
    pub artist: Option<String>,
    pub creator: Option<String>,
    pub uploader: Option<String>,
    pub channel: Option<String>,
    pub album: Option<String>,
    pub release_year: Option<i64>,
    pub duration: Option<f64>,
    /// Extension reported after the postprocessing chain ran. The template
    /// expansion may still carry the raw container's extension.
    pub ext: Option<String>,
    pub filepath: Option<PathBuf>,
    pub webpage_url: Option<String>,
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub thumbnails: Vec<ThumbnailRef>,
    #[serde(default)]
    pub requested_downloads: Vec<RequestedDownload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThumbnailRef {
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// One postprocessed download the report points at.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestedDownload {
    pub filepath: Option<PathBuf>,
    pub ext: Option<String>,
}

fn topic_suffix() -> &'static regex::Regex {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| regex::Regex::new(r"\s*-\s*Topic$").expect("static pattern"))
}

impl DownloadReport {
    /// Track title, preferring the embedded-tag field over the page title.
    pub fn display_title(&self) -> String {
        self.track
            .clone()
            .or_else(|| self.title.clone())
            .unwrap_or_else(|| self.id.clone())
    }

    /// Performer, falling back through uploader fields with the service's
    /// auto-channel suffix stripped.
    pub fn performer(&self) -> Option<String> {
        self.artist
            .clone()
            .or_else(|| self.creator.clone())
            .or_else(|| self.uploader.clone())
            .or_else(|| self.channel.clone())
            .map(|raw| topic_suffix().replace(&raw, "").trim().to_string())
            .filter(|name| !name.is_empty())
    }

    pub fn duration_secs(&self) -> Option<u32> {
        self.duration.map(|secs| secs.round() as u32)
    }

    /// Largest thumbnail by area, or the report's single thumbnail URL.
    pub fn best_thumbnail(&self) -> Option<&str> {
        self.thumbnails
            .iter()
            .max_by_key(|thumb| {
                u64::from(thumb.width.unwrap_or(0)) * u64::from(thumb.height.unwrap_or(0))
            })
            .map(|thumb| thumb.url.as_str())
            .or(self.thumbnail.as_deref())
    }
}

/// Runs the downloader for exactly one item with audio postprocessing.
#[derive(Debug, Clone)]
pub struct TrackDownloader {
    binary: String,
    format: String,
    audio_format: String,
}

impl TrackDownloader {
    pub fn new(config: &DownloaderConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            format: config.format.clone(),
            audio_format: config.audio_format.clone(),
        }
    }

    /// Invoke the downloader; stdout carries the item's JSON report.
    ///
    /// Cover art is embedded later by the tagging stage, not here, so the
    /// cropped square artwork ends up in the file instead of the raw
    /// widescreen thumbnail.
    pub async fn run(
        &self,
        url: &str,
        output_template: &Path,
    ) -> Result<DownloadReport, PipelineError> {
        tracing::info!(url, binary = %self.binary, "invoking downloader");

        let output = Command::new(&self.binary)
            .arg("--no-playlist")
            .arg("--no-progress")
            .arg("--no-warnings")
            .args(["-f", self.format.as_str()])
            .arg("--extract-audio")
            .args(["--audio-format", self.audio_format.as_str()])
            .arg("--embed-metadata")
            .arg("-o")
            .arg(output_template)
            .args(["-j", "--no-simulate"])
            .arg(url)
            .output()
            .await
            .map_err(|error| PipelineError::Downloader {
                detail: format!("failed to spawn {}: {error}", self.binary),
                partial_file: false,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr
                .lines()
                .find(|line| line.contains("ERROR"))
                .or_else(|| stderr.lines().last())
                .unwrap_or("downloader exited unsuccessfully")
                .to_string();
            let partial_file = output_template
                .parent()
                .map(has_partial_artifacts)
                .unwrap_or(false);
            return Err(PipelineError::Downloader {
                detail,
                partial_file,
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let report_line = stdout
            .lines()
            .rev()
            .find(|line| line.trim_start().starts_with('{'))
            .ok_or_else(|| PipelineError::Downloader {
                detail: "downloader produced no report".into(),
                partial_file: false,
            })?;

        serde_json::from_str(report_line).map_err(|error| PipelineError::Downloader {
            detail: format!("unreadable downloader report: {error}"),
            partial_file: false,
        })
    }
}

/// Leftover in-flight artifacts from an interrupted download.
fn has_partial_artifacts(dir: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    entries.flatten().any(|entry| {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        name.ends_with(".part") || name.ends_with(".ytdl")
    })
}
