//! Download pipeline orchestrator.
//!
//! Drives the external downloader for one media item, resolves the single
//! file its postprocessing chain actually produced, applies cover art and
//! tag confirmation, and guarantees that every temporary artifact dies with
//! the per-operation workspace — on success, failure, and cancellation.

pub mod artwork;
pub mod downloader;

pub use self::downloader::{DownloadReport, TrackDownloader};

use self::downloader::is_audio_path;
use crate::config::DownloaderConfig;
use crate::error::PipelineError;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

/// Pipeline states for one download, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Requested,
    Fetching,
    Postprocessing,
    ResolvingOutput,
    Tagging,
    Complete,
    Failed,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Stage::Requested => "requested",
            Stage::Fetching => "fetching",
            Stage::Postprocessing => "postprocessing",
            Stage::ResolvingOutput => "resolving output",
            Stage::Tagging => "tagging",
            Stage::Complete => "complete",
            Stage::Failed => "failed",
        }
    }
}

/// Outcome of a confirmed single-item download.
///
/// Holds the operation workspace alive until the caller is done sending the
/// file; dropping the result removes every leftover artifact except the
/// confirmed audio file, which has already been moved out.
#[derive(Debug)]
pub struct DownloadResult {
    pub path: PathBuf,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub duration_secs: Option<u32>,
    pub source_url: String,
    pub video_id: String,
    /// Square cover image, still inside the workspace.
    pub cover: Option<PathBuf>,
    /// Non-fatal tag problems.
    pub warnings: Vec<String>,
    _workspace: TempDir,
}

pub struct DownloadPipeline {
    downloader: TrackDownloader,
    http: reqwest::Client,
    ffmpeg: String,
    download_dir: PathBuf,
    output_template: String,
    embed_cover: bool,
}

impl DownloadPipeline {
    pub fn new(config: &DownloaderConfig, download_dir: PathBuf, http: reqwest::Client) -> Self {
        Self {
            downloader: TrackDownloader::new(config),
            http,
            ffmpeg: config.ffmpeg.clone(),
            download_dir,
            output_template: config.output_template.clone(),
            embed_cover: config.embed_cover,
        }
    }

    fn enter(&self, stage: Stage, video_id: &str) {
        tracing::debug!(video_id, stage = stage.label(), "pipeline stage");
    }

    /// Run the full pipeline for one media item.
    pub async fn download(
        &self,
        url: &str,
        video_id: &str,
    ) -> Result<DownloadResult, PipelineError> {
        self.enter(Stage::Requested, video_id);
        tokio::fs::create_dir_all(&self.download_dir).await?;
        // The workspace lives inside the destination directory so the final
        // rename stays on one filesystem.
        let workspace = tempfile::Builder::new()
            .prefix("tunegrab-")
            .tempdir_in(&self.download_dir)?;
        let started = SystemTime::now();
        let template = workspace.path().join(&self.output_template);

        self.enter(Stage::Fetching, video_id);
        let report = match self.downloader.run(url, &template).await {
            Ok(report) => report,
            Err(error) => {
                self.enter(Stage::Failed, video_id);
                return Err(error);
            }
        };
        self.enter(Stage::Postprocessing, video_id);

        self.enter(Stage::ResolvingOutput, video_id);
        let resolved = match resolve_output(&report, workspace.path(), started, video_id) {
            Ok(path) => path,
            Err(error) => {
                self.enter(Stage::Failed, video_id);
                return Err(error);
            }
        };
        tracing::info!(video_id, path = %resolved.display(), "download output confirmed");

        self.enter(Stage::Tagging, video_id);
        let mut warnings = Vec::new();

        let cover = match report.best_thumbnail() {
            Some(thumb_url) if self.embed_cover => {
                match artwork::fetch_square_cover(&self.http, thumb_url, workspace.path()).await {
                    Ok(cover) => {
                        if let Err(error) =
                            artwork::embed_cover(&self.ffmpeg, &resolved, &cover).await
                        {
                            tracing::warn!(video_id, %error, "cover embedding failed");
                            warnings.push("cover art could not be embedded".to_string());
                        }
                        Some(cover)
                    }
                    Err(error) => {
                        tracing::warn!(video_id, %error, "artwork fetch failed");
                        warnings.push("artwork unavailable".to_string());
                        None
                    }
                }
            }
            _ => None,
        };

        // Tag confirmation from the downloader's report: missing title or
        // artist is surfaced, not fatal.
        if report.track.is_none() && report.title.is_none() {
            warnings.push("missing title tag".to_string());
        }
        let artist = report.performer();
        if artist.is_none() {
            warnings.push("missing artist tag".to_string());
        }

        // Move the confirmed file out of the workspace so cleanup spares it.
        let final_path = unique_destination(&self.download_dir, &resolved);
        tokio::fs::rename(&resolved, &final_path).await?;

        self.enter(Stage::Complete, video_id);
        Ok(DownloadResult {
            path: final_path,
            title: report.display_title(),
            artist: artist.unwrap_or_else(|| "Unknown".to_string()),
            album: report.album.clone(),
            duration_secs: report.duration_secs(),
            source_url: report
                .webpage_url
                .clone()
                .unwrap_or_else(|| url.to_string()),
            video_id: if report.id.is_empty() {
                video_id.to_string()
            } else {
                report.id.clone()
            },
            cover,
            warnings,
            _workspace: workspace,
        })
    }
}

/// Resolve the single finished audio file for this operation.
///
/// Order: the paths the downloader reported; the template expansion
/// re-derived with the reported final extension; a scan of the workspace
/// constrained to this operation's time window and the item's id. Two or
/// more scan matches abort rather than guess.
pub(crate) fn resolve_output(
    report: &DownloadReport,
    workspace: &Path,
    started: SystemTime,
    video_id: &str,
) -> Result<PathBuf, PipelineError> {
    // 1. Reported postprocessed paths, final stage last.
    for requested in report.requested_downloads.iter().rev() {
        if let Some(path) = &requested.filepath {
            if is_finished_audio(path) {
                return Ok(path.clone());
            }
        }
    }
    if let Some(path) = &report.filepath {
        if is_finished_audio(path) {
            return Ok(path.clone());
        }
    }

    // 2. Re-derive with the postprocessor's reported extension.
    if let Some(ext) = report.ext.as_deref() {
        let bases = report
            .requested_downloads
            .iter()
            .filter_map(|requested| requested.filepath.as_deref())
            .chain(report.filepath.as_deref());
        for base in bases {
            let candidate = base.with_extension(ext);
            if is_finished_audio(&candidate) {
                return Ok(candidate);
            }
        }
    }

    // 3. Constrained workspace scan. Filesystem timestamps are coarse on
    // some platforms, so the window opens slightly before the operation.
    let window_start = started
        .checked_sub(Duration::from_secs(2))
        .unwrap_or(started);
    let mut candidates = Vec::new();
    for entry in std::fs::read_dir(workspace)? {
        let entry = entry?;
        let path = entry.path();
        if !is_finished_audio(&path) {
            continue;
        }
        let name_matches = path
            .file_name()
            .map(|name| name.to_string_lossy().contains(video_id))
            .unwrap_or(false);
        if !name_matches {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        if modified < window_start {
            continue;
        }
        candidates.push(path);
    }

    match candidates.len() {
        0 => Err(PipelineError::DownloadIncomplete {
            video_id: video_id.to_string(),
            detail: "no finished audio file matched the requested item".to_string(),
        }),
        1 => Ok(candidates.remove(0)),
        _ => {
            candidates.sort();
            Err(PipelineError::AmbiguousOutput {
                video_id: video_id.to_string(),
                candidates,
            })
        }
    }
}

/// Existing, non-empty file with a known audio extension.
fn is_finished_audio(path: &Path) -> bool {
    if !is_audio_path(path) {
        return false;
    }
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}

/// Destination path in `dir` for `source`, de-collided with a short suffix
/// when a previous download already used the name.
fn unique_destination(dir: &Path, source: &Path) -> PathBuf {
    let name = source
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("track-{}", uuid::Uuid::new_v4()));
    let destination = dir.join(&name);
    if !destination.exists() {
        return destination;
    }

    let stem = source
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "track".to_string());
    let ext = source
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tag = uuid::Uuid::new_v4().simple().to_string();
    let short = &tag[..8];
    if ext.is_empty() {
        dir.join(format!("{stem} ({short})"))
    } else {
        dir.join(format!("{stem} ({short}).{ext}"))
    }
}
