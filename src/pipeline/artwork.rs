//! Cover art: fetch, center-crop to square, hand to the tagging stage.

use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Fetch the artwork at `url` and write a square JPEG into `dir`.
pub async fn fetch_square_cover(
    http: &reqwest::Client,
    url: &str,
    dir: &Path,
) -> anyhow::Result<PathBuf> {
    let bytes = http
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .bytes()
        .await?;

    let out = dir.join(format!("cover-{}.jpg", uuid::Uuid::new_v4()));
    // Decoding and cropping are CPU-bound; keep them off the async threads.
    let cropped = tokio::task::spawn_blocking(move || crop_square(&bytes, &out)).await??;
    Ok(cropped)
}

/// Center-crop to the shorter side and re-encode as JPEG.
fn crop_square(bytes: &[u8], out: &Path) -> anyhow::Result<PathBuf> {
    let img = image::load_from_memory(bytes)?;
    let (width, height) = (img.width(), img.height());
    let side = width.min(height);
    let cropped = img.crop_imm((width - side) / 2, (height - side) / 2, side, side);
    cropped
        .to_rgb8()
        .save_with_format(out, image::ImageFormat::Jpeg)?;
    Ok(out.to_path_buf())
}

/// Containers whose cover embedding works with stream copy.
fn supports_embedded_cover(ext: &str) -> bool {
    matches!(ext, "m4a" | "mp3" | "flac")
}

/// Embed the cover into the audio container without re-encoding. Containers
/// that cannot take an attached picture are left untouched.
pub async fn embed_cover(ffmpeg: &str, audio: &Path, cover: &Path) -> anyhow::Result<()> {
    let ext = audio
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if !supports_embedded_cover(&ext) {
        tracing::debug!(path = %audio.display(), "container does not take embedded covers; skipping");
        return Ok(());
    }

    let staged = audio.with_extension(format!("tagged.{ext}"));
    let status = Command::new(ffmpeg)
        .args(["-y", "-loglevel", "error"])
        .arg("-i")
        .arg(audio)
        .arg("-i")
        .arg(cover)
        .args(["-map", "0:a", "-map", "1"])
        .args(["-c", "copy"])
        .args(["-disposition:v:0", "attached_pic"])
        .arg(&staged)
        .status()
        .await?;

    if !status.success() {
        // Leave no stray staged file behind on failure.
        let _ = tokio::fs::remove_file(&staged).await;
        anyhow::bail!("ffmpeg cover embedding exited with {status}");
    }

    tokio::fs::rename(&staged, audio).await?;
    Ok(())
}
