//! Top-level error types for Tunegrab.

use std::path::PathBuf;
use std::time::Duration;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error(transparent)]
    Music(#[from] MusicError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config from {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required config key: {0}")]
    MissingKey(String),
}

/// Chat platform errors, classified for the retry wrapper.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("rate limited by the chat platform, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("chat platform network error: {0}")]
    Network(String),

    #[error("message no longer exists or cannot be touched: {0}")]
    MessageGone(String),

    #[error("chat platform API error: {0}")]
    Api(String),
}

/// Metadata/search service errors.
#[derive(Debug, thiserror::Error)]
pub enum MusicError {
    #[error("metadata service rejected credentials (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("transient metadata service error: {0}")]
    Transient(String),

    #[error("metadata service rate limit")]
    RateLimited,

    #[error("not found on the metadata service: {0}")]
    NotFound(String),

    #[error("unexpected metadata service response: {0}")]
    Parse(String),

    #[error("metadata service error (HTTP {status})")]
    Status { status: u16 },
}

/// Download pipeline errors. Ambiguous output and incomplete downloads are
/// fatal to the operation; tag problems surface as warnings on the result
/// instead of living here.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("downloader produced {} candidate files for {video_id}; refusing to guess", candidates.len())]
    AmbiguousOutput {
        video_id: String,
        candidates: Vec<PathBuf>,
    },

    #[error("no finished audio file for {video_id}: {detail}")]
    DownloadIncomplete { video_id: String, detail: String },

    #[error("downloader failed: {detail}")]
    Downloader { detail: String, partial_file: bool },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
