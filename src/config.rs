//! Configuration loading and validation.

use crate::error::{ConfigError, Result};
use crate::retry::RetryPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tunegrab configuration, merged from a TOML file over defaults with
/// environment fallbacks for secrets.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Data directory path. Defaults to the platform data dir.
    pub data_dir: Option<PathBuf>,

    pub bot: BotConfig,
    pub telegram: TelegramConfig,
    pub music: MusicConfig,
    pub downloader: DownloaderConfig,
    pub history: HistoryConfig,
    pub retry: RetryConfig,
}

/// Bot behavior settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Command prefix, e.g. `,dl`.
    pub prefix: String,

    /// Global kill switch; disabled bots ignore every message.
    pub enabled: bool,

    /// Delete previous bot output before answering qualifying commands.
    pub auto_clear: bool,

    /// Send and edit a live status message for long operations.
    pub progress_messages: bool,

    /// Minimum interval between status-message edits, in milliseconds.
    pub edit_throttle_ms: u64,

    /// Maximum tracked bot messages per conversation; oldest are dropped.
    pub response_log_cap: usize,

    /// Wall-clock budget for one command; elapsed operations are cancelled.
    pub operation_timeout_secs: u64,

    /// How many results a search requests from the metadata service.
    pub search_limit: usize,

    /// How many results a search renders into the chat.
    pub search_display_limit: usize,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            prefix: ",".into(),
            enabled: true,
            auto_clear: true,
            progress_messages: true,
            edit_throttle_ms: 1_000,
            response_log_cap: 200,
            operation_timeout_secs: 600,
            search_limit: 8,
            search_display_limit: 6,
        }
    }
}

/// Telegram connection settings.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot token; falls back to `TUNEGRAB_BOT_TOKEN` / `TELOXIDE_TOKEN`.
    pub bot_token: Option<String>,

    /// The only user allowed to issue commands; falls back to
    /// `TUNEGRAB_OWNER_ID`.
    pub owner_id: Option<u64>,
}

/// Metadata service settings.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct MusicConfig {
    /// JSON file of request headers captured from an authenticated browser
    /// session. Absent or invalid files fall back to an anonymous session.
    pub auth_headers_file: Option<PathBuf>,
}

/// External downloader settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloaderConfig {
    /// Downloader binary name or path.
    pub binary: String,

    /// ffmpeg binary name or path, used by the tagging stage.
    pub ffmpeg: String,

    /// Format selector passed to the downloader.
    pub format: String,

    /// Target audio codec for the extraction postprocessor. Sources already
    /// in this format are remuxed, not re-encoded.
    pub audio_format: String,

    /// Output filename template, expanded inside the operation workspace.
    pub output_template: String,

    /// Where confirmed files land. Defaults to `<data_dir>/downloads`.
    pub download_dir: Option<PathBuf>,

    /// Fetch, crop, and embed square cover art into the finished file.
    pub embed_cover: bool,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            binary: "yt-dlp".into(),
            ffmpeg: "ffmpeg".into(),
            format: "bestaudio[ext=m4a]/best[ext=m4a]".into(),
            audio_format: "m4a".into(),
            output_template: "%(title)s [%(id)s].%(ext)s".into(),
            download_dir: None,
            embed_cover: true,
        }
    }
}

/// Recent-downloads history settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub enabled: bool,

    /// Most recent records kept; older rows are trimmed on write.
    pub limit: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            limit: 10,
        }
    }
}

/// Retry budget for external calls.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2_000,
            max_delay_ms: 30_000,
        }
    }
}

impl Config {
    /// Load configuration from the default location, or defaults plus
    /// environment when no file exists.
    pub fn load() -> Result<Self> {
        let default_path = dirs::config_dir()
            .map(|d| d.join("tunegrab").join("tunegrab.toml"))
            .filter(|p| p.exists());

        match default_path {
            Some(path) => Self::load_from_path(&path),
            None => {
                let mut config = Config::default();
                config.apply_env();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Load from a specific config file path.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: Config = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Pull secrets from the environment when the file leaves them unset.
    fn apply_env(&mut self) {
        if self.telegram.bot_token.is_none() {
            self.telegram.bot_token = std::env::var("TUNEGRAB_BOT_TOKEN")
                .or_else(|_| std::env::var("TELOXIDE_TOKEN"))
                .ok();
        }
        if self.telegram.owner_id.is_none() {
            self.telegram.owner_id = std::env::var("TUNEGRAB_OWNER_ID")
                .ok()
                .and_then(|raw| raw.parse().ok());
        }
    }

    fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.as_deref().unwrap_or("").is_empty() {
            return Err(ConfigError::MissingKey(
                "telegram.bot_token (or TUNEGRAB_BOT_TOKEN)".into(),
            )
            .into());
        }
        if self.telegram.owner_id.is_none() {
            return Err(
                ConfigError::MissingKey("telegram.owner_id (or TUNEGRAB_OWNER_ID)".into()).into(),
            );
        }
        if self.bot.prefix.is_empty() {
            return Err(ConfigError::Invalid("bot.prefix must not be empty".into()).into());
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()).into());
        }
        Ok(())
    }

    /// Resolved data directory.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .map(|d| d.join("tunegrab"))
                .unwrap_or_else(|| PathBuf::from("./data"))
        })
    }

    /// Where confirmed downloads land.
    pub fn download_dir(&self) -> PathBuf {
        self.downloader
            .download_dir
            .clone()
            .unwrap_or_else(|| self.data_dir().join("downloads"))
    }

    /// History database path.
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir().join("tunegrab.db")
    }

    pub fn edit_throttle(&self) -> Duration {
        Duration::from_millis(self.bot.edit_throttle_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.bot.operation_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_shipped_behavior() {
        let config = Config::default();
        assert_eq!(config.bot.prefix, ",");
        assert!(config.bot.auto_clear);
        assert!(config.bot.progress_messages);
        assert_eq!(config.history.limit, 10);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.downloader.audio_format, "m4a");
    }

    #[test]
    fn partial_file_keeps_defaults_for_the_rest() {
        let parsed: Config = toml::from_str(
            r#"
            [bot]
            prefix = "!"
            auto_clear = false

            [history]
            limit = 25
            "#,
        )
        .expect("partial config should parse");

        assert_eq!(parsed.bot.prefix, "!");
        assert!(!parsed.bot.auto_clear);
        assert!(parsed.bot.progress_messages, "untouched keys keep defaults");
        assert_eq!(parsed.history.limit, 25);
        assert_eq!(parsed.downloader.binary, "yt-dlp");
    }

    #[test]
    fn retry_policy_converts_units() {
        let config = Config::default();
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(2));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
    }
}
