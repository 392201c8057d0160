//! Tunegrab CLI entry point.

use anyhow::Context as _;
use clap::Parser;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tunegrab")]
#[command(about = "A single-account Telegram music grabber bot")]
struct Cli {
    /// Path to config file (optional)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => tunegrab::config::Config::load_from_path(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => tunegrab::config::Config::load()
            .with_context(|| "failed to load configuration from environment")?,
    };

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    // Log to stdout and to a file in the data dir.
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let file_appender = tracing_appender::rolling::never(&data_dir, "tunegrab.log");
    let (file_writer, _log_guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .init();

    tracing::info!("Starting Tunegrab...");
    tracing::info!(data_dir = %data_dir.display(), "Configuration loaded");

    let http = reqwest::Client::builder()
        .user_agent("Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko)")
        .build()
        .with_context(|| "failed to build HTTP client")?;

    // Metadata service session, authenticated when credentials verify.
    let session = Arc::new(
        tunegrab::music::SessionHandle::connect(
            http.clone(),
            config.music.auth_headers_file.clone(),
        )
        .await,
    );

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(
            SqliteConnectOptions::new()
                .filename(config.sqlite_path())
                .create_if_missing(true),
        )
        .await
        .with_context(|| "failed to open the history database")?;
    let history =
        tunegrab::history::HistoryStore::new(pool, config.history.limit, config.history.enabled);
    history
        .init()
        .await
        .with_context(|| "failed to prepare the history store")?;

    tracing::info!("History store ready");

    let token = config
        .telegram
        .bot_token
        .clone()
        .unwrap_or_default();
    let bot = teloxide::Bot::new(token);
    let chat: Arc<dyn tunegrab::chat::ChatClientDyn> =
        Arc::new(tunegrab::chat::telegram::TelegramChat::new(bot.clone()));

    let policy = config.retry_policy();
    let registry = Arc::new(tunegrab::registry::ResponseRegistry::new(
        chat.clone(),
        config.bot.response_log_cap,
        policy,
        config.bot.auto_clear,
    ));
    let pipeline = Arc::new(tunegrab::pipeline::DownloadPipeline::new(
        &config.downloader,
        config.download_dir(),
        http.clone(),
    ));
    let reporter = tunegrab::progress::ProgressReporter::new(
        chat.clone(),
        registry.clone(),
        policy,
        config.edit_throttle(),
        config.bot.progress_messages,
    );

    let deps = Arc::new(tunegrab::BotDeps {
        config: Arc::new(config),
        chat,
        session,
        registry,
        pipeline,
        history,
        reporter,
    });

    tracing::info!("Tunegrab started; polling for commands");
    tunegrab::chat::telegram::run(bot, deps).await;

    tracing::info!("Tunegrab stopped");
    Ok(())
}
