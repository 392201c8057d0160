//! Tunegrab: a single-account Telegram music bot that searches, downloads,
//! tags, and sends tracks, keeping the conversation tidy as it goes.
//!
//! External services are reached through narrow adapters (the chat platform
//! behind [`chat::ChatClient`], the metadata service behind [`music`], the
//! downloader behind [`pipeline::TrackDownloader`]); everything that talks
//! to them goes through the retry wrapper in [`retry`].

pub mod chat;
pub mod commands;
pub mod config;
pub mod error;
pub mod history;
pub mod music;
pub mod pipeline;
pub mod progress;
pub mod registry;
pub mod retry;

pub use error::{Error, Result};

use std::sync::Arc;

/// Shared dependency bundle handed to every command handler.
#[derive(Clone)]
pub struct BotDeps {
    pub config: Arc<config::Config>,
    pub chat: Arc<dyn chat::ChatClientDyn>,
    pub session: Arc<music::SessionHandle>,
    pub registry: Arc<registry::ResponseRegistry>,
    pub pipeline: Arc<pipeline::DownloadPipeline>,
    pub history: history::HistoryStore,
    pub reporter: progress::ProgressReporter,
}

impl BotDeps {
    /// Retry policy for external calls made by handlers.
    pub fn retry_policy(&self) -> retry::RetryPolicy {
        self.config.retry_policy()
    }
}
