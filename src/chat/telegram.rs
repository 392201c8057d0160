//! Telegram chat adapter over the Bot API.
//!
//! Maps teloxide request errors onto the crate's [`ChatError`] taxonomy so
//! the retry wrapper can classify them: `RetryAfter` becomes the
//! distinguished rate-limit kind, transport errors become transient, and
//! gone-message responses become fatal.

use super::traits::{ChatClient, ChatResult};
use super::{ConversationId, MessageId, OutgoingAudio};
use crate::error::ChatError;
use std::sync::Arc;
use teloxide::RequestError;
use teloxide::prelude::*;
use teloxide::types::{ChatId, InputFile, MessageId as TgMessageId};

/// Telegram adapter state.
#[derive(Clone)]
pub struct TelegramChat {
    bot: Bot,
}

impl TelegramChat {
    /// Create a new Telegram adapter around an existing bot handle.
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

/// Telegram API error strings that mean a message is permanently
/// untouchable (already deleted, too old, or never ours).
const GONE_MARKERS: &[&str] = &[
    "message to edit not found",
    "message to delete not found",
    "message can't be deleted",
    "message identifier is not specified",
    "message_id_invalid",
];

fn map_error(error: RequestError) -> ChatError {
    match error {
        RequestError::RetryAfter(seconds) => ChatError::RateLimited {
            retry_after: seconds.duration(),
        },
        RequestError::Network(inner) => ChatError::Network(inner.to_string()),
        RequestError::Io(inner) => ChatError::Network(inner.to_string()),
        other => {
            let detail = other.to_string();
            let lowered = detail.to_lowercase();
            if GONE_MARKERS.iter().any(|marker| lowered.contains(marker)) {
                ChatError::MessageGone(detail)
            } else {
                ChatError::Api(detail)
            }
        }
    }
}

impl ChatClient for TelegramChat {
    async fn send_text(&self, conversation: ConversationId, text: &str) -> ChatResult<MessageId> {
        let sent = self
            .bot
            .send_message(ChatId(conversation.0), text)
            .await
            .map_err(map_error)?;
        Ok(MessageId(sent.id.0))
    }

    async fn edit_text(
        &self,
        conversation: ConversationId,
        message: MessageId,
        text: &str,
    ) -> ChatResult<()> {
        match self
            .bot
            .edit_message_text(ChatId(conversation.0), TgMessageId(message.0), text)
            .await
        {
            Ok(_) => Ok(()),
            // Editing to identical text is not an error worth surfacing.
            Err(error) if error.to_string().contains("message is not modified") => Ok(()),
            Err(error) => Err(map_error(error)),
        }
    }

    async fn delete_messages(
        &self,
        conversation: ConversationId,
        messages: &[MessageId],
    ) -> ChatResult<()> {
        let ids: Vec<TgMessageId> = messages.iter().map(|id| TgMessageId(id.0)).collect();
        self.bot
            .delete_messages(ChatId(conversation.0), ids)
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn send_audio(
        &self,
        conversation: ConversationId,
        audio: &OutgoingAudio,
    ) -> ChatResult<MessageId> {
        let mut request = self
            .bot
            .send_audio(ChatId(conversation.0), InputFile::file(audio.path.clone()))
            .title(audio.title.clone())
            .performer(audio.performer.clone());
        if let Some(duration) = audio.duration_secs {
            request = request.duration(duration);
        }
        if let Some(cover) = &audio.cover {
            request = request.thumbnail(InputFile::file(cover.clone()));
        }
        if let Some(caption) = &audio.caption {
            request = request.caption(caption.clone());
        }
        let sent = request.await.map_err(map_error)?;
        Ok(MessageId(sent.id.0))
    }
}

/// Long-poll the Bot API and route text messages into the command
/// dispatcher. Runs until the process is shut down.
pub async fn run(bot: Bot, deps: Arc<crate::BotDeps>) {
    let handler =
        Update::filter_message().endpoint(|message: Message, deps: Arc<crate::BotDeps>| async move {
            let Some(text) = message.text() else {
                return respond(());
            };
            let Some(sender) = message.from.as_ref() else {
                return respond(());
            };
            let conversation = ConversationId(message.chat.id.0);
            let invoking = MessageId(message.id.0);
            let text = text.to_owned();
            let sender_id = sender.id.0;
            crate::commands::handle_message(deps, conversation, invoking, sender_id, &text).await;
            respond(())
        });

    tracing::info!("starting Telegram long polling");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![deps])
        // Non-message updates are uninteresting to a command bot.
        .default_handler(|_| async {})
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}
