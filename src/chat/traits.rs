//! Chat client trait and dynamic dispatch companion.

use super::{ConversationId, MessageId, OutgoingAudio};
use crate::error::ChatError;
use std::future::Future;
use std::pin::Pin;

pub type ChatResult<T> = Result<T, ChatError>;

/// Static trait for chat platform clients.
/// Use this for type-safe implementations.
pub trait ChatClient: Send + Sync + 'static {
    /// Send a plain text message, returning the platform message id.
    fn send_text(
        &self,
        conversation: ConversationId,
        text: &str,
    ) -> impl Future<Output = ChatResult<MessageId>> + Send;

    /// Replace the text of a previously sent message.
    fn edit_text(
        &self,
        conversation: ConversationId,
        message: MessageId,
        text: &str,
    ) -> impl Future<Output = ChatResult<()>> + Send;

    /// Delete a batch of messages. Platforms bound the batch size; callers
    /// chunk accordingly.
    fn delete_messages(
        &self,
        conversation: ConversationId,
        messages: &[MessageId],
    ) -> impl Future<Output = ChatResult<()>> + Send;

    /// Upload an audio file with its presentation metadata.
    fn send_audio(
        &self,
        conversation: ConversationId,
        audio: &OutgoingAudio,
    ) -> impl Future<Output = ChatResult<MessageId>> + Send;
}

/// Dynamic trait for runtime polymorphism.
/// Use this when you need `Arc<dyn ChatClientDyn>`.
pub trait ChatClientDyn: Send + Sync + 'static {
    fn send_text<'a>(
        &'a self,
        conversation: ConversationId,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = ChatResult<MessageId>> + Send + 'a>>;

    fn edit_text<'a>(
        &'a self,
        conversation: ConversationId,
        message: MessageId,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = ChatResult<()>> + Send + 'a>>;

    fn delete_messages<'a>(
        &'a self,
        conversation: ConversationId,
        messages: &'a [MessageId],
    ) -> Pin<Box<dyn Future<Output = ChatResult<()>> + Send + 'a>>;

    fn send_audio<'a>(
        &'a self,
        conversation: ConversationId,
        audio: &'a OutgoingAudio,
    ) -> Pin<Box<dyn Future<Output = ChatResult<MessageId>> + Send + 'a>>;
}

/// Blanket implementation: any type implementing ChatClient automatically
/// implements ChatClientDyn.
impl<T: ChatClient> ChatClientDyn for T {
    fn send_text<'a>(
        &'a self,
        conversation: ConversationId,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = ChatResult<MessageId>> + Send + 'a>> {
        Box::pin(ChatClient::send_text(self, conversation, text))
    }

    fn edit_text<'a>(
        &'a self,
        conversation: ConversationId,
        message: MessageId,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = ChatResult<()>> + Send + 'a>> {
        Box::pin(ChatClient::edit_text(self, conversation, message, text))
    }

    fn delete_messages<'a>(
        &'a self,
        conversation: ConversationId,
        messages: &'a [MessageId],
    ) -> Pin<Box<dyn Future<Output = ChatResult<()>> + Send + 'a>> {
        Box::pin(ChatClient::delete_messages(self, conversation, messages))
    }

    fn send_audio<'a>(
        &'a self,
        conversation: ConversationId,
        audio: &'a OutgoingAudio,
    ) -> Pin<Box<dyn Future<Output = ChatResult<MessageId>> + Send + 'a>> {
        Box::pin(ChatClient::send_audio(self, conversation, audio))
    }
}
