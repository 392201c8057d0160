//! Auto-clear registry: per-conversation tracking of bot-authored messages
//! and bulk deletion on demand.
//!
//! Every conversation owns an independently lockable message log, so a
//! clear in one chat never stalls recording in another, and a record that
//! races a clear in the same chat waits for the clear and lands in the
//! emptied log rather than being lost or double-deleted.

use crate::chat::{ChatClientDyn, ConversationId, MessageId};
use crate::retry::{self, RetryPolicy};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Telegram deletes at most 100 messages per call.
const DELETE_CHUNK: usize = 100;

type ConversationLog = Arc<Mutex<Vec<MessageId>>>;

pub struct ResponseRegistry {
    chat: Arc<dyn ChatClientDyn>,
    /// Conversation id → its own lockable message log.
    logs: Mutex<HashMap<ConversationId, ConversationLog>>,
    policy: RetryPolicy,
    /// Tracked messages per conversation beyond which the oldest drop off.
    cap: usize,
    /// When off, nothing is recorded and clears are no-ops.
    enabled: bool,
}

impl ResponseRegistry {
    pub fn new(
        chat: Arc<dyn ChatClientDyn>,
        cap: usize,
        policy: RetryPolicy,
        enabled: bool,
    ) -> Self {
        Self {
            chat,
            logs: Mutex::new(HashMap::new()),
            policy,
            cap,
            enabled,
        }
    }

    /// The lockable log for one conversation, created lazily.
    async fn log_for(&self, conversation: ConversationId) -> ConversationLog {
        let mut logs = self.logs.lock().await;
        logs.entry(conversation)
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
            .clone()
    }

    /// Track a bot-authored message for later clearing.
    pub async fn record(&self, conversation: ConversationId, message: MessageId) {
        if !self.enabled {
            return;
        }
        let log = self.log_for(conversation).await;
        let mut log = log.lock().await;
        if log.contains(&message) {
            return;
        }
        log.push(message);
        if log.len() > self.cap {
            let excess = log.len() - self.cap;
            log.drain(..excess);
        }
        tracing::debug!(%conversation, %message, tracked = log.len(), "recorded bot message");
    }

    /// Delete every tracked message for the conversation, then empty the
    /// log regardless of individual deletion outcomes — an id that failed
    /// to delete now (already removed by the user, too old) can never
    /// succeed later.
    pub async fn clear(&self, conversation: ConversationId) {
        let log = self.log_for(conversation).await;
        // Held across the deletes: serializes clear against record for
        // this conversation only.
        let mut log = log.lock().await;
        if log.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut *log);

        tracing::info!(%conversation, count = pending.len(), "clearing tracked bot messages");
        for chunk in pending.chunks(DELETE_CHUNK) {
            let outcome = retry::call(&self.policy, None, || {
                self.chat.delete_messages(conversation, chunk)
            })
            .await;
            if let Err(error) = outcome {
                tracing::warn!(%conversation, %error, "some tracked messages could not be deleted; dropping them anyway");
            }
        }
    }

    /// Number of tracked messages for a conversation.
    pub async fn tracked(&self, conversation: ConversationId) -> usize {
        let log = self.log_for(conversation).await;
        let log = log.lock().await;
        log.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::testing::{ChatEvent, RecordingChat};
    use crate::error::ChatError;
    use std::time::Duration;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    fn registry(chat: Arc<RecordingChat>) -> ResponseRegistry {
        ResponseRegistry::new(chat, 200, fast_policy(), true)
    }

    #[tokio::test]
    async fn clear_empties_the_log_even_when_deletes_fail() {
        let chat = Arc::new(RecordingChat::default());
        chat.fail_deletes
            .lock()
            .expect("queue lock")
            .extend([ChatError::Api("boom".into())]);
        let registry = registry(chat.clone());
        let conversation = ConversationId(1);

        for id in 0..3 {
            registry.record(conversation, MessageId(id)).await;
        }
        registry.clear(conversation).await;

        assert_eq!(registry.tracked(conversation).await, 0);
    }

    #[tokio::test]
    async fn clear_batches_in_platform_sized_chunks() {
        let chat = Arc::new(RecordingChat::default());
        let registry = registry(chat.clone());
        let conversation = ConversationId(7);

        for id in 0..150 {
            registry.record(conversation, MessageId(id)).await;
        }
        registry.clear(conversation).await;

        let chunks: Vec<usize> = chat
            .events()
            .into_iter()
            .filter_map(|event| match event {
                ChatEvent::Deleted { messages, .. } => Some(messages.len()),
                _ => None,
            })
            .collect();
        assert_eq!(chunks, vec![100, 50]);
        assert_eq!(registry.tracked(conversation).await, 0);
    }

    #[tokio::test]
    async fn record_deduplicates_and_trims_to_cap() {
        let chat = Arc::new(RecordingChat::default());
        let registry = ResponseRegistry::new(chat, 5, fast_policy(), true);
        let conversation = ConversationId(2);

        registry.record(conversation, MessageId(1)).await;
        registry.record(conversation, MessageId(1)).await;
        assert_eq!(registry.tracked(conversation).await, 1);

        for id in 2..=10 {
            registry.record(conversation, MessageId(id)).await;
        }
        assert_eq!(registry.tracked(conversation).await, 5);
    }

    #[tokio::test]
    async fn conversations_are_isolated() {
        let chat = Arc::new(RecordingChat::default());
        let registry = registry(chat);

        registry.record(ConversationId(1), MessageId(10)).await;
        registry.record(ConversationId(2), MessageId(20)).await;
        registry.clear(ConversationId(1)).await;

        assert_eq!(registry.tracked(ConversationId(1)).await, 0);
        assert_eq!(registry.tracked(ConversationId(2)).await, 1);
    }

    #[tokio::test]
    async fn disabled_registry_records_nothing() {
        let chat = Arc::new(RecordingChat::default());
        let registry = ResponseRegistry::new(chat.clone(), 200, fast_policy(), false);
        let conversation = ConversationId(3);

        registry.record(conversation, MessageId(1)).await;
        assert_eq!(registry.tracked(conversation).await, 0);

        registry.clear(conversation).await;
        assert!(chat.events().is_empty());
    }

    #[tokio::test]
    async fn record_racing_a_clear_is_not_lost() {
        let chat = Arc::new(RecordingChat::default());
        let registry = Arc::new(registry(chat));
        let conversation = ConversationId(4);
        registry.record(conversation, MessageId(1)).await;

        let clearing = registry.clone();
        let recording = registry.clone();
        tokio::join!(clearing.clear(conversation), async {
            recording.record(conversation, MessageId(2)).await;
        });

        // Whichever side won the lock, the racing record either survives in
        // the emptied log or was itself cleared — never both outcomes.
        assert!(registry.tracked(conversation).await <= 1);
    }
}
