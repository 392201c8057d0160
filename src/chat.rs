//! Chat platform types and adapters (Telegram).

pub mod telegram;
pub mod traits;

pub use self::traits::{ChatClient, ChatClientDyn, ChatResult};

use crate::error::ChatError;
use crate::retry::{Classify, ErrorClass};
use std::path::PathBuf;

/// Conversation (chat) identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationId(pub i64);

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Platform message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(pub i32);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A finished audio file ready to send, with its presentation metadata.
#[derive(Debug, Clone)]
pub struct OutgoingAudio {
    pub path: PathBuf,
    pub title: String,
    pub performer: String,
    pub duration_secs: Option<u32>,
    /// Square cover image shown next to the audio player.
    pub cover: Option<PathBuf>,
    pub caption: Option<String>,
}

impl Classify for ChatError {
    fn classify(&self) -> ErrorClass {
        match self {
            ChatError::RateLimited { retry_after } => ErrorClass::RateLimited(Some(*retry_after)),
            ChatError::Network(_) => ErrorClass::Transient,
            // A deleted or foreign message can never be edited/removed by
            // retrying.
            ChatError::MessageGone(_) | ChatError::Api(_) => ErrorClass::Fatal,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording chat client shared by reporter and registry tests.

    use super::traits::{ChatClient, ChatResult};
    use super::{ConversationId, MessageId, OutgoingAudio};
    use crate::error::ChatError;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    pub enum ChatEvent {
        Sent {
            conversation: ConversationId,
            message: MessageId,
            text: String,
        },
        Edited {
            conversation: ConversationId,
            message: MessageId,
            text: String,
        },
        Deleted {
            conversation: ConversationId,
            messages: Vec<MessageId>,
        },
        Audio {
            conversation: ConversationId,
            message: MessageId,
            title: String,
        },
    }

    /// In-memory chat client that records every call and can be primed
    /// with failures.
    #[derive(Default)]
    pub struct RecordingChat {
        next_id: AtomicI32,
        pub events: Mutex<Vec<ChatEvent>>,
        pub fail_sends: Mutex<Vec<ChatError>>,
        pub fail_edits: Mutex<Vec<ChatError>>,
        pub fail_deletes: Mutex<Vec<ChatError>>,
    }

    impl RecordingChat {
        pub fn events(&self) -> Vec<ChatEvent> {
            self.events.lock().expect("events lock").clone()
        }

        fn take_failure(queue: &Mutex<Vec<ChatError>>) -> Option<ChatError> {
            let mut queue = queue.lock().expect("failure queue lock");
            if queue.is_empty() { None } else { Some(queue.remove(0)) }
        }
    }

    impl ChatClient for RecordingChat {
        async fn send_text(
            &self,
            conversation: ConversationId,
            text: &str,
        ) -> ChatResult<MessageId> {
            if let Some(error) = Self::take_failure(&self.fail_sends) {
                return Err(error);
            }
            let message = MessageId(self.next_id.fetch_add(1, Ordering::SeqCst));
            self.events.lock().expect("events lock").push(ChatEvent::Sent {
                conversation,
                message,
                text: text.to_string(),
            });
            Ok(message)
        }

        async fn edit_text(
            &self,
            conversation: ConversationId,
            message: MessageId,
            text: &str,
        ) -> ChatResult<()> {
            if let Some(error) = Self::take_failure(&self.fail_edits) {
                return Err(error);
            }
            self.events.lock().expect("events lock").push(ChatEvent::Edited {
                conversation,
                message,
                text: text.to_string(),
            });
            Ok(())
        }

        async fn delete_messages(
            &self,
            conversation: ConversationId,
            messages: &[MessageId],
        ) -> ChatResult<()> {
            if let Some(error) = Self::take_failure(&self.fail_deletes) {
                return Err(error);
            }
            self.events
                .lock()
                .expect("events lock")
                .push(ChatEvent::Deleted {
                    conversation,
                    messages: messages.to_vec(),
                });
            Ok(())
        }

        async fn send_audio(
            &self,
            conversation: ConversationId,
            audio: &OutgoingAudio,
        ) -> ChatResult<MessageId> {
            let message = MessageId(self.next_id.fetch_add(1, Ordering::SeqCst));
            self.events.lock().expect("events lock").push(ChatEvent::Audio {
                conversation,
                message,
                title: audio.title.clone(),
            });
            Ok(message)
        }
    }
}
