//! Throttled progress reporting for long-running operations.
//!
//! One operation owns at most one status message. Updates inside the
//! throttle window are dropped (last-write-wins: the next allowed edit
//! carries the latest text), and the terminal `finish` always lands, even
//! when the initial send never succeeded.

use crate::chat::{ChatClientDyn, ConversationId, MessageId};
use crate::registry::ResponseRegistry;
use crate::retry::{self, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Creates the status message that represents one operation.
#[derive(Clone)]
pub struct ProgressReporter {
    chat: Arc<dyn ChatClientDyn>,
    registry: Arc<ResponseRegistry>,
    policy: RetryPolicy,
    min_interval: Duration,
    enabled: bool,
}

impl ProgressReporter {
    pub fn new(
        chat: Arc<dyn ChatClientDyn>,
        registry: Arc<ResponseRegistry>,
        policy: RetryPolicy,
        min_interval: Duration,
        enabled: bool,
    ) -> Self {
        Self {
            chat,
            registry,
            policy,
            min_interval,
            enabled,
        }
    }

    /// Send the initial status message and return the operation's handle.
    ///
    /// A failed send (or disabled progress messages) yields an invisible
    /// handle: the operation proceeds without live status, and `finish`
    /// later falls back to a fresh message.
    pub async fn begin(&self, conversation: ConversationId, initial_text: &str) -> ProgressHandle {
        let mut handle = ProgressHandle {
            chat: self.chat.clone(),
            registry: self.registry.clone(),
            policy: self.policy,
            min_interval: self.min_interval,
            conversation,
            message: None,
            last_text: String::new(),
            last_edit: Instant::now(),
            terminal: false,
        };
        if !self.enabled {
            return handle;
        }
        match retry::call(&self.policy, None, || {
            self.chat.send_text(conversation, initial_text)
        })
        .await
        {
            Ok(message) => {
                self.registry.record(conversation, message).await;
                handle.message = Some(message);
                handle.last_text = initial_text.to_string();
                handle.last_edit = Instant::now();
            }
            Err(error) => {
                tracing::warn!(%conversation, %error, "initial progress send failed; continuing without visible progress");
            }
        }
        handle
    }
}

/// The single mutable status message of one operation.
pub struct ProgressHandle {
    chat: Arc<dyn ChatClientDyn>,
    registry: Arc<ResponseRegistry>,
    policy: RetryPolicy,
    min_interval: Duration,
    conversation: ConversationId,
    message: Option<MessageId>,
    last_text: String,
    last_edit: Instant,
    terminal: bool,
}

impl ProgressHandle {
    /// Throttled edit. Dropped silently inside the minimum inter-edit
    /// interval, on unchanged text, on invisible handles, and after
    /// `finish`.
    pub async fn update(&mut self, text: &str) {
        if self.terminal {
            return;
        }
        let Some(message) = self.message else {
            return;
        };
        if text == self.last_text {
            return;
        }
        if self.last_edit.elapsed() < self.min_interval {
            tracing::trace!(conversation = %self.conversation, "progress update dropped inside throttle window");
            return;
        }
        // A transient edit failure is just another dropped update; the next
        // one supersedes it.
        match self.chat.edit_text(self.conversation, message, text).await {
            Ok(()) => {
                self.last_text = text.to_string();
                self.last_edit = Instant::now();
            }
            Err(error) => {
                tracing::debug!(conversation = %self.conversation, %error, "progress edit dropped");
            }
        }
    }

    /// Terminal edit: bypasses the throttle and always applies. Further
    /// `update` calls become no-ops.
    pub async fn finish(&mut self, final_text: &str) {
        if self.terminal {
            return;
        }
        self.terminal = true;
        match self.message {
            Some(message) => {
                let outcome = retry::call(&self.policy, None, || {
                    self.chat.edit_text(self.conversation, message, final_text)
                })
                .await;
                if let Err(error) = outcome {
                    tracing::warn!(conversation = %self.conversation, %error, "final progress edit failed; sending the outcome as a new message");
                    self.send_terminal(final_text).await;
                }
            }
            None => self.send_terminal(final_text).await,
        }
    }

    async fn send_terminal(&self, text: &str) {
        match retry::call(&self.policy, None, || {
            self.chat.send_text(self.conversation, text)
        })
        .await
        {
            Ok(message) => self.registry.record(self.conversation, message).await,
            Err(error) => {
                tracing::error!(conversation = %self.conversation, %error, "operation outcome could not be delivered");
            }
        }
    }

    pub fn is_visible(&self) -> bool {
        self.message.is_some()
    }
}

/// Ordered `task: status` lines rendered into the status message text.
#[derive(Debug, Clone, Default)]
pub struct ProgressBoard {
    entries: Vec<(String, String)>,
}

impl ProgressBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a task's status, keeping first-set ordering.
    pub fn set(&mut self, task: impl Into<String>, status: impl Into<String>) {
        let task = task.into();
        let status = status.into();
        match self.entries.iter_mut().find(|(name, _)| *name == task) {
            Some(entry) => entry.1 = status,
            None => self.entries.push((task, status)),
        }
    }

    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|(task, status)| format!("{task}: {status}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::testing::{ChatEvent, RecordingChat};
    use crate::error::ChatError;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    fn reporter(chat: Arc<RecordingChat>, min_interval: Duration) -> ProgressReporter {
        let registry = Arc::new(ResponseRegistry::new(
            chat.clone(),
            200,
            fast_policy(),
            true,
        ));
        ProgressReporter::new(chat, registry, fast_policy(), min_interval, true)
    }

    #[tokio::test]
    async fn updates_inside_the_window_are_dropped_but_finish_lands() {
        let chat = Arc::new(RecordingChat::default());
        let reporter = reporter(chat.clone(), Duration::from_secs(3600));
        let conversation = ConversationId(1);

        let mut handle = reporter.begin(conversation, "working…").await;
        handle.update("step 1").await;
        handle.update("step 2").await;
        handle.finish("done").await;

        let texts: Vec<String> = chat
            .events()
            .into_iter()
            .map(|event| match event {
                ChatEvent::Sent { text, .. } => format!("sent:{text}"),
                ChatEvent::Edited { text, .. } => format!("edited:{text}"),
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(texts, vec!["sent:working…", "edited:done"]);
    }

    #[tokio::test]
    async fn updates_outside_the_window_apply() {
        let chat = Arc::new(RecordingChat::default());
        let reporter = reporter(chat.clone(), Duration::ZERO);
        let mut handle = reporter.begin(ConversationId(1), "start").await;

        handle.update("middle").await;
        handle.finish("end").await;

        let edits: Vec<String> = chat
            .events()
            .into_iter()
            .filter_map(|event| match event {
                ChatEvent::Edited { text, .. } => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(edits, vec!["middle", "end"]);
    }

    #[tokio::test]
    async fn update_after_finish_is_a_noop() {
        let chat = Arc::new(RecordingChat::default());
        let reporter = reporter(chat.clone(), Duration::ZERO);
        let mut handle = reporter.begin(ConversationId(1), "start").await;

        handle.finish("done").await;
        handle.update("too late").await;
        handle.finish("again").await;

        let edits: Vec<String> = chat
            .events()
            .into_iter()
            .filter_map(|event| match event {
                ChatEvent::Edited { text, .. } => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(edits, vec!["done"]);
    }

    #[tokio::test]
    async fn failed_initial_send_still_gets_a_terminal_message() {
        let chat = Arc::new(RecordingChat::default());
        // Fatal error: the wrapper gives up immediately on the first send.
        chat.fail_sends
            .lock()
            .expect("queue lock")
            .push(ChatError::Api("boom".into()));
        let reporter = reporter(chat.clone(), Duration::ZERO);

        let mut handle = reporter.begin(ConversationId(1), "start").await;
        assert!(!handle.is_visible());

        handle.update("invisible").await;
        handle.finish("outcome").await;

        let events = chat.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            ChatEvent::Sent { text, .. } if text == "outcome"
        ));
    }

    #[tokio::test]
    async fn transient_edit_failure_is_a_dropped_update() {
        let chat = Arc::new(RecordingChat::default());
        chat.fail_edits
            .lock()
            .expect("queue lock")
            .push(ChatError::Network("reset".into()));
        let reporter = reporter(chat.clone(), Duration::ZERO);
        let mut handle = reporter.begin(ConversationId(1), "start").await;

        handle.update("lost").await;
        handle.update("kept").await;
        handle.finish("done").await;

        let edits: Vec<String> = chat
            .events()
            .into_iter()
            .filter_map(|event| match event {
                ChatEvent::Edited { text, .. } => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(edits, vec!["kept", "done"]);
    }

    #[test]
    fn board_renders_in_first_set_order() {
        let mut board = ProgressBoard::new();
        board.set("Download", "⏳");
        board.set("Send", "⏸️");
        board.set("Download", "✅");
        assert_eq!(board.render(), "Download: ✅\nSend: ⏸️");
    }
}
