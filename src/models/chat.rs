// Data model - chat messages and the display-ready event stream
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::AssistantError;

/// Chat message role (compatible with OpenAI-style APIs)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "system" => ChatRole::System,
            "assistant" => ChatRole::Assistant,
            _ => ChatRole::User,
        }
    }
}

/// A persisted chat message within a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub session_id: String,
    /// Recording this conversation is scoped to, if any
    pub recording_id: Option<i64>,
    pub role: ChatRole,
    pub content: String,
    pub created_at: String,
}

impl ChatMessage {
    pub fn new(
        session_id: impl Into<String>,
        recording_id: Option<i64>,
        role: ChatRole,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            recording_id,
            role,
            content: content.into(),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn user(
        session_id: impl Into<String>,
        recording_id: Option<i64>,
        content: impl Into<String>,
    ) -> Self {
        Self::new(session_id, recording_id, ChatRole::User, content)
    }

    pub fn assistant(
        session_id: impl Into<String>,
        recording_id: Option<i64>,
        content: impl Into<String>,
    ) -> Self {
        Self::new(session_id, recording_id, ChatRole::Assistant, content)
    }
}

/// One increment of a chat answer as the caller should render it.
///
/// `Thinking` is a status signal, not display text - it is emitted at most
/// once per reasoning span while the model's hidden reasoning is being
/// filtered out of the stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChatEvent {
    Token { text: String },
    Thinking,
}

/// Single-consumer stream of chat events.
///
/// The producer side is a bounded mpsc sender; dropping this stream closes
/// the channel, which the producer observes as cooperative cancellation.
#[derive(Debug)]
pub struct ChatStream {
    rx: mpsc::Receiver<Result<ChatEvent, AssistantError>>,
}

impl ChatStream {
    pub fn channel(
        capacity: usize,
    ) -> (mpsc::Sender<Result<ChatEvent, AssistantError>>, ChatStream) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, ChatStream { rx })
    }

    /// Next event, or `None` once the answer is complete.
    pub async fn next(&mut self) -> Option<Result<ChatEvent, AssistantError>> {
        self.rx.recv().await
    }

    /// Drain the stream, concatenating token text and counting thinking
    /// signals. Returns the first error if one occurs.
    pub async fn collect(mut self) -> Result<(String, usize), AssistantError> {
        let mut text = String::new();
        let mut thinking = 0;
        while let Some(event) = self.next().await {
            match event? {
                ChatEvent::Token { text: t } => text.push_str(&t),
                ChatEvent::Thinking => thinking += 1,
            }
        }
        Ok((text, thinking))
    }
}
