use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    /// The automated responder. Stored as `bot` by the remote schema.
    #[serde(rename = "bot", alias = "responder")]
    Responder,
}

impl Sender {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Responder => "bot",
        }
    }

    /// Short label shown next to a chat preview.
    pub fn label(self) -> &'static str {
        match self {
            Self::User => "You",
            Self::Responder => "Bot",
        }
    }
}

/// A persisted chat message. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub text: String,
    pub sender: Sender,
    pub created_at: DateTime<Utc>,
}

/// A chat with zero or more messages. Which messages are present depends on
/// the query: the chat list carries at most the most recent one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Chat {
    /// First message of the chat's message list (the latest one for chat
    /// list results).
    pub fn latest_message(&self) -> Option<&Message> {
        self.messages.first()
    }
}
