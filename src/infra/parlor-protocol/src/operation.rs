use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{Chat, GraphQLRequest, Message, ProtocolError, Sender};

/// Kind of an operation's main definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    /// Determine the kind of the first executable definition in a document.
    ///
    /// Fragment definitions are skipped and the `{ ... }` shorthand counts as
    /// a query. Comments are ignored.
    pub fn of_document(document: &str) -> Result<Self, ProtocolError> {
        let mut depth = 0usize;
        let mut in_fragment = false;
        let mut word = String::new();

        for line in document.lines() {
            let code = line.split('#').next().unwrap_or("");
            // A trailing space flushes the last word on the line.
            for ch in code.chars().chain(std::iter::once(' ')) {
                if depth == 0 && (ch.is_ascii_alphanumeric() || ch == '_') {
                    word.push(ch);
                    continue;
                }
                if !word.is_empty() {
                    if !in_fragment {
                        match word.as_str() {
                            "query" => return Ok(Self::Query),
                            "mutation" => return Ok(Self::Mutation),
                            "subscription" => return Ok(Self::Subscription),
                            "fragment" => in_fragment = true,
                            _ => {}
                        }
                    }
                    word.clear();
                }
                match ch {
                    '{' => {
                        if depth == 0 && !in_fragment {
                            return Ok(Self::Query);
                        }
                        depth += 1;
                    }
                    '}' => {
                        depth = depth.saturating_sub(1);
                        if depth == 0 {
                            in_fragment = false;
                        }
                    }
                    _ => {}
                }
            }
        }

        Err(ProtocolError::NoOperation)
    }

    pub fn is_subscription(self) -> bool {
        self == Self::Subscription
    }
}

/// A named GraphQL operation with typed result data.
pub trait Operation: Send + Sync {
    const NAME: &'static str;
    const DOCUMENT: &'static str;
    type Data: DeserializeOwned + Send + 'static;

    fn variables(&self) -> Option<Value> {
        None
    }

    fn request(&self) -> GraphQLRequest {
        GraphQLRequest::new(Self::DOCUMENT, Self::NAME, self.variables())
    }

    fn kind() -> Result<OperationKind, ProtocolError> {
        OperationKind::of_document(Self::DOCUMENT)
    }
}

/// Decode the `data` member of a result into an operation's data type.
pub fn decode_data<O: Operation>(data: Option<Value>) -> Result<O::Data, ProtocolError> {
    let data = data.ok_or(ProtocolError::MissingField("data"))?;
    Ok(serde_json::from_value(data)?)
}

/// Chat list document: every chat, newest first, each with at most its most
/// recent message. Shared by the query and the subscription.
macro_rules! chat_list_document {
    ($head:literal) => {
        concat!(
            $head,
            " {
  chats(order_by: { created_at: desc }) {
    id
    created_at
    messages(limit: 1, order_by: { created_at: desc }) {
      id
      chat_id
      text
      sender
      created_at
    }
  }
}"
        )
    };
}

// ── Queries ──────────────────────────────────────────────────────────

/// All chats, newest first, each with its single most recent message.
#[derive(Debug, Clone, Copy, Default)]
pub struct GetChats;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatsData {
    pub chats: Vec<Chat>,
}

impl Operation for GetChats {
    const NAME: &'static str = "GetChats";
    const DOCUMENT: &'static str = chat_list_document!("query GetChats");
    type Data = ChatsData;
}

// ── Mutations ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct CreateChat;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedChat {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateChatData {
    pub insert_chats_one: Option<CreatedChat>,
}

impl Operation for CreateChat {
    const NAME: &'static str = "CreateChat";
    const DOCUMENT: &'static str = "mutation CreateChat {
  insert_chats_one(object: {}) {
    id
    created_at
  }
}";
    type Data = CreateChatData;
}

#[derive(Debug, Clone, Copy)]
pub struct DeleteChat {
    pub chat_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedChat {
    pub id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteChatData {
    /// `null` when no chat had that id.
    pub delete_chats_by_pk: Option<DeletedChat>,
}

impl Operation for DeleteChat {
    const NAME: &'static str = "DeleteChat";
    const DOCUMENT: &'static str = "mutation DeleteChat($chat_id: uuid!) {
  delete_chats_by_pk(id: $chat_id) {
    id
  }
}";
    type Data = DeleteChatData;

    fn variables(&self) -> Option<Value> {
        Some(json!({ "chat_id": self.chat_id }))
    }
}

#[derive(Debug, Clone)]
pub struct InsertMessage {
    pub chat_id: Uuid,
    pub text: String,
    pub sender: Sender,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertMessageData {
    pub insert_messages_one: Option<Message>,
}

impl Operation for InsertMessage {
    const NAME: &'static str = "InsertMessage";
    const DOCUMENT: &'static str =
        "mutation InsertMessage($chat_id: uuid!, $text: String!, $sender: String!) {
  insert_messages_one(object: { chat_id: $chat_id, text: $text, sender: $sender }) {
    id
    chat_id
    text
    sender
    created_at
  }
}";
    type Data = InsertMessageData;

    fn variables(&self) -> Option<Value> {
        Some(json!({
            "chat_id": self.chat_id,
            "text": self.text,
            "sender": self.sender,
        }))
    }
}

// ── Subscriptions ────────────────────────────────────────────────────

/// Live version of [`GetChats`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SubscribeToChats;

impl Operation for SubscribeToChats {
    const NAME: &'static str = "SubscribeToChats";
    const DOCUMENT: &'static str = chat_list_document!("subscription SubscribeToChats");
    type Data = ChatsData;
}

/// All messages of one chat, oldest first.
#[derive(Debug, Clone, Copy)]
pub struct SubscribeToMessages {
    pub chat_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagesData {
    pub messages: Vec<Message>,
}

impl Operation for SubscribeToMessages {
    const NAME: &'static str = "SubscribeToMessages";
    const DOCUMENT: &'static str = "subscription SubscribeToMessages($chatId: uuid!) {
  messages(where: { chat_id: { _eq: $chatId } }, order_by: { created_at: asc }) {
    id
    chat_id
    text
    sender
    created_at
  }
}";
    type Data = MessagesData;

    fn variables(&self) -> Option<Value> {
        Some(json!({ "chatId": self.chat_id }))
    }
}
