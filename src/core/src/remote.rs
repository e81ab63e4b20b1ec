use std::future::Future;
use std::pin::Pin;

use futures::stream::BoxStream;
use futures::StreamExt;
use parlor_protocol::{
    Chat, CreateChat, DeleteChat, GetChats, InsertMessage, Message, Sender, SubscribeToChats,
    SubscribeToMessages,
};
use uuid::Uuid;

use crate::error::SyncError;
use crate::transport::TransportSession;

pub type RemoteFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SyncError>> + Send + 'a>>;

/// Live sequence of full snapshots.
pub type SnapshotStream<T> = BoxStream<'static, Result<T, SyncError>>;

/// The remote store operations the stores and orchestrator depend on.
pub trait RemoteStore: Send + Sync + 'static {
    /// Last chat list result known locally, without a network call.
    fn cached_chats(&self) -> Option<Vec<Chat>>;

    fn fetch_chats(&self) -> RemoteFuture<'_, Vec<Chat>>;

    fn create_chat(&self) -> RemoteFuture<'_, Chat>;

    /// Returns the deleted id, or `None` when no such chat existed.
    fn delete_chat(&self, chat_id: Uuid) -> RemoteFuture<'_, Option<Uuid>>;

    fn insert_message(
        &self,
        chat_id: Uuid,
        text: String,
        sender: Sender,
    ) -> RemoteFuture<'_, Message>;

    fn subscribe_chats(&self) -> Result<SnapshotStream<Vec<Chat>>, SyncError>;

    fn subscribe_messages(&self, chat_id: Uuid) -> Result<SnapshotStream<Vec<Message>>, SyncError>;
}

impl RemoteStore for TransportSession {
    fn cached_chats(&self) -> Option<Vec<Chat>> {
        self.cache().read(&GetChats).map(|data| data.chats)
    }

    fn fetch_chats(&self) -> RemoteFuture<'_, Vec<Chat>> {
        Box::pin(async move { Ok(self.execute(&GetChats).await?.chats) })
    }

    fn create_chat(&self) -> RemoteFuture<'_, Chat> {
        Box::pin(async move {
            let created = self
                .execute(&CreateChat)
                .await?
                .insert_chats_one
                .ok_or_else(|| SyncError::rejected("chat was not created"))?;
            tracing::info!(chat_id = %created.id, "chat created");
            Ok(Chat {
                id: created.id,
                created_at: created.created_at,
                messages: Vec::new(),
            })
        })
    }

    fn delete_chat(&self, chat_id: Uuid) -> RemoteFuture<'_, Option<Uuid>> {
        Box::pin(async move {
            let deleted = self
                .execute(&DeleteChat { chat_id })
                .await?
                .delete_chats_by_pk
                .map(|c| c.id);
            tracing::info!(%chat_id, found = deleted.is_some(), "chat deleted");
            Ok(deleted)
        })
    }

    fn insert_message(
        &self,
        chat_id: Uuid,
        text: String,
        sender: Sender,
    ) -> RemoteFuture<'_, Message> {
        Box::pin(async move {
            let op = InsertMessage {
                chat_id,
                text,
                sender,
            };
            let message = self
                .execute(&op)
                .await?
                .insert_messages_one
                .ok_or_else(|| SyncError::rejected("message was not stored"))?;
            tracing::debug!(%chat_id, message_id = %message.id, sender = sender.as_str(), "message stored");
            Ok(message)
        })
    }

    fn subscribe_chats(&self) -> Result<SnapshotStream<Vec<Chat>>, SyncError> {
        let feed = self.subscribe(&SubscribeToChats)?;
        let session_cache = self.cache_handle();
        // Live results keep the cached query result fresh.
        Ok(feed
            .map(move |item| {
                item.map(|data| {
                    session_cache.write(&GetChats, &data);
                    data.chats
                })
            })
            .boxed())
    }

    fn subscribe_messages(&self, chat_id: Uuid) -> Result<SnapshotStream<Vec<Message>>, SyncError> {
        let feed = self.subscribe(&SubscribeToMessages { chat_id })?;
        Ok(feed.map(|item| item.map(|data| data.messages)).boxed())
    }
}
