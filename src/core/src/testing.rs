//! In-memory remote store for unit tests.

use std::sync::Mutex;

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use futures::StreamExt;
use parlor_protocol::{Chat, Message, Sender};
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::SyncError;
use crate::remote::{RemoteFuture, RemoteStore, SnapshotStream};

type ChatFeedTx = mpsc::UnboundedSender<Result<Vec<Chat>, SyncError>>;
type MessageFeedTx = mpsc::UnboundedSender<Result<Vec<Message>, SyncError>>;

#[derive(Default)]
struct State {
    chats: Vec<Chat>,
    ticks: i64,
    cached: Option<Vec<Chat>>,
    chat_feeds: Vec<ChatFeedTx>,
    message_feeds: Vec<(Uuid, MessageFeedTx)>,
    fail_sender: Option<Sender>,
    fail_once: Option<Sender>,
    fail_fetch: bool,
    fail_create: bool,
    fail_subscribe: bool,
    stored: Vec<(Instant, Message)>,
    fetches: usize,
    silent: bool,
}

/// Store with Hasura-like behavior: every change is pushed to live feeds as
/// a full snapshot, and a new feed gets the current snapshot right away.
#[derive(Default)]
pub(crate) struct MemoryRemote {
    state: Mutex<State>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn fail_inserts_from(&self, sender: Option<Sender>) {
        self.lock().fail_sender = sender;
    }

    /// Fail only the next insert from `sender`.
    pub fn fail_next_insert_from(&self, sender: Sender) {
        self.lock().fail_once = Some(sender);
    }

    pub fn fail_fetch(&self, fail: bool) {
        self.lock().fail_fetch = fail;
    }

    pub fn fail_create(&self, fail: bool) {
        self.lock().fail_create = fail;
    }

    pub fn fail_subscribe(&self, fail: bool) {
        self.lock().fail_subscribe = fail;
    }

    /// Stop pushing snapshots on change (mutations still apply).
    pub fn silence_feeds(&self, silent: bool) {
        self.lock().silent = silent;
    }

    pub fn set_cached(&self, chats: Vec<Chat>) {
        self.lock().cached = Some(chats);
    }

    /// Every stored message with the (tokio) instant it was stored.
    pub fn stored(&self) -> Vec<(Instant, Message)> {
        self.lock().stored.clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.lock().fetches
    }

    pub fn open_message_feeds(&self, chat_id: Uuid) -> usize {
        let mut state = self.lock();
        state.message_feeds.retain(|(_, tx)| !tx.is_closed());
        state
            .message_feeds
            .iter()
            .filter(|(id, _)| *id == chat_id)
            .count()
    }

    /// Push an arbitrary chat list snapshot to every live chat feed.
    pub fn push_chats(&self, chats: Vec<Chat>) {
        let mut state = self.lock();
        state
            .chat_feeds
            .retain(|tx| tx.send(Ok(chats.clone())).is_ok());
    }

    pub fn push_chat_error(&self, message: &str) {
        let mut state = self.lock();
        state
            .chat_feeds
            .retain(|tx| tx.send(Err(SyncError::rejected(message))).is_ok());
    }

    pub fn push_message_error(&self, chat_id: Uuid, message: &str) {
        let mut state = self.lock();
        state.message_feeds.retain(|(id, tx)| {
            *id != chat_id || tx.send(Err(SyncError::rejected(message))).is_ok()
        });
    }

    /// Seed a chat directly, bypassing the mutation path.
    pub fn seed_chat(&self, texts: &[(&str, Sender)]) -> Uuid {
        let mut state = self.lock();
        let id = Uuid::new_v4();
        let created_at = state.tick();
        let mut chat = Chat {
            id,
            created_at,
            messages: Vec::new(),
        };
        for (text, sender) in texts {
            let created_at = state.tick();
            chat.messages.push(Message {
                id: Uuid::new_v4(),
                chat_id: id,
                text: text.to_string(),
                sender: *sender,
                created_at,
            });
        }
        state.chats.push(chat);
        state.notify();
        id
    }
}

impl State {
    fn tick(&mut self) -> DateTime<Utc> {
        self.ticks += 1;
        epoch() + ChronoDuration::seconds(self.ticks)
    }

    fn chat_list(&self) -> Vec<Chat> {
        let mut chats: Vec<Chat> = self
            .chats
            .iter()
            .map(|chat| Chat {
                id: chat.id,
                created_at: chat.created_at,
                messages: chat.messages.last().cloned().into_iter().collect(),
            })
            .collect();
        chats.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        chats
    }

    fn messages_of(&self, chat_id: Uuid) -> Vec<Message> {
        self.chats
            .iter()
            .find(|c| c.id == chat_id)
            .map(|c| c.messages.clone())
            .unwrap_or_default()
    }

    fn notify(&mut self) {
        if self.silent {
            return;
        }
        let list = self.chat_list();
        self.chat_feeds.retain(|tx| tx.send(Ok(list.clone())).is_ok());

        let snapshots: Vec<Vec<Message>> = self
            .message_feeds
            .iter()
            .map(|(id, _)| self.messages_of(*id))
            .collect();
        let mut snapshots = snapshots.into_iter();
        self.message_feeds.retain(|(_, tx)| {
            let snapshot = snapshots.next().unwrap_or_default();
            tx.send(Ok(snapshot)).is_ok()
        });
    }
}

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn into_stream<T: Send + 'static>(
    rx: mpsc::UnboundedReceiver<Result<T, SyncError>>,
) -> SnapshotStream<T> {
    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
    .boxed()
}

impl RemoteStore for MemoryRemote {
    fn cached_chats(&self) -> Option<Vec<Chat>> {
        self.lock().cached.clone()
    }

    fn fetch_chats(&self) -> RemoteFuture<'_, Vec<Chat>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            let mut state = self.lock();
            state.fetches += 1;
            if state.fail_fetch {
                return Err(SyncError::Transport("connection refused".into()));
            }
            Ok(state.chat_list())
        })
    }

    fn create_chat(&self) -> RemoteFuture<'_, Chat> {
        Box::pin(async move {
            let mut state = self.lock();
            if state.fail_create {
                return Err(SyncError::rejected("permission denied"));
            }
            let chat = Chat {
                id: Uuid::new_v4(),
                created_at: state.tick(),
                messages: Vec::new(),
            };
            state.chats.push(chat.clone());
            state.notify();
            Ok(chat)
        })
    }

    fn delete_chat(&self, chat_id: Uuid) -> RemoteFuture<'_, Option<Uuid>> {
        Box::pin(async move {
            let mut state = self.lock();
            let before = state.chats.len();
            state.chats.retain(|c| c.id != chat_id);
            let found = state.chats.len() != before;
            if found {
                state.notify();
            }
            Ok(found.then_some(chat_id))
        })
    }

    fn insert_message(
        &self,
        chat_id: Uuid,
        text: String,
        sender: Sender,
    ) -> RemoteFuture<'_, Message> {
        Box::pin(async move {
            let mut state = self.lock();
            if state.fail_once == Some(sender) {
                state.fail_once = None;
                return Err(SyncError::Transport("connection reset".into()));
            }
            if state.fail_sender == Some(sender) {
                return Err(SyncError::Transport("connection reset".into()));
            }
            if !state.chats.iter().any(|c| c.id == chat_id) {
                return Err(SyncError::rejected("foreign key violation"));
            }
            let message = Message {
                id: Uuid::new_v4(),
                chat_id,
                text,
                sender,
                created_at: state.tick(),
            };
            if let Some(chat) = state.chats.iter_mut().find(|c| c.id == chat_id) {
                chat.messages.push(message.clone());
            }
            state.stored.push((Instant::now(), message.clone()));
            state.notify();
            Ok(message)
        })
    }

    fn subscribe_chats(&self) -> Result<SnapshotStream<Vec<Chat>>, SyncError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        if state.fail_subscribe {
            return Err(SyncError::Transport("socket unavailable".into()));
        }
        let _ = tx.send(Ok(state.chat_list()));
        state.chat_feeds.push(tx);
        Ok(into_stream(rx))
    }

    fn subscribe_messages(&self, chat_id: Uuid) -> Result<SnapshotStream<Vec<Message>>, SyncError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        if state.fail_subscribe {
            return Err(SyncError::Transport("socket unavailable".into()));
        }
        let _ = tx.send(Ok(state.messages_of(chat_id)));
        state.message_feeds.push((chat_id, tx));
        Ok(into_stream(rx))
    }
}
