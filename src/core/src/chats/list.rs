use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use parlor_protocol::{Chat, Message, Sender};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::SyncError;
use crate::remote::{RemoteStore, SnapshotStream};

/// Shown for a chat without messages.
pub const EMPTY_PREVIEW: &str = "New chat";

/// Preview of a chat's latest message: at most `max_chars` characters, with
/// `...` appended when the text was cut.
pub fn preview_text(message: Option<&Message>, max_chars: usize) -> String {
    let Some(message) = message else {
        return EMPTY_PREVIEW.to_string();
    };
    if message.text.is_empty() {
        return EMPTY_PREVIEW.to_string();
    }
    match message.text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &message.text[..cut]),
        None => message.text.clone(),
    }
}

/// One row of the chat list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSummary {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub preview: String,
    pub last_sender: Option<Sender>,
    pub last_message_at: Option<DateTime<Utc>>,
    /// Created locally and not yet seen in a delivered snapshot.
    pub provisional: bool,
}

impl ChatSummary {
    /// `You` or `Bot`, when the chat has a message.
    pub fn sender_label(&self) -> Option<&'static str> {
        self.last_sender.map(Sender::label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListStatus {
    Loading,
    /// Nothing to show and the last load failed.
    Error(String),
    Empty,
    Ready,
}

/// Published view of the chat list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatListState {
    pub chats: Vec<ChatSummary>,
    pub selected: Option<Uuid>,
    pub status: ListStatus,
    /// Most recent failure, kept even while older data is shown.
    pub last_error: Option<String>,
}

/// Local projection of the chat list.
///
/// Every snapshot replaces the list. The only local additions are chats
/// created here and not yet delivered by the remote store; such an entry
/// survives until it appears in a snapshot, or until two distinct snapshots
/// in a row lack it.
#[derive(Debug)]
pub struct ChatList {
    chats: Vec<Chat>,
    provisional: HashMap<Uuid, u8>,
    selected: Option<Uuid>,
    loaded: bool,
    loading: bool,
    last_error: Option<String>,
    last_snapshot: Option<Vec<Chat>>,
    preview_chars: usize,
}

const PROVISIONAL_MISSES: u8 = 2;

impl ChatList {
    pub fn new(preview_chars: usize) -> Self {
        Self {
            chats: Vec::new(),
            provisional: HashMap::new(),
            selected: None,
            loaded: false,
            loading: false,
            last_error: None,
            last_snapshot: None,
            preview_chars,
        }
    }

    pub fn chats(&self) -> &[Chat] {
        &self.chats
    }

    pub fn selected(&self) -> Option<Uuid> {
        self.selected
    }

    pub fn begin_loading(&mut self) -> bool {
        let changed = !self.loading || self.last_error.is_some();
        self.loading = true;
        self.last_error = None;
        changed
    }

    /// Show a locally cached result until the first network result arrives.
    pub fn apply_cached(&mut self, chats: Vec<Chat>) -> bool {
        if self.loaded {
            return false;
        }
        self.chats = chats;
        true
    }

    /// Replace the list with a delivered snapshot. Redelivery of the
    /// previous snapshot changes nothing.
    pub fn apply_snapshot(&mut self, snapshot: Vec<Chat>) -> bool {
        let flags_changed = !self.loaded || self.loading || self.last_error.is_some();
        self.loaded = true;
        self.loading = false;
        self.last_error = None;

        if self.last_snapshot.as_ref() == Some(&snapshot) {
            return flags_changed;
        }

        let mut kept = Vec::new();
        for chat in &self.chats {
            let Some(misses) = self.provisional.get_mut(&chat.id) else {
                continue;
            };
            if snapshot.iter().any(|c| c.id == chat.id) {
                continue;
            }
            *misses += 1;
            if *misses < PROVISIONAL_MISSES {
                kept.push(chat.clone());
            }
        }
        self.provisional.retain(|id, misses| {
            *misses < PROVISIONAL_MISSES && kept.iter().any(|c| c.id == *id)
        });

        kept.extend(snapshot.iter().cloned());
        self.chats = kept;
        self.last_snapshot = Some(snapshot);
        true
    }

    /// Prepend a chat the remote store just created and select it.
    pub fn insert_provisional(&mut self, chat: Chat) -> bool {
        let id = chat.id;
        if !self.chats.iter().any(|c| c.id == id) {
            self.chats.insert(0, chat);
            self.provisional.insert(id, 0);
        }
        self.selected = Some(id);
        true
    }

    pub fn forget_provisional(&mut self, id: Uuid) -> bool {
        if self.provisional.remove(&id).is_none() {
            return false;
        }
        self.chats.retain(|c| c.id != id);
        true
    }

    pub fn record_error(&mut self, message: String) -> bool {
        self.loading = false;
        self.last_error = Some(message);
        true
    }

    pub fn select(&mut self, id: Option<Uuid>) -> bool {
        if self.selected == id {
            return false;
        }
        self.selected = id;
        true
    }

    pub fn clear_selection_if(&mut self, id: Uuid) -> bool {
        if self.selected == Some(id) {
            self.selected = None;
            return true;
        }
        false
    }

    pub fn status(&self) -> ListStatus {
        if !self.chats.is_empty() {
            ListStatus::Ready
        } else if self.loaded {
            ListStatus::Empty
        } else if self.loading {
            ListStatus::Loading
        } else if let Some(err) = &self.last_error {
            ListStatus::Error(err.clone())
        } else {
            ListStatus::Loading
        }
    }

    pub fn state(&self) -> ChatListState {
        let chats = self
            .chats
            .iter()
            .map(|chat| {
                let latest = chat.latest_message();
                ChatSummary {
                    id: chat.id,
                    created_at: chat.created_at,
                    preview: preview_text(latest, self.preview_chars),
                    last_sender: latest.map(|m| m.sender),
                    last_message_at: latest.map(|m| m.created_at),
                    provisional: self.provisional.contains_key(&chat.id),
                }
            })
            .collect();
        ChatListState {
            chats,
            selected: self.selected,
            status: self.status(),
            last_error: self.last_error.clone(),
        }
    }
}

struct Shared {
    list: Mutex<ChatList>,
    tx: watch::Sender<ChatListState>,
}

impl Shared {
    fn update(&self, f: impl FnOnce(&mut ChatList) -> bool) {
        let mut list = match self.list.lock() {
            Ok(l) => l,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !f(&mut list) {
            return;
        }
        let next = list.state();
        self.tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

/// Keeps a [`ChatList`] current and publishes it on a `watch` channel.
///
/// Mounting publishes any cached list at once, then runs one initial fetch
/// alongside the live chat feed. Dropping the store stops the feed.
pub struct ChatListStore {
    remote: Arc<dyn RemoteStore>,
    shared: Arc<Shared>,
    driver: JoinHandle<()>,
}

impl ChatListStore {
    pub fn mount(remote: Arc<dyn RemoteStore>, preview_chars: usize) -> Self {
        let mut list = ChatList::new(preview_chars);
        list.begin_loading();
        if let Some(cached) = remote.cached_chats() {
            tracing::debug!(chats = cached.len(), "showing cached chat list");
            list.apply_cached(cached);
        }
        let (tx, _rx) = watch::channel(list.state());
        let shared = Arc::new(Shared {
            list: Mutex::new(list),
            tx,
        });
        let driver = tokio::spawn(drive(remote.clone(), shared.clone()));
        Self {
            remote,
            shared,
            driver,
        }
    }

    pub fn state(&self) -> ChatListState {
        self.shared.tx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<ChatListState> {
        self.shared.tx.subscribe()
    }

    pub fn selected(&self) -> Option<Uuid> {
        self.shared.tx.borrow().selected
    }

    pub fn select(&self, id: Option<Uuid>) {
        self.shared.update(|list| list.select(id));
    }

    /// Create a chat, show it at the top of the list and select it without
    /// waiting for the live feed.
    pub async fn create_chat(&self) -> Result<Uuid, SyncError> {
        let chat = self.remote.create_chat().await.map_err(|e| {
            tracing::warn!(error = %e, "create chat failed");
            e
        })?;
        let id = chat.id;
        self.shared.update(|list| list.insert_provisional(chat));
        Ok(id)
    }

    /// Delete a chat, then refetch the whole list. Deleting a chat that no
    /// longer exists is not an error. A failed refetch is recorded in the
    /// published state.
    pub async fn delete_chat(&self, id: Uuid) -> Result<(), SyncError> {
        let deleted = self.remote.delete_chat(id).await?;
        if deleted.is_none() {
            tracing::debug!(chat_id = %id, "chat was already gone");
        }
        self.shared.update(|list| {
            let forgot = list.forget_provisional(id);
            list.clear_selection_if(id) || forgot
        });
        if let Err(e) = self.refetch().await {
            tracing::warn!(error = %e, "refetch after delete failed");
        }
        Ok(())
    }

    /// Load the list again from the network.
    pub async fn refetch(&self) -> Result<(), SyncError> {
        self.shared.update(ChatList::begin_loading);
        match self.remote.fetch_chats().await {
            Ok(chats) => {
                self.shared.update(|list| list.apply_snapshot(chats));
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                self.shared.update(|list| list.record_error(message));
                Err(e)
            }
        }
    }
}

impl Drop for ChatListStore {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

async fn drive(remote: Arc<dyn RemoteStore>, shared: Arc<Shared>) {
    let mut feed = match remote.subscribe_chats() {
        Ok(feed) => Some(feed),
        Err(e) => {
            tracing::warn!(error = %e, "chat feed unavailable");
            shared.update(|list| list.record_error(e.to_string()));
            None
        }
    };
    let mut fetch = remote.fetch_chats();
    let mut fetch_done = false;
    let mut delivered = false;

    loop {
        tokio::select! {
            result = &mut fetch, if !fetch_done => {
                fetch_done = true;
                match result {
                    // A live delivery is at least as fresh as the fetch.
                    Ok(_) if delivered => tracing::debug!("initial fetch superseded by feed"),
                    Ok(chats) => shared.update(|list| list.apply_snapshot(chats)),
                    Err(e) => {
                        tracing::warn!(error = %e, "initial chat fetch failed");
                        shared.update(|list| list.record_error(e.to_string()));
                    }
                }
            }
            item = next_snapshot(&mut feed), if feed.is_some() => match item {
                Some(Ok(chats)) => {
                    delivered = true;
                    shared.update(|list| list.apply_snapshot(chats));
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "chat feed delivery failed");
                    shared.update(|list| list.record_error(e.to_string()));
                }
                None => {
                    tracing::debug!("chat feed ended");
                    feed = None;
                }
            },
            else => break,
        }
    }
}

async fn next_snapshot(
    feed: &mut Option<SnapshotStream<Vec<Chat>>>,
) -> Option<Result<Vec<Chat>, SyncError>> {
    match feed {
        Some(stream) => stream.next().await,
        None => None,
    }
}
