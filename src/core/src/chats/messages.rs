use std::sync::{Arc, Mutex};

use futures::StreamExt;
use parlor_protocol::Message;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::ViewState;
use crate::error::SyncError;
use crate::remote::RemoteStore;

/// Published view of the open chat's messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageListState {
    pub chat_id: Option<Uuid>,
    pub view: ViewState<Vec<Message>>,
    pub last_error: Option<String>,
}

/// Messages of one chat, oldest first.
///
/// Each selection starts a new generation; deliveries tagged with an older
/// generation are dropped, so a late snapshot for a previous chat never
/// shows up under the current one.
#[derive(Debug, Default)]
pub struct MessageList {
    chat_id: Option<Uuid>,
    generation: u64,
    messages: Option<Vec<Message>>,
    loading: bool,
    last_error: Option<String>,
}

impl MessageList {
    pub fn chat_id(&self) -> Option<Uuid> {
        self.chat_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Switch to another chat (or none) and return the new generation.
    pub fn reset(&mut self, chat_id: Option<Uuid>) -> u64 {
        self.generation += 1;
        self.chat_id = chat_id;
        self.messages = None;
        self.loading = chat_id.is_some();
        self.last_error = None;
        self.generation
    }

    pub fn apply(&mut self, generation: u64, delivery: Result<Vec<Message>, SyncError>) -> bool {
        if generation != self.generation {
            tracing::debug!(generation, current = self.generation, "dropping stale delivery");
            return false;
        }
        match delivery {
            Ok(messages) => {
                if self.messages.as_ref() == Some(&messages) && self.last_error.is_none() {
                    return false;
                }
                self.messages = Some(messages);
                self.last_error = None;
            }
            Err(e) => self.last_error = Some(e.to_string()),
        }
        self.loading = false;
        true
    }

    pub fn view(&self) -> ViewState<Vec<Message>> {
        match (&self.messages, &self.last_error) {
            (Some(messages), _) => ViewState::Ready(messages.clone()),
            (None, _) if self.chat_id.is_none() => ViewState::Ready(Vec::new()),
            (None, Some(err)) if !self.loading => ViewState::Error(err.clone()),
            (None, _) => ViewState::Loading,
        }
    }

    pub fn state(&self) -> MessageListState {
        MessageListState {
            chat_id: self.chat_id,
            view: self.view(),
            last_error: self.last_error.clone(),
        }
    }
}

struct Shared {
    list: Mutex<MessageList>,
    tx: watch::Sender<MessageListState>,
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, MessageList> {
        match self.list.lock() {
            Ok(l) => l,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn publish(&self, list: &MessageList) {
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

/// Keeps the selected chat's messages current through a chat-scoped feed.
pub struct ChatMessageStore {
    remote: Arc<dyn RemoteStore>,
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ChatMessageStore {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        let list = MessageList::default();
        let (tx, _rx) = watch::channel(list.state());
        Self {
            remote,
            shared: Arc::new(Shared {
                list: Mutex::new(list),
                tx,
            }),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> MessageListState {
        self.shared.tx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<MessageListState> {
        self.shared.tx.subscribe()
    }

    pub fn chat_id(&self) -> Option<Uuid> {
        self.shared.lock().chat_id()
    }

    /// Follow another chat. Selecting the current chat again does nothing.
    pub fn select(&self, chat_id: Option<Uuid>) {
        if self.chat_id() == chat_id {
            return;
        }
        self.resubscribe(chat_id);
    }

    /// Drop the current feed and subscribe again.
    pub fn retry(&self) {
        let chat_id = self.chat_id();
        self.resubscribe(chat_id);
    }

    fn resubscribe(&self, chat_id: Option<Uuid>) {
        let mut task = match self.task.lock() {
            Ok(t) => t,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Aborting the task drops its feed, which unsubscribes it.
        if let Some(old) = task.take() {
            old.abort();
        }

        let generation = {
            let mut list = self.shared.lock();
            let generation = list.reset(chat_id);
            self.shared.publish(&list);
            generation
        };

        let Some(chat_id) = chat_id else {
            return;
        };
        tracing::debug!(%chat_id, generation, "following chat");

        let mut feed = match self.remote.subscribe_messages(chat_id) {
            Ok(feed) => feed,
            Err(e) => {
                tracing::warn!(%chat_id, error = %e, "message feed unavailable");
                let mut list = self.shared.lock();
                if list.apply(generation, Err(e)) {
                    self.shared.publish(&list);
                }
                return;
            }
        };

        let shared = self.shared.clone();
        *task = Some(tokio::spawn(async move {
            while let Some(delivery) = feed.next().await {
                if let Err(e) = &delivery {
                    tracing::warn!(%chat_id, error = %e, "message feed delivery failed");
                }
                let mut list = shared.lock();
                if list.apply(generation, delivery) {
                    shared.publish(&list);
                }
            }
            tracing::debug!(%chat_id, "message feed ended");
        }));
    }
}

impl Drop for ChatMessageStore {
    fn drop(&mut self) {
        let task = match self.task.get_mut() {
            Ok(t) => t,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(task) = task.take() {
            task.abort();
        }
    }
}
