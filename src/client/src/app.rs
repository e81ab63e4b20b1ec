use std::sync::Arc;

use parlor_core::{
    ChatListState, ChatListStore, ChatMessageStore, ChatSummary, ClientConfig, Conversation,
    ExchangePhase, ListStatus, Message, MessageListState, RemoteStore, ResponderPolicy,
    SharedCredentials, SubmitOutcome, TransportSession, ViewState,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use uuid::Uuid;

use crate::input::{self, Input, Target, HELP};

struct App {
    config: ClientConfig,
    credentials: Arc<SharedCredentials>,
    remote: Arc<dyn RemoteStore>,
    chats: ChatListStore,
    messages: ChatMessageStore,
    responder: Arc<ResponderPolicy>,
    conversation: Option<Conversation>,
    /// Held from the moment a chat is followed, so phase changes made while
    /// a submission is awaited are still reported.
    phase_rx: Option<watch::Receiver<ExchangePhase>>,
    list_error: ErrorNotice,
    printed: Printed,
    draft: Option<String>,
}

/// Last list error reported, so each failure is printed once.
#[derive(Default)]
struct ErrorNotice {
    last: Option<String>,
}

impl ErrorNotice {
    /// The error to print, if the list just entered (or changed) its error
    /// state.
    fn observe(&mut self, status: &ListStatus) -> Option<&str> {
        let current = match status {
            ListStatus::Error(e) => Some(e),
            _ => None,
        };
        if current == self.last.as_ref() {
            return None;
        }
        self.last = current.cloned();
        self.last.as_deref()
    }
}

/// How much of the open chat has been written to the terminal.
#[derive(Default)]
struct Printed {
    chat_id: Option<Uuid>,
    count: usize,
}

pub async fn run(
    config: ClientConfig,
    session: Arc<TransportSession>,
    credentials: Arc<SharedCredentials>,
) -> Result<(), Box<dyn std::error::Error>> {
    let remote: Arc<dyn RemoteStore> = session;
    let chats = ChatListStore::mount(remote.clone(), config.preview_chars);
    let messages = ChatMessageStore::new(remote.clone());
    let mut app = App {
        config,
        credentials,
        remote,
        chats,
        messages,
        responder: Arc::new(ResponderPolicy::new()),
        conversation: None,
        phase_rx: None,
        list_error: ErrorNotice::default(),
        printed: Printed::default(),
        draft: None,
    };

    let mut list_rx = app.chats.watch();
    let mut message_rx = app.messages.watch();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("parlor: type /help for commands");
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match input::parse(&line) {
                    Ok(Some(Input::Quit)) => break,
                    Ok(Some(cmd)) => app.handle(cmd).await,
                    Ok(None) => {}
                    Err(e) => println!("{e}"),
                }
            }
            changed = list_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = list_rx.borrow_and_update().clone();
                app.on_list(&state);
            }
            changed = message_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = message_rx.borrow_and_update().clone();
                app.printed.render(&state);
            }
            phase = next_phase(&mut app.phase_rx) => {
                if phase == ExchangePhase::ThinkingDelay {
                    println!("Bot is thinking...");
                }
            }
        }
    }
    Ok(())
}

async fn next_phase(rx: &mut Option<watch::Receiver<ExchangePhase>>) -> ExchangePhase {
    match rx {
        Some(rx) => match rx.changed().await {
            Ok(()) => *rx.borrow_and_update(),
            Err(_) => std::future::pending().await,
        },
        None => std::future::pending().await,
    }
}

impl App {
    async fn handle(&mut self, cmd: Input) {
        match cmd {
            Input::New => match self.chats.create_chat().await {
                Ok(id) => {
                    println!("created chat {id}");
                    self.follow(Some(id));
                }
                Err(e) => println!("could not create chat: {e}"),
            },
            Input::List => print_list(&self.chats.state()),
            Input::Open(target) => match self.resolve(target) {
                Some(id) => {
                    self.chats.select(Some(id));
                    self.follow(Some(id));
                }
                None => println!("no such chat"),
            },
            Input::Delete(target) => match self.resolve(target) {
                Some(id) => match self.chats.delete_chat(id).await {
                    Ok(()) => {
                        println!("deleted chat {id}");
                        let selected = self.chats.selected();
                        self.follow(selected);
                    }
                    Err(e) => println!("could not delete chat: {e}"),
                },
                None => println!("no such chat"),
            },
            Input::Retry => {
                if let Err(e) = self.chats.refetch().await {
                    println!("still failing: {e}");
                }
                self.messages.retry();
            }
            Input::Resend => match self.draft.take() {
                Some(draft) => self.send(draft).await,
                None => println!("nothing to resend"),
            },
            Input::Token(token) => {
                self.credentials.set_token(Some(token));
                println!("signed in");
            }
            Input::Logout => {
                self.credentials.set_token(None);
                println!("signed out");
            }
            Input::Help => println!("{HELP}"),
            Input::Say(text) => self.send(text).await,
            Input::Quit => {}
        }
    }

    async fn send(&mut self, text: String) {
        let Some(conversation) = &self.conversation else {
            println!("open or create a chat first");
            self.draft = Some(text);
            return;
        };
        match conversation.submit(&text).await {
            Ok(SubmitOutcome::Accepted(exchange)) => {
                let chat_id = conversation.chat_id();
                tokio::spawn(async move {
                    match exchange.reply.await {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => tracing::warn!(%chat_id, error = %e, "no reply stored"),
                        Err(e) => tracing::warn!(%chat_id, error = %e, "reply task failed"),
                    }
                });
            }
            Ok(SubmitOutcome::Busy { draft }) => {
                println!("still waiting for a reply; kept your message, /resend to send it");
                self.draft = Some(draft);
            }
            Err(e) => {
                println!("{e}");
                println!("draft: {}  (/resend to try again)", e.draft);
                self.draft = Some(e.draft);
            }
        }
    }

    fn resolve(&self, target: Target) -> Option<Uuid> {
        let state = self.chats.state();
        match target {
            Target::Index(n) => state.chats.get(n - 1).map(|c| c.id),
            Target::Id(id) => state.chats.iter().any(|c| c.id == id).then_some(id),
        }
    }

    fn on_list(&mut self, state: &ChatListState) {
        if let Some(e) = self.list_error.observe(&state.status) {
            println!("could not load chats: {e} (/retry)");
        }
        if state.selected != self.messages.chat_id() {
            self.follow(state.selected);
        }
    }

    /// Point the message view and send workflow at `chat_id`.
    fn follow(&mut self, chat_id: Option<Uuid>) {
        if self.conversation.as_ref().map(Conversation::chat_id) != chat_id {
            self.conversation = chat_id.map(|id| {
                Conversation::new(
                    self.remote.clone(),
                    id,
                    self.responder.clone(),
                    self.config.thinking_delay.clone(),
                )
            });
            self.phase_rx = self.conversation.as_ref().map(Conversation::watch_phase);
        }
        self.messages.select(chat_id);
    }
}

impl Printed {
    fn render(&mut self, state: &MessageListState) {
        if state.chat_id != self.chat_id {
            self.chat_id = state.chat_id;
            self.count = 0;
            if let Some(id) = state.chat_id {
                println!("── chat {id} ──");
            }
        }
        match &state.view {
            ViewState::Loading => {}
            ViewState::Error(e) => println!("could not load messages: {e} (/retry)"),
            ViewState::Ready(messages) => {
                if messages.is_empty() && self.count == 0 && state.chat_id.is_some() {
                    println!("Start a conversation by sending a message.");
                }
                // A shorter list means a different history; print it all.
                if messages.len() < self.count {
                    self.count = 0;
                }
                for message in &messages[self.count..] {
                    println!("{}", message_line(message));
                }
                self.count = messages.len();
            }
        }
    }
}

fn message_line(message: &Message) -> String {
    format!(
        "[{}] {}: {}",
        message.created_at.format("%H:%M"),
        message.sender.label(),
        message.text
    )
}

/// One list row: position, preview, then who wrote last and when.
fn list_row(index: usize, chat: &ChatSummary, selected: bool) -> String {
    let marker = if selected { '*' } else { ' ' };
    let last = match (chat.sender_label(), chat.last_message_at) {
        (Some(who), Some(at)) => format!("  {who} · {}", at.format("%H:%M")),
        _ => format!("  created {}", chat.created_at.format("%Y-%m-%d %H:%M")),
    };
    let pending = if chat.provisional { " (syncing)" } else { "" };
    format!("{marker}{:>3}. {}{last}{pending}", index + 1, chat.preview)
}

fn print_list(state: &ChatListState) {
    match &state.status {
        ListStatus::Loading => println!("loading chats..."),
        ListStatus::Error(e) => println!("could not load chats: {e} (/retry)"),
        ListStatus::Empty => println!("no chats yet; /new starts one"),
        ListStatus::Ready => {
            for (i, chat) in state.chats.iter().enumerate() {
                println!("{}", list_row(i, chat, state.selected == Some(chat.id)));
            }
        }
    }
}
