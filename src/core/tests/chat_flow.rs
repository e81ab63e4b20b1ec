mod common;

use std::sync::Arc;

use common::{wait_for, FakeRemote};
use parlor_core::{
    ChatListStore, ChatMessageStore, Conversation, ExchangePhase, ListStatus, RemoteStore,
    ResponderPolicy, SubmitOutcome, ViewState,
};
use parlor_protocol::Sender;

const GREETING: &str = "Hello! It's great to meet you. How are you doing today?";

#[tokio::test]
async fn create_chat_then_say_hi() {
    let remote = FakeRemote::start().await;
    let config = remote.config();
    let (session, _creds) = remote.session(Some("tok"));
    let store: Arc<dyn RemoteStore> = session;

    let chats = ChatListStore::mount(store.clone(), config.preview_chars);
    let mut list_rx = chats.watch();
    wait_for(&mut list_rx, |s| s.status == ListStatus::Empty).await;

    let chat_id = chats.create_chat().await.unwrap();
    assert_eq!(chats.selected(), Some(chat_id));
    assert_eq!(chats.state().chats[0].preview, "New chat");

    let messages = ChatMessageStore::new(store.clone());
    messages.select(chats.selected());
    let mut message_rx = messages.watch();
    wait_for(&mut message_rx, |s| s.view == ViewState::Ready(Vec::new())).await;

    let conversation = Conversation::new(
        store.clone(),
        chat_id,
        Arc::new(ResponderPolicy::seeded(11)),
        config.thinking_delay.clone(),
    );
    let exchange = match conversation.submit("hi").await.unwrap() {
        SubmitOutcome::Accepted(exchange) => exchange,
        SubmitOutcome::Busy { .. } => panic!("conversation busy"),
    };
    assert_eq!(exchange.user_message.text, "hi");

    wait_for(&mut message_rx, |s| {
        s.view.ready().is_some_and(|m| m.len() == 2)
    })
    .await;
    let state = messages.state();
    let shown = state.view.ready().unwrap();
    assert_eq!(shown[0].sender, Sender::User);
    assert_eq!(shown[0].text, "hi");
    assert_eq!(shown[1].sender, Sender::Responder);
    assert_eq!(shown[1].text, GREETING);
    assert!(shown[0].created_at < shown[1].created_at);
    assert!(shown.iter().all(|m| m.chat_id == chat_id));

    exchange.reply.await.unwrap().unwrap();
    assert_eq!(conversation.phase(), ExchangePhase::Idle);

    // The list preview follows the latest message.
    wait_for(&mut list_rx, |s| {
        s.chats.first().is_some_and(|c| c.preview == GREETING)
    })
    .await;
    let summary = chats.state().chats[0].clone();
    assert_eq!(summary.sender_label(), Some("Bot"));
    assert!(!summary.provisional);
}

#[tokio::test]
async fn delete_refetches_over_http_and_clears_selection() {
    let remote = FakeRemote::start().await;
    let (session, _creds) = remote.session(Some("tok"));
    let store: Arc<dyn RemoteStore> = session;

    let chats = ChatListStore::mount(store.clone(), 50);
    let mut rx = chats.watch();
    wait_for(&mut rx, |s| s.status == ListStatus::Empty).await;

    let keep = chats.create_chat().await.unwrap();
    let doomed = chats.create_chat().await.unwrap();
    assert_eq!(chats.selected(), Some(doomed));

    chats.delete_chat(doomed).await.unwrap();
    assert_eq!(chats.selected(), None);
    wait_for(&mut rx, |s| s.chats.len() == 1).await;
    let state = chats.state();
    assert_eq!(state.chats.len(), 1);
    assert_eq!(state.chats[0].id, keep);

    remote.recorded(|r| {
        let at = r.http_ops.iter().position(|op| op == "DeleteChat").unwrap();
        assert_eq!(r.http_ops[at + 1], "GetChats");
    });
}

#[tokio::test]
async fn long_message_preview_is_truncated() {
    let remote = FakeRemote::start().await;
    let (session, _creds) = remote.session(None);
    let store: Arc<dyn RemoteStore> = session;

    let chats = ChatListStore::mount(store.clone(), 50);
    let chat_id = chats.create_chat().await.unwrap();
    let text = "x".repeat(51);
    store
        .insert_message(chat_id, text, Sender::User)
        .await
        .unwrap();

    let mut rx = chats.watch();
    let expected = format!("{}...", "x".repeat(50));
    wait_for(&mut rx, |s| {
        s.chats.iter().any(|c| c.id == chat_id && c.preview == expected)
    })
    .await;
    assert_eq!(chats.state().chats[0].sender_label(), Some("You"));
}

#[tokio::test]
async fn switching_chats_shows_only_the_selected_history() {
    let remote = FakeRemote::start().await;
    let (session, _creds) = remote.session(None);
    let store: Arc<dyn RemoteStore> = session;

    let a = store.create_chat().await.unwrap().id;
    let b = store.create_chat().await.unwrap().id;
    store
        .insert_message(a, "in a".into(), Sender::User)
        .await
        .unwrap();
    store
        .insert_message(b, "in b".into(), Sender::User)
        .await
        .unwrap();

    let messages = ChatMessageStore::new(store.clone());
    let mut rx = messages.watch();
    messages.select(Some(a));
    wait_for(&mut rx, |s| {
        s.chat_id == Some(a) && s.view.ready().is_some_and(|m| m.len() == 1)
    })
    .await;

    messages.select(Some(b));
    wait_for(&mut rx, |s| {
        s.chat_id == Some(b) && s.view.ready().is_some_and(|m| m.len() == 1)
    })
    .await;
    let state = messages.state();
    assert_eq!(state.view.ready().unwrap()[0].text, "in b");

    // A new message in the old chat does not leak into the view.
    store
        .insert_message(a, "late".into(), Sender::User)
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let state = messages.state();
    assert_eq!(state.chat_id, Some(b));
    assert_eq!(state.view.ready().unwrap().len(), 1);
}
