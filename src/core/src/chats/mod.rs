//! Local projections of remote chat state.

mod list;
mod messages;

pub use list::{
    preview_text, ChatList, ChatListState, ChatListStore, ChatSummary, ListStatus, EMPTY_PREVIEW,
};
pub use messages::{ChatMessageStore, MessageList, MessageListState};

/// Render state of a projection that has no dedicated empty state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewState<T> {
    Loading,
    /// No data was ever received and the last attempt failed.
    Error(String),
    Ready(T),
}

impl<T> ViewState<T> {
    pub fn ready(&self) -> Option<&T> {
        match self {
            Self::Ready(value) => Some(value),
            _ => None,
        }
    }
}
