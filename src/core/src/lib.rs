pub mod chats;
pub mod config;
pub mod conversation;
pub mod credentials;
pub mod error;
pub mod parlor_config;
pub mod paths;
pub mod remote;
pub mod transport;

#[cfg(test)]
mod testing;

pub use chats::{
    ChatListState, ChatListStore, ChatMessageStore, ChatSummary, ListStatus, MessageListState,
    ViewState,
};
pub use config::ClientConfig;
pub use conversation::{Conversation, Exchange, ExchangePhase, ResponderPolicy, SubmitOutcome};
pub use credentials::{CredentialChange, CredentialProvider, SharedCredentials};
pub use error::{SendError, SyncError};
pub use parlor_config::ParlorConfig;
pub use remote::{RemoteStore, SnapshotStream};
pub use transport::{ChannelEvent, Feed, TransportSession};
pub use parlor_protocol::{Chat, Message, Sender};
