use parlor_protocol::{join_errors, GraphQLError, ProtocolError};
use thiserror::Error;

/// Errors surfaced by the synchronization core.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Channel unreachable or closed. Streaming-channel transport errors are
    /// retried internally; request/response ones are returned once.
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote store rejected a query, mutation or subscription.
    #[error("operation rejected: {}", join_errors(.0))]
    Operation(Vec<GraphQLError>),

    /// Input rejected before any network call.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Access token cannot be attached to a request.
    #[error("invalid credential: {0}")]
    Credential(String),

    #[error("decode error: {0}")]
    Decode(#[from] ProtocolError),

    /// The streaming channel was shut down.
    #[error("streaming channel closed")]
    Closed,
}

impl SyncError {
    pub(crate) fn rejected(message: impl Into<String>) -> Self {
        Self::Operation(vec![GraphQLError::new(message)])
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Closed)
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// A failed message submission. Carries the text the user typed so the
/// caller can restore it; a failed send never loses user input.
#[derive(Debug, Error)]
#[error("message not sent: {source}")]
pub struct SendError {
    pub draft: String,
    #[source]
    pub source: SyncError,
}
