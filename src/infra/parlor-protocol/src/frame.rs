use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ConnectionInitPayload, GraphQLError, GraphQLRequest, GraphQLResponse, ProtocolError};

/// WebSocket subprotocol negotiated for the streaming channel.
pub const GRAPHQL_TRANSPORT_WS: &str = "graphql-transport-ws";

/// Close code sent by servers when the `connection_init` payload is rejected.
pub const CLOSE_FORBIDDEN: u16 = 4403;

/// Close code sent by servers when no `connection_init` arrives in time.
pub const CLOSE_INIT_TIMEOUT: u16 = 4408;

/// Text frame exchanged on the streaming channel.
///
/// Discriminated by `type`, following the `graphql-transport-ws` protocol:
/// - `connection_init` / `connection_ack`: handshake
/// - `ping` / `pong`: keepalive, either direction
/// - `subscribe`: client starts an operation
/// - `next` / `error` / `complete`: server results for an operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    ConnectionInit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<ConnectionInitPayload>,
    },
    ConnectionAck {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    Subscribe {
        id: String,
        payload: GraphQLRequest,
    },
    Next {
        id: String,
        payload: GraphQLResponse,
    },
    Error {
        id: String,
        payload: Vec<GraphQLError>,
    },
    Complete {
        id: String,
    },
}

impl Frame {
    pub fn subscribe(id: impl Into<String>, payload: GraphQLRequest) -> Self {
        Self::Subscribe {
            id: id.into(),
            payload,
        }
    }

    pub fn complete(id: impl Into<String>) -> Self {
        Self::Complete { id: id.into() }
    }

    pub fn pong() -> Self {
        Self::Pong { payload: None }
    }

    /// Operation id carried by operation-scoped frames.
    pub fn operation_id(&self) -> Option<&str> {
        match self {
            Self::Subscribe { id, .. }
            | Self::Next { id, .. }
            | Self::Error { id, .. }
            | Self::Complete { id } => Some(id),
            _ => None,
        }
    }
}

/// Encode a `Frame` to a JSON string for sending as a text WS frame.
pub fn encode_frame(frame: &Frame) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(frame)?)
}

/// Decode a `Frame` from a JSON string received as a text WS frame.
pub fn decode_frame(text: &str) -> Result<Frame, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}
