use serde::{Deserialize, Serialize};

/// Payload of the `connection_init` frame.
///
/// Hasura reads the streaming channel's credentials from a `headers` object
/// that mirrors the HTTP headers of the request/response channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInitPayload {
    #[serde(default)]
    pub headers: InitHeaders,
}

/// Headers forwarded as connection metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitHeaders {
    #[serde(
        rename = "Authorization",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub authorization: Option<String>,
}

impl ConnectionInitPayload {
    /// Build a payload for an optional access token. An absent token sends no
    /// `Authorization` header at all.
    pub fn with_token(token: Option<&str>) -> Self {
        Self {
            headers: InitHeaders {
                authorization: token.map(bearer),
            },
        }
    }

    /// The bearer token, if the payload carries one.
    pub fn bearer_token(&self) -> Option<&str> {
        self.headers
            .authorization
            .as_deref()
            .and_then(|v| v.strip_prefix("Bearer "))
    }
}

/// Format an access token as an `Authorization` header value.
pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_token_omits_header() {
        let payload = ConnectionInitPayload::with_token(None);
        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(json, r#"{"headers":{}}"#);
        assert_eq!(payload.bearer_token(), None);
    }

    #[test]
    fn bearer_token_roundtrip() {
        let payload = ConnectionInitPayload::with_token(Some("tok-1"));
        let json = serde_json::to_string(&payload).unwrap();
        let decoded: ConnectionInitPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.bearer_token(), Some("tok-1"));
    }

    #[test]
    fn missing_headers_object_defaults() {
        let decoded: ConnectionInitPayload = serde_json::from_str("{}").unwrap();
        assert_eq!(decoded, ConnectionInitPayload::default());
    }
}
