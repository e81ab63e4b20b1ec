use thiserror::Error;

/// Protocol-level errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing field `{0}` in result data")]
    MissingField(&'static str),

    #[error("operation document has no executable definition")]
    NoOperation,
}
