use serde::{Deserialize, Serialize};
use serde_json::Value;

/// GraphQL request body, sent as the JSON body of an HTTP POST or as the
/// payload of a streaming `subscribe` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQLRequest {
    /// Operation document (e.g. "query GetChats { ... }").
    pub query: String,
    /// Name of the operation inside the document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    /// Operation variables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Value>,
}

/// GraphQL execution result.
///
/// A response may carry both `data` and `errors` (partial results).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphQLResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,
}

/// Structured GraphQL error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQLError {
    /// Human-readable description.
    pub message: String,
    /// Optional structured data (Hasura puts `code` and `path` here).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphQLRequest {
    pub fn new(
        query: impl Into<String>,
        operation_name: impl Into<String>,
        variables: Option<Value>,
    ) -> Self {
        Self {
            query: query.into(),
            operation_name: Some(operation_name.into()),
            variables,
        }
    }
}

impl GraphQLResponse {
    pub fn success(data: Value) -> Self {
        Self {
            data: Some(data),
            errors: Vec::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            data: None,
            errors: vec![GraphQLError::new(message)],
        }
    }

    pub fn is_error(&self) -> bool {
        !self.errors.is_empty()
    }
}

impl GraphQLError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            extensions: None,
        }
    }

    /// Machine-readable code from `extensions.code`, if present.
    pub fn code(&self) -> Option<&str> {
        self.extensions
            .as_ref()
            .and_then(|ext| ext.get("code"))
            .and_then(Value::as_str)
    }
}

impl std::fmt::Display for GraphQLError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code() {
            Some(code) => write!(f, "{} ({code})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Join error messages into one line for logs and user-facing errors.
pub fn join_errors(errors: &[GraphQLError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
