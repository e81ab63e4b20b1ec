use std::sync::Arc;
use std::time::Duration;

use parlor_protocol::{GraphQLRequest, GraphQLResponse};
use reqwest::header::AUTHORIZATION;

use crate::credentials::{authorization_header, CredentialProvider};
use crate::error::SyncError;

/// Request/response channel: one HTTP POST per operation.
///
/// The credential is resolved for every call. There is no retry; callers
/// decide what to do with a failure.
pub struct HttpChannel {
    client: reqwest::Client,
    url: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpChannel {
    pub fn new(
        url: impl Into<String>,
        request_timeout: Duration,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            credentials,
        })
    }

    pub async fn execute(&self, request: &GraphQLRequest) -> Result<GraphQLResponse, SyncError> {
        let token = self.credentials.resolve().await;
        let auth = authorization_header(token.as_deref())?;

        let mut builder = self.client.post(&self.url).json(request);
        if let Some(value) = auth {
            builder = builder.header(AUTHORIZATION, value);
        }

        let resp = builder.send().await?;
        let status = resp.status();
        tracing::debug!(
            operation = request.operation_name.as_deref().unwrap_or("<anonymous>"),
            %status,
            "http round trip"
        );

        // GraphQL servers report most failures as 200 + `errors`, but some
        // gateways answer 4xx/5xx with a GraphQL body too; prefer the body.
        match resp.json::<GraphQLResponse>().await {
            Ok(body) => Ok(body),
            Err(_) if !status.is_success() => {
                Err(SyncError::Transport(format!("http status {status}")))
            }
            Err(e) => Err(SyncError::Transport(format!("invalid response body: {e}"))),
        }
    }
}
