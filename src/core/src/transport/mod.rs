//! Connection to the remote store.
//!
//! One [`TransportSession`] per signed-in client. Queries and mutations go
//! over the request/response channel, subscriptions over the shared
//! streaming channel. The routing decision is made per operation from its
//! document.

mod backoff;
mod cache;
mod events;
mod feed;
mod http;
mod streaming;

use std::sync::Arc;

use futures::StreamExt;
use parlor_protocol::{decode_data, Operation, OperationKind};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

pub use backoff::ReconnectBackoff;
pub use cache::QueryCache;
pub use events::ChannelEvent;
pub use feed::Feed;
pub use http::HttpChannel;
pub use streaming::{StreamingChannel, StreamingSettings};

use crate::config::ClientConfig;
use crate::credentials::{CredentialChange, CredentialProvider};
use crate::error::SyncError;

pub struct TransportSession {
    http: HttpChannel,
    streaming: Arc<StreamingChannel>,
    cache: Arc<QueryCache>,
    events: broadcast::Sender<ChannelEvent>,
    watcher: JoinHandle<()>,
}

impl TransportSession {
    /// Build a session. No connection is opened here; the streaming socket
    /// is created on the first subscription.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(
        config: &ClientConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, SyncError> {
        config.validate().map_err(SyncError::Validation)?;

        let http = HttpChannel::new(
            config.graphql_url.trim(),
            config.request_timeout,
            credentials.clone(),
        )?;
        let (events, _) = broadcast::channel(64);
        let streaming = Arc::new(StreamingChannel::new(
            StreamingSettings {
                url: config.ws_url.trim().to_string(),
                connect_timeout: config.connect_timeout,
                reconnect_base_delay: config.reconnect_base_delay,
                reconnect_max_delay: config.reconnect_max_delay,
            },
            credentials.clone(),
            events.clone(),
        ));
        let cache = Arc::new(QueryCache::new());
        let watcher = spawn_credential_watcher(&*credentials, streaming.clone(), cache.clone());

        Ok(Self {
            http,
            streaming,
            cache,
            events,
            watcher,
        })
    }

    /// Run a one-shot operation and decode its data.
    ///
    /// Queries and mutations are sent over HTTP. A subscription document is
    /// sent over the streaming channel and its first result returned.
    pub async fn execute<O: Operation>(&self, op: &O) -> Result<O::Data, SyncError> {
        let kind = O::kind()?;
        if kind.is_subscription() {
            let mut feed = self.subscribe(op)?;
            return match feed.next().await {
                Some(result) => result,
                None => Err(SyncError::Closed),
            };
        }

        let request = op.request();
        let response = self.http.execute(&request).await?;
        if response.is_error() {
            tracing::warn!(
                operation = O::NAME,
                errors = %parlor_protocol::join_errors(&response.errors),
                "operation rejected"
            );
            return Err(SyncError::Operation(response.errors));
        }
        if kind == OperationKind::Query {
            if let Some(data) = &response.data {
                self.cache
                    .write_value(O::NAME, op.variables().as_ref(), data.clone());
            }
        }
        Ok(decode_data::<O>(response.data)?)
    }

    /// Open a live feed for a subscription document.
    pub fn subscribe<O: Operation>(&self, op: &O) -> Result<Feed<O::Data>, SyncError> {
        if !O::kind()?.is_subscription() {
            return Err(SyncError::Validation(format!(
                "{} is not a subscription",
                O::NAME
            )));
        }
        let (id, rx, commands) = self.streaming.subscribe(op.request());
        tracing::debug!(operation = O::NAME, %id, "feed opened");
        Ok(Feed::new(id, rx, commands, decode_data::<O>))
    }

    /// Streaming-channel lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    /// Tear down the streaming socket and reconnect with a fresh credential.
    pub fn invalidate(&self) {
        self.streaming.invalidate();
    }

    pub fn shutdown(&self) {
        self.streaming.shutdown();
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub(crate) fn cache_handle(&self) -> Arc<QueryCache> {
        self.cache.clone()
    }

    pub fn is_streaming_started(&self) -> bool {
        self.streaming.is_open()
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.watcher.abort();
        self.streaming.shutdown();
    }
}

/// Invalidate the streaming channel on every credential change. Sign-in and
/// sign-out also drop cached results, which belong to the previous user.
fn spawn_credential_watcher(
    credentials: &dyn CredentialProvider,
    streaming: Arc<StreamingChannel>,
    cache: Arc<QueryCache>,
) -> JoinHandle<()> {
    let mut changes = credentials.changes();
    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(change) => {
                    tracing::info!(?change, "credential changed; invalidating streaming channel");
                    if matches!(change, CredentialChange::SignedIn | CredentialChange::SignedOut) {
                        cache.clear();
                    }
                    streaming.invalidate();
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "missed credential changes");
                    cache.clear();
                    streaming.invalidate();
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
