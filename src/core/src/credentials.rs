use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use tokio::sync::broadcast;

use crate::error::SyncError;

/// What happened to the user's credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialChange {
    SignedIn,
    SignedOut,
    Refreshed,
}

/// Boundary with the identity provider.
///
/// `resolve` is called for every HTTP request and every streaming-channel
/// (re)connect; implementations must not assume results are cached.
pub trait CredentialProvider: Send + Sync + 'static {
    /// Current access token, or `None` when signed out.
    fn resolve(&self) -> Pin<Box<dyn Future<Output = Option<String>> + Send + '_>>;

    /// Notifications for login, logout and token refresh.
    fn changes(&self) -> broadcast::Receiver<CredentialChange>;
}

/// In-process credential holder. The client binary and tests set tokens
/// on it directly; every change is broadcast to subscribers.
pub struct SharedCredentials {
    token: Mutex<Option<String>>,
    tx: broadcast::Sender<CredentialChange>,
}

impl SharedCredentials {
    pub fn new(token: Option<String>) -> Self {
        let (tx, _rx) = broadcast::channel(16);
        Self {
            token: Mutex::new(token),
            tx,
        }
    }

    /// Replace the token. Setting the same "signed out" state twice is not a
    /// change and emits nothing.
    pub fn set_token(&self, token: Option<String>) {
        let change = {
            let mut current = match self.token.lock() {
                Ok(t) => t,
                Err(poisoned) => poisoned.into_inner(),
            };
            let change = match (current.is_some(), token.is_some()) {
                (false, false) => None,
                (false, true) => Some(CredentialChange::SignedIn),
                (true, false) => Some(CredentialChange::SignedOut),
                (true, true) => Some(CredentialChange::Refreshed),
            };
            *current = token;
            change
        };

        if let Some(change) = change {
            tracing::debug!(?change, "credential changed");
            let _ = self.tx.send(change);
        }
    }

    pub fn current(&self) -> Option<String> {
        match self.token.lock() {
            Ok(t) => t.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl CredentialProvider for SharedCredentials {
    fn resolve(&self) -> Pin<Box<dyn Future<Output = Option<String>> + Send + '_>> {
        let token = self.current();
        Box::pin(async move { token })
    }

    fn changes(&self) -> broadcast::Receiver<CredentialChange> {
        self.tx.subscribe()
    }
}

/// Validate a token and format it as an `Authorization` header value.
///
/// Tokens must be non-empty visible ASCII with no whitespace; anything else
/// cannot travel in a header and is rejected before a request is made.
pub fn authorization_header(token: Option<&str>) -> Result<Option<String>, SyncError> {
    let Some(token) = token else {
        return Ok(None);
    };
    if token.is_empty() {
        return Err(SyncError::Credential("token is empty".into()));
    }
    if let Some(bad) = token.chars().find(|c| !c.is_ascii_graphic()) {
        return Err(SyncError::Credential(format!(
            "token contains invalid character {bad:?}"
        )));
    }
    Ok(Some(parlor_protocol::bearer(token)))
}
