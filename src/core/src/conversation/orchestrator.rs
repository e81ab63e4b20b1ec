use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use parlor_protocol::{Message, Sender};
use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::responder::{ResponderPolicy, APOLOGY};
use crate::error::{SendError, SyncError};
use crate::remote::RemoteStore;

/// Where the current exchange is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangePhase {
    Idle,
    SendingUser,
    ThinkingDelay,
    SendingResponder,
}

impl ExchangePhase {
    pub fn is_busy(self) -> bool {
        self != Self::Idle
    }
}

/// Result of [`Conversation::submit`].
#[derive(Debug)]
pub enum SubmitOutcome {
    /// The user message is stored; the reply follows in the background.
    Accepted(Exchange),
    /// Another exchange is in flight. Nothing was sent.
    Busy { draft: String },
}

#[derive(Debug)]
pub struct Exchange {
    pub user_message: Message,
    /// Resolves to the stored reply (or the stored apology).
    pub reply: JoinHandle<Result<Message, SyncError>>,
}

/// Resets the phase to `Idle` however the exchange ends.
struct PhaseGuard {
    phase: Arc<watch::Sender<ExchangePhase>>,
}

impl Drop for PhaseGuard {
    fn drop(&mut self) {
        self.phase.send_replace(ExchangePhase::Idle);
    }
}

/// Send workflow for one chat view.
///
/// At most one exchange runs at a time: the user message is stored, then
/// after a random delay the responder's reply is stored. The reply task is
/// not tied to this value; dropping the view lets it finish.
pub struct Conversation {
    remote: Arc<dyn RemoteStore>,
    chat_id: Uuid,
    responder: Arc<ResponderPolicy>,
    thinking_delay: Range<Duration>,
    phase: Arc<watch::Sender<ExchangePhase>>,
}

impl Conversation {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        chat_id: Uuid,
        responder: Arc<ResponderPolicy>,
        thinking_delay: Range<Duration>,
    ) -> Self {
        let (phase, _rx) = watch::channel(ExchangePhase::Idle);
        Self {
            remote,
            chat_id,
            responder,
            thinking_delay,
            phase: Arc::new(phase),
        }
    }

    pub fn chat_id(&self) -> Uuid {
        self.chat_id
    }

    pub fn phase(&self) -> ExchangePhase {
        *self.phase.borrow()
    }

    pub fn watch_phase(&self) -> watch::Receiver<ExchangePhase> {
        self.phase.subscribe()
    }

    /// Store `text` as a user message and schedule the reply.
    ///
    /// Blank text is rejected before anything else happens. On failure the
    /// error carries `text` unchanged.
    pub async fn submit(&self, text: &str) -> Result<SubmitOutcome, SendError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(SendError {
                draft: text.to_string(),
                source: SyncError::Validation("message is empty".into()),
            });
        }

        let entered = self.phase.send_if_modified(|phase| {
            if *phase != ExchangePhase::Idle {
                return false;
            }
            *phase = ExchangePhase::SendingUser;
            true
        });
        if !entered {
            tracing::debug!(chat_id = %self.chat_id, "exchange in flight; submission ignored");
            return Ok(SubmitOutcome::Busy {
                draft: text.to_string(),
            });
        }
        let guard = PhaseGuard {
            phase: self.phase.clone(),
        };

        let user_message = match self
            .remote
            .insert_message(self.chat_id, trimmed.to_string(), Sender::User)
            .await
        {
            Ok(message) => message,
            Err(source) => {
                tracing::warn!(chat_id = %self.chat_id, error = %source, "user message not stored");
                return Err(SendError {
                    draft: text.to_string(),
                    source,
                });
            }
        };

        self.phase.send_replace(ExchangePhase::ThinkingDelay);
        let delay = self.pick_delay();
        tracing::debug!(chat_id = %self.chat_id, ?delay, "responder thinking");

        let reply = tokio::spawn(respond(
            self.remote.clone(),
            self.responder.clone(),
            self.chat_id,
            user_message.text.clone(),
            delay,
            guard,
        ));
        Ok(SubmitOutcome::Accepted(Exchange {
            user_message,
            reply,
        }))
    }

    fn pick_delay(&self) -> Duration {
        let range = self.thinking_delay.clone();
        if range.is_empty() {
            return range.start;
        }
        rand::thread_rng().gen_range(range)
    }
}

async fn respond(
    remote: Arc<dyn RemoteStore>,
    responder: Arc<ResponderPolicy>,
    chat_id: Uuid,
    user_text: String,
    delay: Duration,
    guard: PhaseGuard,
) -> Result<Message, SyncError> {
    tokio::time::sleep(delay).await;
    guard.phase.send_replace(ExchangePhase::SendingResponder);

    let reply = responder.reply(&user_text);
    let stored = match remote
        .insert_message(chat_id, reply, Sender::Responder)
        .await
    {
        Ok(message) => Ok(message),
        Err(e) => {
            tracing::warn!(%chat_id, error = %e, "reply not stored; sending apology");
            remote
                .insert_message(chat_id, APOLOGY.to_string(), Sender::Responder)
                .await
        }
    };
    drop(guard);
    stored
}
