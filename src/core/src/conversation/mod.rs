//! The send workflow and the automated responder.

mod orchestrator;
mod responder;

pub use orchestrator::{Conversation, Exchange, ExchangePhase, SubmitOutcome};
pub use responder::{ResponderPolicy, APOLOGY, FALLBACK_REPLIES};
