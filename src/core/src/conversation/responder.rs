use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Stored in place of a reply that could not be persisted.
pub const APOLOGY: &str =
    "I'm sorry, I'm having trouble responding right now. Please try again.";

/// Generic replies for text that matches no trigger.
pub const FALLBACK_REPLIES: [&str; 8] = [
    "That's an interesting point! Can you tell me more about that?",
    "I understand what you're saying. How does that make you feel?",
    "Thanks for sharing that with me. What would you like to explore next?",
    "That's a great question! Let me think about that for a moment...",
    "I appreciate you bringing that up. Have you considered looking at it from a different angle?",
    "That sounds important to you. Can you help me understand why?",
    "I'm here to help! What specific aspect would you like to focus on?",
    "That's fascinating! I'd love to learn more about your perspective on this.",
];

/// Ordered (substrings, reply) rules; the first rule with any matching
/// substring wins.
const RULES: &[(&[&str], &str)] = &[
    (
        &["hello", "hi"],
        "Hello! It's great to meet you. How are you doing today?",
    ),
    (
        &["help"],
        "I'm here to help! Feel free to ask me anything or just chat about what's on your mind.",
    ),
    (
        &["how are you"],
        "I'm doing well, thank you for asking! I'm here and ready to chat with you. How are you feeling today?",
    ),
    (
        &["thank"],
        "You're very welcome! I'm happy I could help. Is there anything else you'd like to talk about?",
    ),
];

/// Keyword responder. Matching is a case-insensitive substring test, so
/// "this" triggers the greeting.
pub struct ResponderPolicy {
    rng: Mutex<StdRng>,
}

impl ResponderPolicy {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Fallback choices are reproducible for a given seed.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn reply(&self, text: &str) -> String {
        if let Some(reply) = keyword_reply(text) {
            return reply.to_string();
        }
        let mut rng = match self.rng.lock() {
            Ok(r) => r,
            Err(poisoned) => poisoned.into_inner(),
        };
        FALLBACK_REPLIES
            .choose(&mut *rng)
            .copied()
            .unwrap_or(FALLBACK_REPLIES[0])
            .to_string()
    }
}

impl Default for ResponderPolicy {
    fn default() -> Self {
        Self::new()
    }
}

fn keyword_reply(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    RULES
        .iter()
        .find(|(triggers, _)| triggers.iter().any(|t| lower.contains(t)))
        .map(|(_, reply)| *reply)
}
