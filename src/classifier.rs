//! Interest classification — reply text to a three-way intent label.
//!
//! `classify` is total: the primary LLM path is wrapped in a timeout and any
//! failure (transport, auth, off-label answer) falls back to deterministic
//! keyword matching. Negative phrases are checked before positive ones so
//! ambiguous text containing both polarities resolves to negative — the safe
//! direction for opt-out handling.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::events::model::InterestLevel;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};

/// Phrases signalling the contact wants out. Checked first.
const NEGATIVE_PHRASES: &[&str] = &[
    "not interested",
    "unsubscribe",
    "remove me",
    "not a good fit",
    "not right now",
    "no thank you",
];

/// Phrases signalling genuine interest.
const POSITIVE_PHRASES: &[&str] = &[
    "interested",
    "let's connect",
    "schedule",
    "love to",
    "sounds great",
    "learn more",
    "curious",
];

const CLASSIFY_SYSTEM_PROMPT: &str =
    "You classify outreach email replies. Answer with exactly one word: \
     positive, negative, or neutral. No punctuation, no explanation.";

/// Max tokens for the classification call — one label, kept tight.
const CLASSIFY_MAX_TOKENS: u64 = 5;

/// Classifies inbound reply text into an interest level.
#[derive(Clone)]
pub struct InterestClassifier {
    llm: Option<Arc<dyn LlmProvider>>,
    timeout: Duration,
}

impl InterestClassifier {
    pub fn new(llm: Option<Arc<dyn LlmProvider>>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    /// Classifier that never calls out — keyword matching only.
    pub fn keyword_only() -> Self {
        Self {
            llm: None,
            timeout: Duration::ZERO,
        }
    }

    /// Classify reply text. Never fails; falls back to keyword matching
    /// whenever the primary path cannot produce one of the three labels.
    pub async fn classify(&self, text: &str) -> InterestLevel {
        if let Some(ref llm) = self.llm {
            match self.classify_with_llm(llm.as_ref(), text).await {
                Ok(level) => {
                    debug!(interest = level.as_str(), "Classified reply via LLM");
                    return level;
                }
                Err(reason) => {
                    warn!(reason, "LLM classification failed, using keyword fallback");
                }
            }
        }
        classify_with_keywords(text)
    }

    async fn classify_with_llm(
        &self,
        llm: &dyn LlmProvider,
        text: &str,
    ) -> Result<InterestLevel, String> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(CLASSIFY_SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "Is this email reply positive, negative, or neutral?\n\n{text}"
            )),
        ])
        .with_temperature(0.0)
        .with_max_tokens(CLASSIFY_MAX_TOKENS);

        let response = tokio::time::timeout(self.timeout, llm.complete(request))
            .await
            .map_err(|_| format!("timed out after {:?}", self.timeout))?
            .map_err(|e| e.to_string())?;

        InterestLevel::parse(&response.content)
            .ok_or_else(|| format!("off-label answer: {:?}", response.content))
    }
}

/// Deterministic keyword fallback. Negative first, then positive, default
/// neutral.
pub fn classify_with_keywords(text: &str) -> InterestLevel {
    let lowered = text.to_lowercase();
    if NEGATIVE_PHRASES.iter().any(|p| lowered.contains(p)) {
        return InterestLevel::Negative;
    }
    if POSITIVE_PHRASES.iter().any(|p| lowered.contains(p)) {
        return InterestLevel::Positive;
    }
    InterestLevel::Neutral
}
