//! Message composition — follow-up and reply bodies.
//!
//! Follow-ups go through the LLM when one is configured; any failure falls
//! back to pre-written templates keyed on the contact's industry domain, so
//! composition never blocks a send.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::SenderProfile;
use crate::contacts::Contact;
use crate::events::model::InterestLevel;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};

const COMPOSE_SYSTEM_PROMPT: &str =
    "You are a business development assistant. Your only job is to write the \
     full text for an email body as instructed, without any extra text or \
     formatting.";

const COMPOSE_MAX_TOKENS: u64 = 300;

/// A rendered message ready to hand to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedMessage {
    pub subject: String,
    pub body: String,
}

/// Renders outbound message text.
#[derive(Clone)]
pub struct MessageComposer {
    llm: Option<Arc<dyn LlmProvider>>,
    sender: SenderProfile,
    timeout: Duration,
}

impl MessageComposer {
    pub fn new(
        llm: Option<Arc<dyn LlmProvider>>,
        sender: SenderProfile,
        timeout: Duration,
    ) -> Self {
        Self {
            llm,
            sender,
            timeout,
        }
    }

    /// Composer that never calls out — templates only.
    pub fn template_only(sender: SenderProfile) -> Self {
        Self {
            llm: None,
            sender,
            timeout: Duration::ZERO,
        }
    }

    /// Compose the next follow-up message for a contact.
    pub async fn follow_up(&self, contact: &Contact) -> ComposedMessage {
        let body = if let Some(ref llm) = self.llm {
            match self.follow_up_with_llm(llm.as_ref(), contact).await {
                Ok(body) => {
                    debug!(contact = %contact.id, "Composed follow-up via LLM");
                    body
                }
                Err(reason) => {
                    warn!(reason, "LLM composition failed, using domain template");
                    self.fallback_body(contact)
                }
            }
        } else {
            self.fallback_body(contact)
        };

        ComposedMessage {
            subject: self.sender.follow_up_subject.clone(),
            body,
        }
    }

    /// Compose a reply to an inbound message, by interest level.
    /// Replies are templated; the contact already engaged, so the priority
    /// is a fast, predictable answer.
    pub fn reply(&self, original_subject: &str, interest: InterestLevel) -> ComposedMessage {
        let subject = threaded_subject(original_subject);
        let body = match interest {
            InterestLevel::Positive => format!(
                "Hi,\n\nThank you for your positive response! We'd love to set up \
                 a conversation — someone from {org} will follow up shortly with \
                 times that work.\n\n{sig}",
                org = self.sender.organization,
                sig = self.signature(),
            ),
            InterestLevel::Negative | InterestLevel::Neutral => format!(
                "Hi,\n\nThank you for your response. Explore more: {link}\n\n{sig}",
                link = self.sender.services_link,
                sig = self.signature(),
            ),
        };
        ComposedMessage { subject, body }
    }

    async fn follow_up_with_llm(
        &self,
        llm: &dyn LlmProvider,
        contact: &Contact,
    ) -> Result<String, String> {
        let greeting = greeting_for(&contact.display_name);
        let signature = self.signature();
        let prompt = format!(
            "Write a professional and concise outreach follow-up email body.\n\
             The target is {name} in the {domain} sector.\n\
             My name is {from} from {org}.\n\n\
             Your entire response should be ONLY the email content, following \
             these rules precisely:\n\
             1. Start the email body directly with the greeting: \"{greeting}\"\n\
             2. After the greeting, add the main message. Briefly introduce \
             {org}'s relevance to their industry and express interest in \
             connecting. Keep this main part under 120 words.\n\
             3. End the email body with the exact closing: \"{signature}\"\n\n\
             Do NOT include a \"Subject:\" line or any other text outside of \
             the email body itself.",
            name = display_or(&contact.display_name, "a professional"),
            domain = display_or(&contact.domain, "their industry"),
            from = self.sender.from_name,
            org = self.sender.organization,
        );

        let request = CompletionRequest::new(vec![
            ChatMessage::system(COMPOSE_SYSTEM_PROMPT),
            ChatMessage::user(prompt),
        ])
        .with_temperature(0.75)
        .with_max_tokens(COMPOSE_MAX_TOKENS);

        let response = tokio::time::timeout(self.timeout, llm.complete(request))
            .await
            .map_err(|_| format!("timed out after {:?}", self.timeout))?
            .map_err(|e| e.to_string())?;

        let body = response.content.trim().to_string();
        if body.is_empty() {
            return Err("empty completion".into());
        }
        Ok(body)
    }

    /// Pre-written body selected by the contact's industry domain.
    fn fallback_body(&self, contact: &Contact) -> String {
        let greeting = greeting_for(&contact.display_name);
        let org = &self.sender.organization;
        let domain = contact.domain.to_lowercase();

        let core = if domain.contains("edtech") || domain.contains("education") {
            format!(
                "I came across your profile and was impressed by your work in the \
                 EdTech space. At {org}, we're developing innovative solutions to \
                 personalize learning and improve educational outcomes.\n\n\
                 I believe our work aligns with your expertise and would be keen \
                 to connect and share insights."
            )
        } else if domain.contains("commerce") || domain.contains("retail") {
            format!(
                "I noticed your experience in the e-commerce sector and wanted to \
                 reach out. {org} specializes in creating tools that enhance \
                 customer engagement and optimize online retail operations.\n\n\
                 Given your background, I thought a brief chat about the trends \
                 shaping the industry could be mutually beneficial."
            )
        } else if domain.contains("health") || domain.contains("medical") {
            format!(
                "Your work in the healthcare industry is truly impressive. At \
                 {org}, we are focused on streamlining diagnostics and improving \
                 patient care pathways.\n\n\
                 I would value the opportunity to connect with an expert like \
                 yourself to discuss the future of healthcare technology."
            )
        } else {
            let sector = display_or(&contact.domain, "your");
            format!(
                "I came across your profile and was interested in your work in \
                 the {sector} sector. At {org}, we build solutions to tackle \
                 challenges across various industries, and I'm always keen to \
                 connect with professionals like yourself.\n\n\
                 I would be delighted to connect and learn more about your \
                 experience."
            )
        };

        format!("{greeting}\n\n{core}{sig}", sig = self.signature())
    }

    fn signature(&self) -> String {
        let mut sig = format!(
            "\n\nBest regards,\n{}\n{}",
            self.sender.from_name, self.sender.organization
        );
        if !self.sender.services_link.is_empty() {
            sig.push('\n');
            sig.push_str(&self.sender.services_link);
        }
        sig
    }
}

fn greeting_for(name: &str) -> String {
    if name.trim().is_empty() {
        "Dear Sir/Madam,".to_string()
    } else {
        format!("Hi {},", name.trim())
    }
}

fn display_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() {
        fallback
    } else {
        value
    }
}

/// Prefix `Re:` unless the subject is already threaded.
fn threaded_subject(original: &str) -> String {
    let trimmed = original.trim();
    if trimmed.to_lowercase().starts_with("re:") {
        trimmed.to_string()
    } else {
        format!("Re: {trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    use crate::contacts::CanonicalKey;

    fn sender() -> SenderProfile {
        SenderProfile {
            from_name: "Aasrith".into(),
            organization: "Morphius AI".into(),
            services_link: "https://example.com/services".into(),
            follow_up_subject: "Following up".into(),
        }
    }

    fn contact(name: &str, domain: &str) -> Contact {
        Contact {
            id: Uuid::new_v4(),
            canonical_key: CanonicalKey::from_stored("c@example.com"),
            display_name: name.into(),
            domain: domain.into(),
            work_emails: vec!["c@example.com".into()],
            personal_emails: vec![],
            phones: vec![],
            source: "test".into(),
            first_seen: Utc::now(),
        }
    }

    #[tokio::test]
    async fn follow_up_uses_domain_template_without_llm() {
        let composer = MessageComposer::template_only(sender());
        let msg = composer.follow_up(&contact("Priya", "edtech")).await;
        assert_eq!(msg.subject, "Following up");
        assert!(msg.body.starts_with("Hi Priya,"));
        assert!(msg.body.contains("EdTech"));
        assert!(msg.body.contains("Morphius AI"));
    }

    #[tokio::test]
    async fn follow_up_without_name_uses_formal_greeting() {
        let composer = MessageComposer::template_only(sender());
        let msg = composer.follow_up(&contact("", "commerce")).await;
        assert!(msg.body.starts_with("Dear Sir/Madam,"));
        assert!(msg.body.contains("e-commerce"));
    }

    #[tokio::test]
    async fn unknown_domain_falls_to_general_template() {
        let composer = MessageComposer::template_only(sender());
        let msg = composer.follow_up(&contact("Sam", "aerospace")).await;
        assert!(msg.body.contains("aerospace sector"));
    }

    #[tokio::test]
    async fn follow_up_falls_back_when_llm_fails() {
        use crate::error::LlmError;
        use crate::llm::CompletionResponse;
        use async_trait::async_trait;

        struct FailingProvider;

        #[async_trait]
        impl LlmProvider for FailingProvider {
            async fn complete(
                &self,
                _request: CompletionRequest,
            ) -> Result<CompletionResponse, LlmError> {
                Err(LlmError::RequestFailed {
                    provider: "test".into(),
                    reason: "boom".into(),
                })
            }

            fn model_name(&self) -> &str {
                "failing"
            }
        }

        let composer = MessageComposer::new(
            Some(Arc::new(FailingProvider)),
            sender(),
            Duration::from_secs(1),
        );
        let msg = composer.follow_up(&contact("Priya", "health")).await;
        assert!(msg.body.contains("healthcare"));
    }

    #[test]
    fn reply_threads_subject_once() {
        let composer = MessageComposer::template_only(sender());
        let first = composer.reply("Hello there", InterestLevel::Neutral);
        assert_eq!(first.subject, "Re: Hello there");
        let second = composer.reply("Re: Hello there", InterestLevel::Neutral);
        assert_eq!(second.subject, "Re: Hello there");
    }

    #[test]
    fn positive_reply_mentions_next_step() {
        let composer = MessageComposer::template_only(sender());
        let msg = composer.reply("Hello", InterestLevel::Positive);
        assert!(msg.body.contains("positive response"));
        assert!(msg.body.contains("Morphius AI"));
    }

    #[test]
    fn neutral_and_negative_replies_point_to_services() {
        let composer = MessageComposer::template_only(sender());
        for interest in [InterestLevel::Neutral, InterestLevel::Negative] {
            let msg = composer.reply("Hello", interest);
            assert!(msg.body.contains("https://example.com/services"));
        }
    }
}
