//! Action dispatcher — executes one decided action against the mail
//! transport and appends the resulting event.
//!
//! Before executing, the dispatcher re-derives state from the log and
//! re-runs the decision: a plan made stale by a concurrent sweep (the other
//! sweep already sent, or a reply just landed) is skipped, not executed.
//! Transport failures are recorded as `failed` events and never retried
//! within the same cycle. Only store failures propagate.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::classifier::InterestClassifier;
use crate::compose::MessageComposer;
use crate::config::Policy;
use crate::contacts::Contact;
use crate::error::StoreError;
use crate::events::EventLog;
use crate::events::model::{EventKind, InterestLevel, NewEvent, OutboundPayload, SendStatus};
use crate::mail::MailTransport;
use crate::scheduler::{Action, decide};
use crate::state::derive;
use crate::store::Store;

/// Reason recorded when the follow-up cap unsubscribes a contact.
const CAP_REACHED_REASON: &str = "follow-up cap reached without reply";

/// What actually happened when a planned action was executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Follow-up delivered and recorded.
    FollowUpSent,
    /// Reply delivered and recorded with its interest label.
    ReplySent(InterestLevel),
    /// Unsubscribe entry written (first write).
    Unsubscribed,
    /// Send attempted and failed; a `failed` event was recorded.
    SendFailed,
    /// Nothing executed.
    Skipped(&'static str),
}

/// Executes scheduler decisions.
pub struct Dispatcher {
    store: Arc<dyn Store>,
    events: EventLog,
    classifier: InterestClassifier,
    composer: MessageComposer,
    transport: Option<Arc<dyn MailTransport>>,
    policy: Policy,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        classifier: InterestClassifier,
        composer: MessageComposer,
        transport: Option<Arc<dyn MailTransport>>,
        policy: Policy,
    ) -> Self {
        Self {
            events: EventLog::new(store.clone()),
            store,
            classifier,
            composer,
            transport,
            policy,
        }
    }

    /// Execute a planned action for a contact.
    ///
    /// Re-verifies the plan against freshly derived state first; a changed
    /// decision means another sweep got here before us.
    pub async fn execute(
        &self,
        contact: &Contact,
        planned: &Action,
    ) -> Result<DispatchOutcome, StoreError> {
        let events = self.store.events_for_contact(contact.id).await?;
        let unsubscribed = self.store.is_unsubscribed(&contact.canonical_key).await?;
        let derived = derive(contact.id, &events, unsubscribed);
        let current = decide(&derived, &self.policy, Utc::now());

        if current.label() != planned.label() {
            warn!(
                contact = %contact.id,
                planned = planned.label(),
                current = current.label(),
                "Plan went stale, skipping"
            );
            return Ok(DispatchOutcome::Skipped("stale plan"));
        }

        match current {
            Action::NoOp => Ok(DispatchOutcome::Skipped("nothing to do")),
            Action::Unsubscribe => self.unsubscribe(contact, CAP_REACHED_REASON).await,
            Action::SendFollowUp => {
                if unsubscribed {
                    return Ok(DispatchOutcome::Skipped("unsubscribed"));
                }
                self.send_follow_up(contact).await
            }
            Action::SendReply { inbound } => {
                if unsubscribed {
                    return Ok(DispatchOutcome::Skipped("unsubscribed"));
                }
                self.send_reply(contact, &inbound.subject, &inbound.body, &inbound.inbound_id)
                    .await
            }
        }
    }

    /// Write the unsubscribe entry and, on first write, the matching event.
    /// Duplicate writes are no-ops.
    pub async fn unsubscribe(
        &self,
        contact: &Contact,
        reason: &str,
    ) -> Result<DispatchOutcome, StoreError> {
        let first_write = self
            .store
            .insert_unsubscribe(&contact.canonical_key, reason)
            .await?;
        if !first_write {
            return Ok(DispatchOutcome::Skipped("already unsubscribed"));
        }

        self.events
            .append(NewEvent::now(
                contact.id,
                EventKind::Unsubscribed {
                    reason: reason.to_string(),
                },
            ))
            .await?;
        info!(contact = %contact.id, reason, "Contact unsubscribed");
        Ok(DispatchOutcome::Unsubscribed)
    }

    async fn send_follow_up(&self, contact: &Contact) -> Result<DispatchOutcome, StoreError> {
        let Some(to) = contact.best_email() else {
            warn!(contact = %contact.id, "No email on file, skipping follow-up");
            return Ok(DispatchOutcome::Skipped("no email address"));
        };

        let message = self.composer.follow_up(contact).await;
        let status = self.deliver(&to, &message.subject, &message.body).await;

        self.events
            .append(NewEvent::now(
                contact.id,
                EventKind::FollowUpSent(OutboundPayload {
                    subject: message.subject,
                    body: message.body,
                    status,
                }),
            ))
            .await?;

        match status {
            SendStatus::Success => {
                info!(contact = %contact.id, to = %to, "Follow-up sent");
                Ok(DispatchOutcome::FollowUpSent)
            }
            SendStatus::Failed => Ok(DispatchOutcome::SendFailed),
        }
    }

    async fn send_reply(
        &self,
        contact: &Contact,
        inbound_subject: &str,
        inbound_body: &str,
        inbound_id: &str,
    ) -> Result<DispatchOutcome, StoreError> {
        let interest = self.classifier.classify(inbound_body).await;

        let Some(to) = contact.best_email() else {
            warn!(contact = %contact.id, "No email on file, skipping reply");
            return Ok(DispatchOutcome::Skipped("no email address"));
        };

        let message = self.composer.reply(inbound_subject, interest);
        let status = self.deliver(&to, &message.subject, &message.body).await;

        self.events
            .append(
                NewEvent::now(
                    contact.id,
                    EventKind::Replied {
                        interest,
                        payload: OutboundPayload {
                            subject: message.subject,
                            body: message.body,
                            status,
                        },
                        inbound_id: inbound_id.to_string(),
                    },
                )
                .with_correlation(inbound_id),
            )
            .await?;

        match status {
            SendStatus::Success => {
                info!(
                    contact = %contact.id,
                    to = %to,
                    interest = interest.as_str(),
                    "Reply sent"
                );
                Ok(DispatchOutcome::ReplySent(interest))
            }
            SendStatus::Failed => Ok(DispatchOutcome::SendFailed),
        }
    }

    /// Attempt delivery, mapping any transport failure to a recorded status.
    async fn deliver(&self, to: &str, subject: &str, body: &str) -> SendStatus {
        let Some(ref transport) = self.transport else {
            warn!(to = %to, "No mail transport configured, recording failed send");
            return SendStatus::Failed;
        };

        match transport.send(to, subject, body).await {
            Ok(()) => SendStatus::Success,
            Err(e) => {
                warn!(to = %to, error = %e, "Send failed");
                SendStatus::Failed
            }
        }
    }
}
