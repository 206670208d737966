//! Periodic sweep — one full pass over inbound mail and all contacts.
//!
//! Phase one ingests unread inbound mail, resolving senders to known
//! contacts and appending `received` events. Phase two runs derive → decide
//! → execute for every contact on a bounded worker pool. Transport and
//! classification failures are isolated per contact; a store failure aborts
//! the remainder of the sweep after in-flight work completes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::config::Policy;
use crate::contacts::Contact;
use crate::error::StoreError;
use crate::events::model::{EventKind, InboundPayload, NewEvent};
use crate::mail::InboundMailbox;
use crate::scheduler::{Action, decide};
use crate::state::derive;
use crate::store::Store;

/// Counters reported at the end of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub contacts_scanned: usize,
    pub inbound_ingested: usize,
    /// Inbound messages from senders with no matching contact.
    pub inbound_unknown: usize,
    pub replies_processed: usize,
    pub follow_ups_sent: usize,
    pub unsubscribes_added: usize,
    pub send_failures: usize,
}

/// Orchestrates sweeps over the contact base.
pub struct SweepEngine {
    store: Arc<dyn Store>,
    dispatcher: Arc<Dispatcher>,
    mailbox: Option<Arc<dyn InboundMailbox>>,
    policy: Policy,
    max_concurrency: usize,
    cancel: Arc<AtomicBool>,
}

impl SweepEngine {
    pub fn new(
        store: Arc<dyn Store>,
        dispatcher: Dispatcher,
        mailbox: Option<Arc<dyn InboundMailbox>>,
        policy: Policy,
        max_concurrency: usize,
    ) -> Self {
        Self {
            store,
            dispatcher: Arc::new(dispatcher),
            mailbox,
            policy,
            max_concurrency: max_concurrency.max(1),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag checked between contacts. Setting it stops the sweep after
    /// in-flight work completes.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Run one full sweep.
    pub async fn run(&self) -> Result<SweepReport, StoreError> {
        let mut report = SweepReport::default();

        self.ingest_inbound(&mut report).await?;
        self.process_contacts(&mut report).await?;

        info!(
            contacts = report.contacts_scanned,
            inbound = report.inbound_ingested,
            replies = report.replies_processed,
            follow_ups = report.follow_ups_sent,
            unsubscribes = report.unsubscribes_added,
            failures = report.send_failures,
            "Sweep complete"
        );
        Ok(report)
    }

    /// Pull unread inbound mail and append `received` events for senders we
    /// know. Unknown senders are logged and skipped; a fetch failure skips
    /// ingestion for this sweep without aborting it.
    async fn ingest_inbound(&self, report: &mut SweepReport) -> Result<(), StoreError> {
        let Some(ref mailbox) = self.mailbox else {
            return Ok(());
        };

        let inbound = match mailbox.fetch_unread().await {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(error = %e, "Inbound fetch failed, skipping ingestion this sweep");
                return Ok(());
            }
        };

        for email in inbound {
            if self.cancel.load(Ordering::Relaxed) {
                break;
            }
            match self.store.contact_by_email(&email.from).await? {
                Some(contact) => {
                    self.store
                        .append_event(&NewEvent::at(
                            contact.id,
                            email.received_at,
                            EventKind::Received(InboundPayload {
                                subject: email.subject,
                                body: email.body,
                                inbound_id: email.inbound_id,
                            }),
                        ))
                        .await?;
                    report.inbound_ingested += 1;
                }
                None => {
                    debug!(from = %email.from, "Inbound from unknown sender, skipping");
                    report.inbound_unknown += 1;
                }
            }
        }
        Ok(())
    }

    /// Derive, decide, and execute for every contact on a bounded pool.
    async fn process_contacts(&self, report: &mut SweepReport) -> Result<(), StoreError> {
        let contacts = self.store.all_contacts().await?;
        report.contacts_scanned = contacts.len();

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks: JoinSet<Result<DispatchOutcome, StoreError>> = JoinSet::new();
        let mut first_error: Option<StoreError> = None;

        for contact in contacts {
            if self.cancel.load(Ordering::Relaxed) || first_error.is_some() {
                break;
            }

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| StoreError::Connection(format!("worker pool closed: {e}")))?;
            let store = self.store.clone();
            let dispatcher = self.dispatcher.clone();
            let policy = self.policy.clone();

            tasks.spawn(async move {
                let _permit = permit;
                process_one(store, dispatcher, policy, contact).await
            });

            // Drain completed tasks as we go so a store failure stops
            // admission promptly.
            while let Some(result) = tasks.try_join_next() {
                tally(result, report, &mut first_error);
            }
        }

        // Let in-flight work finish before reporting.
        while let Some(result) = tasks.join_next().await {
            tally(result, report, &mut first_error);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// One contact's derive → decide → execute cycle.
async fn process_one(
    store: Arc<dyn Store>,
    dispatcher: Arc<Dispatcher>,
    policy: Policy,
    contact: Contact,
) -> Result<DispatchOutcome, StoreError> {
    let events = store.events_for_contact(contact.id).await?;
    let unsubscribed = store.is_unsubscribed(&contact.canonical_key).await?;
    let derived = derive(contact.id, &events, unsubscribed);
    let planned = decide(&derived, &policy, Utc::now());

    if matches!(planned, Action::NoOp) {
        return Ok(DispatchOutcome::Skipped("nothing to do"));
    }

    debug!(contact = %contact.id, action = planned.label(), "Executing planned action");
    dispatcher.execute(&contact, &planned).await
}

fn tally(
    result: Result<Result<DispatchOutcome, StoreError>, tokio::task::JoinError>,
    report: &mut SweepReport,
    first_error: &mut Option<StoreError>,
) {
    match result {
        Ok(Ok(outcome)) => match outcome {
            DispatchOutcome::FollowUpSent => report.follow_ups_sent += 1,
            DispatchOutcome::ReplySent(_) => report.replies_processed += 1,
            DispatchOutcome::Unsubscribed => report.unsubscribes_added += 1,
            DispatchOutcome::SendFailed => report.send_failures += 1,
            DispatchOutcome::Skipped(_) => {}
        },
        Ok(Err(e)) => {
            warn!(error = %e, "Store failure, aborting sweep");
            if first_error.is_none() {
                *first_error = Some(e);
            }
        }
        Err(join_err) => {
            warn!(error = %join_err, "Sweep worker panicked");
            if first_error.is_none() {
                *first_error = Some(StoreError::Query(format!(
                    "sweep worker panicked: {join_err}"
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::sync::Mutex;
    use uuid::Uuid;

    use std::sync::atomic::AtomicUsize;

    use crate::classifier::InterestClassifier;
    use crate::compose::MessageComposer;
    use crate::config::SenderProfile;
    use crate::contacts::CanonicalKey;
    use crate::error::TransportError;
    use crate::events::model::{Event, OutboundPayload, SendStatus};
    use crate::mail::{InboundEmail, MailTransport};
    use crate::store::LibSqlStore;

    struct FakeTransport {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MailTransport for FakeTransport {
        async fn send(&self, to: &str, _subject: &str, _body: &str) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(to.to_string());
            Ok(())
        }
    }

    /// Delegates to an in-memory store but starts failing event reads after
    /// a fixed number of successful ones.
    struct BreakingStore {
        inner: LibSqlStore,
        healthy_reads: usize,
        read_calls: AtomicUsize,
    }

    #[async_trait]
    impl Store for BreakingStore {
        async fn run_migrations(&self) -> Result<(), StoreError> {
            self.inner.run_migrations().await
        }

        async fn insert_contact(&self, contact: &Contact) -> Result<(), StoreError> {
            self.inner.insert_contact(contact).await
        }

        async fn contact_by_key(
            &self,
            key: &CanonicalKey,
        ) -> Result<Option<Contact>, StoreError> {
            self.inner.contact_by_key(key).await
        }

        async fn contact_by_email(&self, email: &str) -> Result<Option<Contact>, StoreError> {
            self.inner.contact_by_email(email).await
        }

        async fn update_contact_channels(&self, contact: &Contact) -> Result<(), StoreError> {
            self.inner.update_contact_channels(contact).await
        }

        async fn all_contacts(&self) -> Result<Vec<Contact>, StoreError> {
            self.inner.all_contacts().await
        }

        async fn append_event(&self, event: &NewEvent) -> Result<i64, StoreError> {
            self.inner.append_event(event).await
        }

        async fn events_for_contact(&self, contact_id: Uuid) -> Result<Vec<Event>, StoreError> {
            if self.read_calls.fetch_add(1, Ordering::SeqCst) >= self.healthy_reads {
                return Err(StoreError::Query("database is locked".into()));
            }
            self.inner.events_for_contact(contact_id).await
        }

        async fn insert_unsubscribe(
            &self,
            key: &CanonicalKey,
            reason: &str,
        ) -> Result<bool, StoreError> {
            self.inner.insert_unsubscribe(key, reason).await
        }

        async fn is_unsubscribed(&self, key: &CanonicalKey) -> Result<bool, StoreError> {
            self.inner.is_unsubscribed(key).await
        }
    }

    struct FakeMailbox {
        inbound: Vec<InboundEmail>,
    }

    #[async_trait]
    impl InboundMailbox for FakeMailbox {
        async fn fetch_unread(&self) -> Result<Vec<InboundEmail>, TransportError> {
            Ok(self.inbound.clone())
        }
    }

    fn contact(email: &str) -> Contact {
        Contact {
            id: Uuid::new_v4(),
            canonical_key: CanonicalKey::from_stored(email),
            display_name: "Test".into(),
            domain: "general".into(),
            work_emails: vec![email.into()],
            personal_emails: vec![],
            phones: vec![],
            source: "test".into(),
            first_seen: Utc::now(),
        }
    }

    fn policy() -> Policy {
        Policy {
            follow_up_delay: ChronoDuration::minutes(2),
            max_follow_ups: 1,
        }
    }

    async fn seed_sent(store: &LibSqlStore, contact_id: Uuid, minutes_ago: i64) {
        store
            .append_event(&NewEvent::at(
                contact_id,
                Utc::now() - ChronoDuration::minutes(minutes_ago),
                EventKind::Sent(OutboundPayload {
                    subject: "Hello".into(),
                    body: "first touch".into(),
                    status: SendStatus::Success,
                }),
            ))
            .await
            .unwrap();
    }

    fn engine(
        store: Arc<LibSqlStore>,
        transport: Arc<dyn MailTransport>,
        mailbox: Option<Arc<dyn InboundMailbox>>,
    ) -> SweepEngine {
        let dispatcher = Dispatcher::new(
            store.clone(),
            InterestClassifier::keyword_only(),
            MessageComposer::template_only(SenderProfile::default()),
            Some(transport),
            policy(),
        );
        SweepEngine::new(store, dispatcher, mailbox, policy(), 4)
    }

    #[tokio::test]
    async fn sweep_sends_due_follow_ups() {
        let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let c = contact("due@example.com");
        store.insert_contact(&c).await.unwrap();
        seed_sent(&store, c.id, 10).await;

        let fresh = contact("fresh@example.com");
        store.insert_contact(&fresh).await.unwrap();
        seed_sent(&store, fresh.id, 1).await;

        let transport = Arc::new(FakeTransport {
            sent: Mutex::new(Vec::new()),
        });
        let report = engine(store, transport.clone(), None).run().await.unwrap();

        assert_eq!(report.contacts_scanned, 2);
        assert_eq!(report.follow_ups_sent, 1);
        assert_eq!(transport.sent.lock().unwrap().as_slice(), ["due@example.com"]);
    }

    #[tokio::test]
    async fn sweep_ingests_and_answers_replies() {
        let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let c = contact("replier@example.com");
        store.insert_contact(&c).await.unwrap();
        seed_sent(&store, c.id, 10).await;

        let mailbox = Arc::new(FakeMailbox {
            inbound: vec![
                InboundEmail {
                    from: "replier@example.com".into(),
                    subject: "Re: Hello".into(),
                    body: "sounds great, let's connect".into(),
                    inbound_id: "m1".into(),
                    received_at: Utc::now(),
                },
                InboundEmail {
                    from: "stranger@example.com".into(),
                    subject: "spam".into(),
                    body: "buy now".into(),
                    inbound_id: "m2".into(),
                    received_at: Utc::now(),
                },
            ],
        });
        let transport = Arc::new(FakeTransport {
            sent: Mutex::new(Vec::new()),
        });
        let report = engine(store.clone(), transport, Some(mailbox))
            .run()
            .await
            .unwrap();

        assert_eq!(report.inbound_ingested, 1);
        assert_eq!(report.inbound_unknown, 1);
        assert_eq!(report.replies_processed, 1);
        // No follow-up once a reply landed.
        assert_eq!(report.follow_ups_sent, 0);

        let events = store.events_for_contact(c.id).await.unwrap();
        assert_eq!(events.last().unwrap().kind.event_type(), "replied_positive");
    }

    #[tokio::test]
    async fn sweep_unsubscribes_at_cap() {
        let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let c = contact("capped@example.com");
        store.insert_contact(&c).await.unwrap();
        seed_sent(&store, c.id, 20).await;
        store
            .append_event(&NewEvent::at(
                c.id,
                Utc::now() - ChronoDuration::minutes(10),
                EventKind::FollowUpSent(OutboundPayload {
                    subject: "Following up".into(),
                    body: "ping".into(),
                    status: SendStatus::Success,
                }),
            ))
            .await
            .unwrap();

        let transport = Arc::new(FakeTransport {
            sent: Mutex::new(Vec::new()),
        });
        let report = engine(store.clone(), transport.clone(), None)
            .run()
            .await
            .unwrap();

        assert_eq!(report.unsubscribes_added, 1);
        assert!(store.is_unsubscribed(&c.canonical_key).await.unwrap());
        assert!(transport.sent.lock().unwrap().is_empty());

        // A second sweep changes nothing.
        let dispatcher = Dispatcher::new(
            store.clone(),
            InterestClassifier::keyword_only(),
            MessageComposer::template_only(SenderProfile::default()),
            None,
            policy(),
        );
        let again = SweepEngine::new(store, dispatcher, None, policy(), 4)
            .run()
            .await
            .unwrap();
        assert_eq!(again.unsubscribes_added, 0);
        assert_eq!(again.follow_ups_sent, 0);
    }

    #[tokio::test]
    async fn store_failure_aborts_remaining_sweep() {
        let inner = LibSqlStore::new_memory().await.unwrap();
        let emails = [
            "one@example.com",
            "two@example.com",
            "three@example.com",
            "four@example.com",
            "five@example.com",
        ];
        for email in emails {
            let c = contact(email);
            inner.insert_contact(&c).await.unwrap();
            seed_sent(&inner, c.id, 10).await;
        }

        // The first contact needs two healthy event reads (plan, then the
        // dispatcher's re-check); every read after that fails.
        let store = Arc::new(BreakingStore {
            inner,
            healthy_reads: 2,
            read_calls: AtomicUsize::new(0),
        });
        let transport = Arc::new(FakeTransport {
            sent: Mutex::new(Vec::new()),
        });
        let dispatcher = Dispatcher::new(
            store.clone(),
            InterestClassifier::keyword_only(),
            MessageComposer::template_only(SenderProfile::default()),
            Some(transport.clone()),
            policy(),
        );
        let engine = SweepEngine::new(store.clone(), dispatcher, None, policy(), 1);

        let err = engine.run().await.unwrap_err();
        assert!(matches!(err, StoreError::Query(_)));

        // The contact already in flight finished its send before the abort.
        assert_eq!(
            transport.sent.lock().unwrap().as_slice(),
            ["one@example.com"]
        );

        // Admission stopped once the failure surfaced: processing all five
        // contacts would take at least six event reads.
        assert!(store.read_calls.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn cancelled_sweep_processes_nothing() {
        let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let c = contact("due@example.com");
        store.insert_contact(&c).await.unwrap();
        seed_sent(&store, c.id, 10).await;

        let transport = Arc::new(FakeTransport {
            sent: Mutex::new(Vec::new()),
        });
        let engine = engine(store, transport.clone(), None);
        engine.cancel_flag().store(true, Ordering::Relaxed);

        let report = engine.run().await.unwrap();
        assert_eq!(report.follow_ups_sent, 0);
        assert!(transport.sent.lock().unwrap().is_empty());
    }
}
