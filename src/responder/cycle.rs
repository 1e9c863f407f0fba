//! Poll-cycle runner — fetches candidates, classifies each in sequence,
//! performs the side effects the decision calls for, and persists state.
//!
//! Sequential processing within a cycle matters: a later message from
//! the same sender must observe the cooldown entry written by an earlier
//! message in that same cycle.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use crate::channels::{Mailbox, ResponseSender};
use crate::error::TransportError;
use crate::responder::engine::classify;
use crate::responder::rules::IgnoreList;
use crate::responder::types::{Decision, InboundMessage};
use crate::state::{ProcessedState, StateStore};

/// Counters for one poll cycle, for logging and tests.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub fetched: usize,
    pub responded: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Owns the dedup state and the two collaborators, and drives poll
/// cycles against them.
pub struct Responder {
    mailbox: Arc<dyn Mailbox>,
    sender: Arc<dyn ResponseSender>,
    store: StateStore,
    state: ProcessedState,
    filters: IgnoreList,
    cooldown: Duration,
    started_at: DateTime<Utc>,
}

impl Responder {
    /// Load persisted state and build a responder. `started_at` is the
    /// process start time — only mail arriving after it is eligible.
    pub async fn new(
        mailbox: Arc<dyn Mailbox>,
        sender: Arc<dyn ResponseSender>,
        store: StateStore,
        filters: IgnoreList,
        cooldown: Duration,
        started_at: DateTime<Utc>,
    ) -> Self {
        let state = store.load().await;
        Self {
            mailbox,
            sender,
            store,
            state,
            filters,
            cooldown,
            started_at,
        }
    }

    /// Run a single poll cycle: fetch unseen mail, classify and act on
    /// each message sequentially, persist state if it changed.
    ///
    /// A transport failure aborts the cycle; a delivery failure aborts
    /// the per-message loop early. Either way partial progress from
    /// earlier messages is preserved and saved, and the loop resumes
    /// after the normal sleep.
    pub async fn poll_once(&mut self) -> CycleReport {
        let mut report = CycleReport::default();

        match self.mailbox.list_unseen_since(self.started_at).await {
            Ok(messages) => {
                report.fetched = messages.len();
                if !messages.is_empty() {
                    debug!("Fetched {} unseen message(s)", messages.len());
                }
                for message in &messages {
                    if !self.handle_message(message, &mut report).await {
                        break;
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Mailbox poll failed, skipping this cycle");
            }
        }

        self.persist().await;

        if report.fetched > 0 {
            info!(
                fetched = report.fetched,
                responded = report.responded,
                skipped = report.skipped,
                failed = report.failed,
                "Poll cycle complete"
            );
        }
        report
    }

    /// Classify one message and apply the decision's side effects.
    /// Returns `false` when the cycle should stop early.
    async fn handle_message(&mut self, message: &InboundMessage, report: &mut CycleReport) -> bool {
        let now = Utc::now();
        let decision = classify(
            message,
            &self.state,
            &self.filters,
            self.started_at,
            now,
            self.cooldown,
        );
        debug!(id = %message.id, decision = decision.label(), "Classified message");

        match decision {
            Decision::SkipAlreadyProcessed => {
                // Handled in a prior cycle or run — nothing to record.
                debug!(id = %message.id, "Already processed");
            }
            Decision::SkipTooOld => {
                info!(
                    id = %message.id,
                    arrived_at = %message.arrived_at,
                    "Skipping message that predates startup"
                );
                self.state.mark_processed(&message.id);
                report.skipped += 1;
            }
            Decision::SkipFilteredSender { pattern } => {
                info!(
                    id = %message.id,
                    sender = %message.sender_address,
                    pattern = %pattern,
                    "Skipping filtered sender"
                );
                self.state.mark_processed(&message.id);
                report.skipped += 1;
            }
            Decision::SkipCooldown { elapsed } => {
                let hours_since_last = elapsed.as_secs_f64() / 3600.0;
                info!(
                    id = %message.id,
                    sender = %message.sender_address,
                    hours_since_last,
                    "Skipping sender still in cooldown"
                );
                self.state.mark_processed(&message.id);
                report.skipped += 1;
            }
            Decision::Respond => {
                info!(
                    id = %message.id,
                    sender = %message.sender_address,
                    subject = %message.subject,
                    "Sending reply"
                );
                match self
                    .sender
                    .send_response(&message.sender_address, &message.subject)
                    .await
                {
                    Ok(()) => {
                        self.state.mark_processed(&message.id);
                        self.state.record_response(&message.sender_address, now);
                        report.responded += 1;
                    }
                    Err(e) => {
                        // Not marked processed — stays eligible for the
                        // next poll. Stop the cycle; the API is likely down.
                        error!(
                            id = %message.id,
                            sender = %message.sender_address,
                            error = %e,
                            "Failed to send reply, will retry next cycle"
                        );
                        report.failed += 1;
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Save state if it changed. A failed save is logged and the state
    /// stays dirty, so the next cycle retries it.
    pub async fn persist(&mut self) {
        if !self.state.is_dirty() {
            return;
        }
        if let Err(e) = self.store.save(&mut self.state, Utc::now()).await {
            error!(error = %e, "Failed to save state, keeping in-memory state for retry");
        }
    }

    /// One-shot initialization: mark every message currently in the
    /// mailbox as processed without sending anything, so the normal loop
    /// never replies to backlog.
    pub async fn mark_all_processed(&mut self) -> Result<usize, TransportError> {
        let ids = self.mailbox.list_all_ids().await?;
        for id in &ids {
            self.state.mark_processed(id);
        }
        self.persist().await;
        Ok(ids.len())
    }

    /// Read access to the in-memory state, mainly for tests.
    pub fn state(&self) -> &ProcessedState {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;

    use crate::error::DeliveryError;

    const COOLDOWN: Duration = Duration::from_secs(24 * 3600);

    struct MockMailbox {
        messages: Mutex<Vec<InboundMessage>>,
        all_ids: Vec<String>,
    }

    impl MockMailbox {
        fn with_messages(messages: Vec<InboundMessage>) -> Self {
            Self {
                messages: Mutex::new(messages),
                all_ids: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl Mailbox for MockMailbox {
        async fn list_unseen_since(
            &self,
            _since: DateTime<Utc>,
        ) -> Result<Vec<InboundMessage>, TransportError> {
            Ok(self.messages.lock().unwrap().clone())
        }

        async fn fetch_raw(&self, _id: &str) -> Result<Vec<u8>, TransportError> {
            Ok(Vec::new())
        }

        async fn list_all_ids(&self) -> Result<Vec<String>, TransportError> {
            Ok(self.all_ids.clone())
        }
    }

    /// Scripted sender: pops the next result off `outcomes` (empty =
    /// always succeed) and records every accepted send.
    #[derive(Default)]
    struct MockSender {
        outcomes: Mutex<Vec<Result<(), DeliveryError>>>,
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ResponseSender for MockSender {
        async fn send_response(
            &self,
            to_address: &str,
            original_subject: &str,
        ) -> Result<(), DeliveryError> {
            let outcome = self.outcomes.lock().unwrap().pop().unwrap_or(Ok(()));
            if outcome.is_ok() {
                self.sent
                    .lock()
                    .unwrap()
                    .push((to_address.to_string(), original_subject.to_string()));
            }
            outcome
        }
    }

    fn make_message(id: &str, address: &str, arrived_at: DateTime<Utc>) -> InboundMessage {
        InboundMessage {
            id: id.into(),
            sender: format!("Client <{address}>"),
            sender_address: address.into(),
            subject: "Inquiry".into(),
            arrived_at,
        }
    }

    async fn make_responder(
        dir: &tempfile::TempDir,
        mailbox: Arc<dyn Mailbox>,
        sender: Arc<MockSender>,
        started_at: DateTime<Utc>,
    ) -> Responder {
        Responder::new(
            mailbox,
            sender,
            StateStore::new(dir.path().join("state.json")),
            IgnoreList::for_mailbox("info@myshop.io"),
            COOLDOWN,
            started_at,
        )
        .await
    }

    #[tokio::test]
    async fn successful_reply_records_id_and_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        let started = Utc::now() - ChronoDuration::minutes(5);
        let msg = make_message("42", "client@example.com", started + ChronoDuration::seconds(1));
        let mailbox = Arc::new(MockMailbox::with_messages(vec![msg]));
        let sender = Arc::new(MockSender::default());

        let mut responder = make_responder(&dir, mailbox, Arc::clone(&sender), started).await;
        let report = responder.poll_once().await;

        assert_eq!(report.responded, 1);
        assert!(responder.state().is_processed("42"));
        let last = responder.state().last_response("client@example.com").unwrap();
        assert!((Utc::now() - last).num_seconds().abs() < 5);
        assert_eq!(
            sender.sent.lock().unwrap().as_slice(),
            &[("client@example.com".to_string(), "Inquiry".to_string())]
        );
    }

    #[tokio::test]
    async fn filtered_sender_marked_without_reply() {
        let dir = tempfile::tempdir().unwrap();
        let started = Utc::now() - ChronoDuration::minutes(5);
        let msg = make_message("43", "no-reply@service.com", Utc::now());
        let mailbox = Arc::new(MockMailbox::with_messages(vec![msg]));
        let sender = Arc::new(MockSender::default());

        let mut responder = make_responder(&dir, mailbox, Arc::clone(&sender), started).await;
        let report = responder.poll_once().await;

        assert_eq!(report.skipped, 1);
        assert!(responder.state().is_processed("43"));
        assert_eq!(responder.state().responded_len(), 0);
        assert!(sender.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_failure_leaves_message_eligible_for_retry() {
        let dir = tempfile::tempdir().unwrap();
        let started = Utc::now() - ChronoDuration::minutes(5);
        let msg = make_message("44", "client@example.com", Utc::now());
        let mailbox = Arc::new(MockMailbox::with_messages(vec![msg]));
        let sender = Arc::new(MockSender {
            outcomes: Mutex::new(vec![Err(DeliveryError::Api {
                status: 500,
                body: "server error".into(),
            })]),
            sent: Mutex::new(Vec::new()),
        });

        let mut responder =
            make_responder(&dir, Arc::clone(&mailbox) as Arc<dyn Mailbox>, Arc::clone(&sender), started)
                .await;

        let report = responder.poll_once().await;
        assert_eq!(report.failed, 1);
        assert!(!responder.state().is_processed("44"));
        assert_eq!(responder.state().responded_len(), 0);

        // Next cycle: the sender recovers and the same message goes out.
        let report = responder.poll_once().await;
        assert_eq!(report.responded, 1);
        assert!(responder.state().is_processed("44"));
    }

    #[tokio::test]
    async fn delivery_failure_aborts_cycle_preserving_partial_progress() {
        let dir = tempfile::tempdir().unwrap();
        let started = Utc::now() - ChronoDuration::minutes(5);
        let first = make_message("45", "alice@example.com", Utc::now());
        let second = make_message("46", "bob@example.com", Utc::now());
        let mailbox = Arc::new(MockMailbox::with_messages(vec![first, second]));
        // First send succeeds, second fails (outcomes pop from the back).
        let sender = Arc::new(MockSender {
            outcomes: Mutex::new(vec![
                Err(DeliveryError::Request("connection refused".into())),
                Ok(()),
            ]),
            sent: Mutex::new(Vec::new()),
        });

        let mut responder = make_responder(&dir, mailbox, Arc::clone(&sender), started).await;
        let report = responder.poll_once().await;

        assert_eq!(report.responded, 1);
        assert_eq!(report.failed, 1);
        assert!(responder.state().is_processed("45"));
        assert!(!responder.state().is_processed("46"));
    }

    #[tokio::test]
    async fn same_cycle_second_message_hits_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        let started = Utc::now() - ChronoDuration::minutes(5);
        let first = make_message("47", "client@example.com", Utc::now());
        let second = make_message("48", "client@example.com", Utc::now());
        let mailbox = Arc::new(MockMailbox::with_messages(vec![first, second]));
        let sender = Arc::new(MockSender::default());

        let mut responder = make_responder(&dir, mailbox, Arc::clone(&sender), started).await;
        let report = responder.poll_once().await;

        // One reply, the second message lands in cooldown but is still marked.
        assert_eq!(report.responded, 1);
        assert_eq!(report.skipped, 1);
        assert!(responder.state().is_processed("47"));
        assert!(responder.state().is_processed("48"));
        assert_eq!(sender.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn already_processed_message_is_not_resent() {
        let dir = tempfile::tempdir().unwrap();
        let started = Utc::now() - ChronoDuration::minutes(5);
        let msg = make_message("49", "client@example.com", Utc::now());
        let mailbox = Arc::new(MockMailbox::with_messages(vec![msg.clone(), msg]));
        let sender = Arc::new(MockSender::default());

        let mut responder = make_responder(&dir, mailbox, Arc::clone(&sender), started).await;
        responder.poll_once().await;
        // Same message still listed as unseen next cycle — dedup holds.
        let report = responder.poll_once().await;

        assert_eq!(report.responded, 0);
        assert_eq!(sender.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn old_message_marked_but_not_replied() {
        let dir = tempfile::tempdir().unwrap();
        let started = Utc::now() - ChronoDuration::minutes(5);
        let msg = make_message("50", "client@example.com", started - ChronoDuration::hours(1));
        let mailbox = Arc::new(MockMailbox::with_messages(vec![msg]));
        let sender = Arc::new(MockSender::default());

        let mut responder = make_responder(&dir, mailbox, Arc::clone(&sender), started).await;
        let report = responder.poll_once().await;

        assert_eq!(report.skipped, 1);
        assert!(responder.state().is_processed("50"));
        assert!(sender.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn init_mode_marks_backlog_without_sending() {
        let dir = tempfile::tempdir().unwrap();
        let mailbox = Arc::new(MockMailbox {
            messages: Mutex::new(Vec::new()),
            all_ids: vec!["1".into(), "2".into(), "3".into()],
        });
        let sender = Arc::new(MockSender::default());

        let mut responder = make_responder(&dir, mailbox, Arc::clone(&sender), Utc::now()).await;
        let count = responder.mark_all_processed().await.unwrap();

        assert_eq!(count, 3);
        for id in ["1", "2", "3"] {
            assert!(responder.state().is_processed(id));
        }
        assert!(sender.sent.lock().unwrap().is_empty());

        // Marks survive a reload.
        let store = StateStore::new(dir.path().join("state.json"));
        assert!(store.load().await.is_processed("2"));
    }

    #[tokio::test]
    async fn transport_failure_skips_cycle_without_state_changes() {
        struct FailingMailbox;

        #[async_trait]
        impl Mailbox for FailingMailbox {
            async fn list_unseen_since(
                &self,
                _since: DateTime<Utc>,
            ) -> Result<Vec<InboundMessage>, TransportError> {
                Err(TransportError::ConnectionClosed)
            }

            async fn fetch_raw(&self, _id: &str) -> Result<Vec<u8>, TransportError> {
                Err(TransportError::ConnectionClosed)
            }

            async fn list_all_ids(&self) -> Result<Vec<String>, TransportError> {
                Err(TransportError::ConnectionClosed)
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let sender = Arc::new(MockSender::default());
        let mut responder =
            make_responder(&dir, Arc::new(FailingMailbox), Arc::clone(&sender), Utc::now()).await;

        let report = responder.poll_once().await;
        assert_eq!(report.fetched, 0);
        assert!(!responder.state().is_dirty());
        assert!(sender.sent.lock().unwrap().is_empty());
    }
}
