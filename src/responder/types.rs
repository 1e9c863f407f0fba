//! Shared types for the eligibility engine.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// An inbound message descriptor, as produced by the mailbox
/// collaborator. Exists only for one decision cycle — never stored.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Opaque id, unique within the mailbox (IMAP UID in string form).
    pub id: String,
    /// Raw decoded From header, e.g. `Alice <alice@example.com>`.
    pub sender: String,
    /// Parsed sender address.
    pub sender_address: String,
    /// Decoded subject; may be empty.
    pub subject: String,
    /// When the message arrived. Messages with an unparseable Date
    /// header carry the fetch time instead (treated as just arrived).
    pub arrived_at: DateTime<Utc>,
}

/// Outcome of classifying one inbound message. Derived per message,
/// never persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Eligible — invoke the send collaborator.
    Respond,
    /// Already handled in a prior cycle or run.
    SkipAlreadyProcessed,
    /// Arrived before the process started.
    SkipTooOld,
    /// Sender matches an ignore pattern.
    SkipFilteredSender {
        /// The pattern that matched.
        pattern: String,
    },
    /// Sender was replied to too recently.
    SkipCooldown {
        /// Time since the last reply to this sender.
        elapsed: Duration,
    },
}

impl Decision {
    /// Short label for log fields.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Respond => "respond",
            Self::SkipAlreadyProcessed => "skip_already_processed",
            Self::SkipTooOld => "skip_too_old",
            Self::SkipFilteredSender { .. } => "skip_filtered_sender",
            Self::SkipCooldown { .. } => "skip_cooldown",
        }
    }
}
