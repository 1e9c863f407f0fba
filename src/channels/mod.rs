//! Collaborator seams for message I/O — mailbox retrieval and response
//! delivery. Pure I/O; eligibility logic lives in `responder`.

pub mod imap;
pub mod resend;

pub use imap::ImapMailbox;
pub use resend::ResendClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{DeliveryError, TransportError};
use crate::responder::types::InboundMessage;

/// Mail-retrieval collaborator.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Unseen messages the server dates on or after `since`, already
    /// decoded into descriptors.
    async fn list_unseen_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<InboundMessage>, TransportError>;

    /// Raw RFC822 bytes of a single message.
    async fn fetch_raw(&self, id: &str) -> Result<Vec<u8>, TransportError>;

    /// Ids of every message currently in the mailbox. Used by the
    /// one-shot initialization mode to pre-mark backlog as processed.
    async fn list_all_ids(&self) -> Result<Vec<String>, TransportError>;
}

/// Response-sending collaborator.
#[async_trait]
pub trait ResponseSender: Send + Sync {
    /// Send the canned reply to `to_address`. `Ok(())` means the
    /// delivery API accepted the message.
    async fn send_response(
        &self,
        to_address: &str,
        original_subject: &str,
    ) -> Result<(), DeliveryError>;
}
