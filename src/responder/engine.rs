//! The eligibility state machine.
//!
//! `classify` is a pure function over its inputs — it never touches the
//! mailbox, the clock, or the environment, and it never fails. All side
//! effects (sending, state mutation) belong to the cycle runner.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::responder::rules::IgnoreList;
use crate::responder::types::{Decision, InboundMessage};
use crate::state::ProcessedState;

/// Decide what to do with one inbound message.
///
/// Checks run in a fixed order; the first hit wins:
/// 1. already in the processed set → [`Decision::SkipAlreadyProcessed`]
/// 2. arrived before `started_at` → [`Decision::SkipTooOld`] — the
///    responder only ever acts on mail that arrived after its own start,
///    so restarts never replay history. Unparseable dates were mapped to
///    the fetch time upstream and therefore pass this check.
/// 3. sender matches an ignore pattern → [`Decision::SkipFilteredSender`]
/// 4. sender replied to within the cooldown window → [`Decision::SkipCooldown`]
/// 5. otherwise → [`Decision::Respond`]
pub fn classify(
    message: &InboundMessage,
    state: &ProcessedState,
    filters: &IgnoreList,
    started_at: DateTime<Utc>,
    now: DateTime<Utc>,
    cooldown: Duration,
) -> Decision {
    if state.is_processed(&message.id) {
        return Decision::SkipAlreadyProcessed;
    }

    if message.arrived_at < started_at {
        return Decision::SkipTooOld;
    }

    if let Some(pattern) = filters.matched(&message.sender_address) {
        return Decision::SkipFilteredSender {
            pattern: pattern.to_string(),
        };
    }

    if let Some(last) = state.last_response(&message.sender_address) {
        let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
        if elapsed < cooldown {
            return Decision::SkipCooldown { elapsed };
        }
    }

    Decision::Respond
}
