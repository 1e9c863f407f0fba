//! Sender ignore list — excludes automated senders and the system's own
//! address from receiving replies.
//!
//! Matching is case-insensitive substring: a pattern like `noreply@`
//! hits `noreply@service.com` as well as `team.noreply@service.com`.

use tracing::debug;

/// Address fragments of automated/system senders that never get a reply.
const AUTOMATED_SENDER_PATTERNS: &[&str] = &[
    "noreply@",
    "no-reply@",
    "mailer-daemon@",
    "postmaster@",
    "notification@",
    "notifications@",
    "alert@",
    "alerts@",
];

/// Fixed list of sender patterns excluded from replies.
#[derive(Debug, Clone)]
pub struct IgnoreList {
    patterns: Vec<String>,
}

impl IgnoreList {
    /// Build the ignore list for a mailbox: the automated-sender
    /// fragments plus the mailbox's own address and domain, so the
    /// responder never replies to itself or to its own domain.
    pub fn for_mailbox(own_address: &str) -> Self {
        let mut patterns: Vec<String> = AUTOMATED_SENDER_PATTERNS
            .iter()
            .map(|p| p.to_string())
            .collect();

        let own = own_address.trim().to_lowercase();
        if !own.is_empty() {
            if let Some((_, domain)) = own.rsplit_once('@')
                && !domain.is_empty()
            {
                patterns.push(own.clone());
                patterns.push(domain.to_string());
            } else {
                patterns.push(own);
            }
        }

        Self { patterns }
    }

    /// Build from explicit patterns (lowercased).
    pub fn from_patterns(patterns: impl IntoIterator<Item = String>) -> Self {
        Self {
            patterns: patterns.into_iter().map(|p| p.to_lowercase()).collect(),
        }
    }

    /// The first pattern the sender address matches, if any.
    pub fn matched(&self, sender_address: &str) -> Option<&str> {
        let address = sender_address.to_lowercase();
        let hit = self
            .patterns
            .iter()
            .find(|p| address.contains(p.as_str()))
            .map(String::as_str);
        if let Some(pattern) = hit {
            debug!(sender = %sender_address, pattern, "Sender matches ignore pattern");
        }
        hit
    }
}
