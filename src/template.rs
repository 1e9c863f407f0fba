//! Canned reply content — HTML body loaded from disk, plaintext fallback
//! built in.

use std::path::Path;

use tokio::fs;

use crate::error::ConfigError;

/// Plaintext fallback body sent alongside the HTML part for clients that
/// don't render HTML.
const TEXT_FALLBACK: &str = "Thank you for reaching out!\n\n\
Your message has been received and will be handled within the next few hours.\n\n\
This is an automated confirmation — no need to reply.\n";

/// The canned reply: HTML plus plaintext fallback.
#[derive(Debug, Clone)]
pub struct ResponseTemplate {
    pub html: String,
    pub text: String,
}

impl ResponseTemplate {
    /// Load the HTML template from disk. A missing template is a fatal
    /// configuration error — checked at startup, before the poll loop.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::TemplateMissing(path.to_path_buf()));
        }
        let html = fs::read_to_string(path).await?;
        Ok(Self {
            html,
            text: TEXT_FALLBACK.to_string(),
        })
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            html: "<html><body>Thanks!</body></html>".into(),
            text: TEXT_FALLBACK.into(),
        }
    }
}
