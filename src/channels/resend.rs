//! Outbound delivery via the Resend HTTP API.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tracing::info;

use crate::channels::ResponseSender;
use crate::config::DeliveryConfig;
use crate::error::DeliveryError;
use crate::template::ResponseTemplate;

/// Resend email-send endpoint.
const RESEND_API_URL: &str = "https://api.resend.com/emails";

/// Reply subject used when the original message had none.
const DEFAULT_REPLY_SUBJECT: &str = "Your message has been received";

/// Sends the canned reply through the Resend API.
pub struct ResendClient {
    api_key: SecretString,
    /// From header value, `Name <address>` or bare address.
    from: String,
    template: ResponseTemplate,
    client: reqwest::Client,
}

impl ResendClient {
    pub fn new(
        config: &DeliveryConfig,
        mailbox_address: &str,
        template: ResponseTemplate,
    ) -> Self {
        let from = match &config.from_name {
            Some(name) => format!("{name} <{mailbox_address}>"),
            None => mailbox_address.to_string(),
        };
        Self {
            api_key: config.api_key.clone(),
            from,
            template,
            client: reqwest::Client::new(),
        }
    }
}

/// Subject for the reply: `Re: <original>`, or the default when the
/// original subject is empty.
pub fn reply_subject(original: &str) -> String {
    let trimmed = original.trim();
    if trimmed.is_empty() {
        DEFAULT_REPLY_SUBJECT.to_string()
    } else {
        format!("Re: {trimmed}")
    }
}

#[async_trait]
impl ResponseSender for ResendClient {
    async fn send_response(
        &self,
        to_address: &str,
        original_subject: &str,
    ) -> Result<(), DeliveryError> {
        let body = json!({
            "from": self.from,
            "to": [to_address],
            "subject": reply_subject(original_subject),
            "html": self.template.html,
            "text": self.template.text,
        });

        let resp = self
            .client
            .post(RESEND_API_URL)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| DeliveryError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(DeliveryError::Api { status, body });
        }

        let id = resp
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|v| v.get("id").and_then(|i| i.as_str()).map(str::to_string))
            .unwrap_or_else(|| "unknown".into());
        info!(to = %to_address, id = %id, "Reply sent");
        Ok(())
    }
}
