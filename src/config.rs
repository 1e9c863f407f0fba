//! Configuration — built once from environment variables at startup and
//! passed by reference; core logic never reads the environment itself.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default poll interval in seconds.
const DEFAULT_CHECK_INTERVAL_SECS: u64 = 60;

/// Default per-sender cooldown in hours.
const DEFAULT_COOLDOWN_HOURS: u64 = 24;

/// Default HTML template location.
const DEFAULT_TEMPLATE_PATH: &str = "./templates/welcome-email.html";

/// Default persistent state file location.
const DEFAULT_STATE_PATH: &str = "./data/processed.json";

/// Mailbox (IMAP) connection settings.
#[derive(Debug, Clone)]
pub struct MailboxConfig {
    /// The mailbox address replies are sent on behalf of.
    pub address: String,
    pub imap_host: String,
    pub imap_port: u16,
    /// IMAP app password.
    pub password: SecretString,
}

/// Delivery API (Resend) settings.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub api_key: SecretString,
    /// Optional display name for the From header.
    pub from_name: Option<String>,
}

/// Full runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub mailbox: MailboxConfig,
    pub delivery: DeliveryConfig,
    /// How long to sleep between poll cycles.
    pub poll_interval: Duration,
    /// Minimum time between two replies to the same sender.
    pub cooldown: Duration,
    pub template_path: PathBuf,
    pub state_path: PathBuf,
}

impl Config {
    /// Build config from environment variables.
    ///
    /// Missing credentials are fatal; optional knobs fall back to their
    /// defaults when unset or unparseable.
    pub fn from_env() -> Result<Self, ConfigError> {
        let address = require("MAILBOX_ADDRESS")?;
        let password = SecretString::from(require("MAILBOX_PASSWORD")?);
        let api_key = SecretString::from(require("RESEND_API_KEY")?);

        let imap_host = std::env::var("IMAP_HOST")
            .unwrap_or_else(|_| default_imap_host(&address));

        let imap_port: u16 = std::env::var("IMAP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(993);

        let from_name = std::env::var("FROM_NAME")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let poll_interval_secs: u64 = std::env::var("CHECK_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CHECK_INTERVAL_SECS);

        let cooldown_hours: u64 = std::env::var("RESPONSE_COOLDOWN_HOURS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_COOLDOWN_HOURS);

        let template_path = std::env::var("TEMPLATE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_TEMPLATE_PATH));

        let state_path = std::env::var("STATE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_STATE_PATH));

        Ok(Self {
            mailbox: MailboxConfig {
                address,
                imap_host,
                imap_port,
                password,
            },
            delivery: DeliveryConfig { api_key, from_name },
            poll_interval: Duration::from_secs(poll_interval_secs),
            cooldown: Duration::from_secs(cooldown_hours * 3600),
            template_path,
            state_path,
        })
    }
}

/// Read a required environment variable.
fn require(name: &str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

/// Derive the IMAP host from the mailbox address domain
/// (`info@example.com` → `imap.example.com`).
pub fn default_imap_host(address: &str) -> String {
    match address.rsplit_once('@') {
        Some((_, domain)) if !domain.is_empty() => format!("imap.{domain}"),
        _ => "localhost".to_string(),
    }
}
