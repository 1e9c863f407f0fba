//! Error types for the autoresponder.

use std::path::PathBuf;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("State error: {0}")]
    State(#[from] StateError),
}

/// Configuration-related errors. Fatal at startup — the process exits
/// before entering the poll loop.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("HTML template not found: {0}")]
    TemplateMissing(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mailbox transport errors (IMAP connect/search/fetch). Recoverable:
/// the current cycle aborts early and the loop resumes after the sleep.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to connect to {host}: {reason}")]
    Connect { host: String, reason: String },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("IMAP authentication failed: {0}")]
    Auth(String),

    #[error("IMAP command {command} failed: {reason}")]
    Command { command: String, reason: String },

    #[error("IMAP connection closed unexpectedly")]
    ConnectionClosed,

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Send collaborator errors (delivery API). Recoverable per message:
/// the message stays eligible and is retried on the next poll.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Delivery request failed: {0}")]
    Request(String),

    #[error("Delivery API returned {status}: {body}")]
    Api { status: u16, body: String },
}

/// Persistent state errors. Corrupt state on load degrades to empty
/// state; save failures retain the in-memory state for retry.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for the autoresponder.
pub type Result<T> = std::result::Result<T, Error>;
