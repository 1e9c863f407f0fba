//! IMAP mailbox retrieval — raw IMAP over rustls.
//!
//! Protocol code is blocking and runs under `spawn_blocking`; every call
//! opens a fresh session (connect → login → select → work → logout), so
//! no connection state is carried between poll cycles.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mail_parser::MessageParser;
use secrecy::ExposeSecret;

use crate::channels::Mailbox;
use crate::config::MailboxConfig;
use crate::error::TransportError;
use crate::responder::types::InboundMessage;

/// Socket read timeout.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// IMAP date format for `SEARCH SINCE` (e.g. `02-Feb-2026`).
const IMAP_DATE_FORMAT: &str = "%d-%b-%Y";

/// IMAP mailbox collaborator.
pub struct ImapMailbox {
    config: MailboxConfig,
}

impl ImapMailbox {
    pub fn new(config: MailboxConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Mailbox for ImapMailbox {
    async fn list_unseen_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<InboundMessage>, TransportError> {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || fetch_unseen_blocking(&config, since))
            .await
            .map_err(|e| TransportError::Task(e.to_string()))?
    }

    async fn fetch_raw(&self, id: &str) -> Result<Vec<u8>, TransportError> {
        let config = self.config.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let mut session = ImapSession::open(&config)?;
            let raw = session.uid_fetch_raw(&id);
            session.logout();
            raw
        })
        .await
        .map_err(|e| TransportError::Task(e.to_string()))?
    }

    async fn list_all_ids(&self) -> Result<Vec<String>, TransportError> {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || {
            let mut session = ImapSession::open(&config)?;
            let ids = session.uid_search("ALL");
            session.logout();
            ids
        })
        .await
        .map_err(|e| TransportError::Task(e.to_string()))?
    }
}

/// One poll: search unseen mail dated on or after `since`, fetch and
/// decode each hit within the same session.
fn fetch_unseen_blocking(
    config: &MailboxConfig,
    since: DateTime<Utc>,
) -> Result<Vec<InboundMessage>, TransportError> {
    let mut session = ImapSession::open(config)?;

    let criteria = format!("UNSEEN SINCE {}", since.format(IMAP_DATE_FORMAT));
    let uids = session.uid_search(&criteria)?;

    let mut messages = Vec::with_capacity(uids.len());
    for uid in uids {
        let raw = session.uid_fetch_raw(&uid)?;
        messages.push(parse_inbound(uid, &raw, Utc::now()));
    }

    session.logout();
    Ok(messages)
}

/// Decode a fetched RFC822 message into an [`InboundMessage`].
///
/// A missing or unparseable Date header yields `fetched_at` — such
/// messages are treated as having just arrived rather than dropped.
pub(crate) fn parse_inbound(
    id: String,
    raw: &[u8],
    fetched_at: DateTime<Utc>,
) -> InboundMessage {
    let Some(parsed) = MessageParser::default().parse(raw) else {
        return InboundMessage {
            id,
            sender: "unknown".into(),
            sender_address: "unknown".into(),
            subject: String::new(),
            arrived_at: fetched_at,
        };
    };

    let from = parsed.from().and_then(|a| a.first());
    let sender_address = from
        .and_then(|a| a.address())
        .map(str::to_string)
        .unwrap_or_else(|| "unknown".into());
    let sender = match from.and_then(|a| a.name()) {
        Some(name) => format!("{name} <{sender_address}>"),
        None => sender_address.clone(),
    };
    let subject = parsed.subject().unwrap_or_default().to_string();
    let arrived_at = parsed
        .date()
        .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
        .unwrap_or(fetched_at);

    InboundMessage {
        id,
        sender,
        sender_address,
        subject,
        arrived_at,
    }
}

// ── Blocking session ────────────────────────────────────────────────

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// A logged-in IMAP session with INBOX selected.
struct ImapSession {
    stream: TlsStream,
    next_tag: u32,
}

impl ImapSession {
    /// Connect, authenticate, and select INBOX.
    fn open(config: &MailboxConfig) -> Result<Self, TransportError> {
        let tcp = TcpStream::connect((config.imap_host.as_str(), config.imap_port)).map_err(
            |e| TransportError::Connect {
                host: config.imap_host.clone(),
                reason: e.to_string(),
            },
        )?;
        tcp.set_read_timeout(Some(READ_TIMEOUT))?;

        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth(),
        );
        let server_name = rustls_pki_types::ServerName::try_from(config.imap_host.clone())
            .map_err(|e| TransportError::Tls(e.to_string()))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| TransportError::Tls(e.to_string()))?;

        let mut session = Self {
            stream: rustls::StreamOwned::new(conn, tcp),
            next_tag: 1,
        };

        // Server greeting
        session.read_line()?;

        let login = format!(
            "LOGIN \"{}\" \"{}\"",
            config.address,
            config.password.expose_secret()
        );
        let resp = session.command(&login)?;
        if !tagged_ok(&resp) {
            return Err(TransportError::Auth(
                resp.last().cloned().unwrap_or_default().trim().to_string(),
            ));
        }

        let resp = session.command("SELECT \"INBOX\"")?;
        if !tagged_ok(&resp) {
            return Err(command_failed("SELECT", &resp));
        }

        Ok(session)
    }

    /// Run `UID SEARCH <criteria>` and collect the returned uids.
    fn uid_search(&mut self, criteria: &str) -> Result<Vec<String>, TransportError> {
        let resp = self.command(&format!("UID SEARCH {criteria}"))?;
        if !tagged_ok(&resp) {
            return Err(command_failed("UID SEARCH", &resp));
        }
        Ok(parse_search_response(&resp))
    }

    /// Fetch one message's full RFC822 body. Uses RFC822 (not
    /// BODY.PEEK) so the fetch marks the message \Seen, keeping it out
    /// of subsequent UNSEEN searches.
    fn uid_fetch_raw(&mut self, uid: &str) -> Result<Vec<u8>, TransportError> {
        let tag = self.send(&format!("UID FETCH {uid} (RFC822)"))?;

        let mut body: Option<Vec<u8>> = None;
        loop {
            let line = self.read_line()?;
            if body.is_none()
                && let Some(size) = parse_literal_size(&line)
            {
                body = Some(self.read_exact(size)?);
                continue;
            }
            if line.starts_with(&tag) {
                if !line.contains(" OK") {
                    return Err(command_failed("UID FETCH", std::slice::from_ref(&line)));
                }
                break;
            }
        }

        body.ok_or_else(|| TransportError::Command {
            command: "UID FETCH".into(),
            reason: format!("no body returned for uid {uid}"),
        })
    }

    /// Best-effort logout; the session is gone either way.
    fn logout(mut self) {
        let _ = self.command("LOGOUT");
    }

    /// Send a command and collect response lines up to the tagged one.
    fn command(&mut self, cmd: &str) -> Result<Vec<String>, TransportError> {
        let tag = self.send(cmd)?;
        let mut lines = Vec::new();
        loop {
            let line = self.read_line()?;
            let done = line.starts_with(&tag);
            lines.push(line);
            if done {
                return Ok(lines);
            }
        }
    }

    /// Write a tagged command line, returning the tag.
    fn send(&mut self, cmd: &str) -> Result<String, TransportError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;
        self.stream
            .write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        self.stream.flush()?;
        Ok(tag)
    }

    fn read_line(&mut self) -> Result<String, TransportError> {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match self.stream.read(&mut byte) {
                Ok(0) => return Err(TransportError::ConnectionClosed),
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(String::from_utf8_lossy(&buf).into_owned());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn read_exact(&mut self, size: usize) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; size];
        self.stream.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// Whether the tagged completion line reports OK.
fn tagged_ok(lines: &[String]) -> bool {
    lines.last().is_some_and(|l| l.contains(" OK"))
}

fn command_failed(command: &str, lines: &[String]) -> TransportError {
    TransportError::Command {
        command: command.into(),
        reason: lines.last().cloned().unwrap_or_default().trim().to_string(),
    }
}

/// Collect uids from `* SEARCH ...` response lines.
fn parse_search_response(lines: &[String]) -> Vec<String> {
    let mut uids = Vec::new();
    for line in lines {
        if let Some(rest) = line.strip_prefix("* SEARCH") {
            uids.extend(rest.split_whitespace().map(str::to_string));
        }
    }
    uids
}

/// Size of a trailing IMAP literal marker, e.g. `... {1234}`.
fn parse_literal_size(line: &str) -> Option<usize> {
    let trimmed = line.trim_end();
    let open = trimmed.rfind('{')?;
    trimmed.strip_suffix('}')?[open + 1..].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW_MESSAGE: &[u8] = b"From: Alice <alice@example.com>\r\n\
To: info@example.com\r\n\
Subject: Hello there\r\n\
Date: Mon, 2 Feb 2026 10:00:00 +0000\r\n\
Message-ID: <abc@example.com>\r\n\
\r\n\
Just saying hi.\r\n";

    #[test]
    fn parse_inbound_decodes_headers() {
        let fetched_at = Utc::now();
        let msg = parse_inbound("17".into(), RAW_MESSAGE, fetched_at);
        assert_eq!(msg.id, "17");
        assert_eq!(msg.sender, "Alice <alice@example.com>");
        assert_eq!(msg.sender_address, "alice@example.com");
        assert_eq!(msg.subject, "Hello there");
        assert!(msg.arrived_at.to_rfc3339().starts_with("2026-02-02T10:00:00"));
    }

    #[test]
    fn parse_inbound_missing_date_falls_back_to_fetch_time() {
        let raw = b"From: bob@example.com\r\nSubject: No date\r\n\r\nBody\r\n";
        let fetched_at = Utc::now();
        let msg = parse_inbound("18".into(), raw, fetched_at);
        // Fail-open: treated as just arrived, not skipped as old
        assert_eq!(msg.arrived_at, fetched_at);
    }

    #[test]
    fn parse_inbound_bare_address_sender() {
        let msg = parse_inbound(
            "19".into(),
            b"From: bob@example.com\r\nSubject: Hi\r\n\r\nBody\r\n",
            Utc::now(),
        );
        assert_eq!(msg.sender, "bob@example.com");
        assert_eq!(msg.sender_address, "bob@example.com");
    }

    #[test]
    fn parse_inbound_unparseable_message() {
        let fetched_at = Utc::now();
        let msg = parse_inbound("20".into(), b"", fetched_at);
        assert_eq!(msg.sender_address, "unknown");
        assert_eq!(msg.subject, "");
        assert_eq!(msg.arrived_at, fetched_at);
    }

    #[test]
    fn search_response_collects_uids() {
        let lines = vec![
            "* SEARCH 4 7 19\r\n".to_string(),
            "A2 OK SEARCH completed\r\n".to_string(),
        ];
        assert_eq!(parse_search_response(&lines), vec!["4", "7", "19"]);
    }

    #[test]
    fn search_response_empty_result() {
        let lines = vec![
            "* SEARCH\r\n".to_string(),
            "A2 OK SEARCH completed\r\n".to_string(),
        ];
        assert!(parse_search_response(&lines).is_empty());
    }

    #[test]
    fn literal_size_parsed_from_fetch_line() {
        assert_eq!(
            parse_literal_size("* 1 FETCH (UID 4 RFC822 {3210}\r\n"),
            Some(3210)
        );
        assert_eq!(parse_literal_size("A3 OK FETCH completed\r\n"), None);
        assert_eq!(parse_literal_size("* 1 FETCH (FLAGS (\\Seen))\r\n"), None);
    }

    #[test]
    fn imap_date_format_matches_search_syntax() {
        let date = DateTime::parse_from_rfc3339("2026-02-02T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(date.format(IMAP_DATE_FORMAT).to_string(), "02-Feb-2026");
    }
}
