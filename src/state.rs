//! Persistent dedup state — processed message ids and per-sender reply
//! history, stored as a JSON document that survives restarts.
//!
//! The file is replaced atomically on save (temp file + rename), so a
//! crash mid-write never corrupts the previous state. A corrupt or
//! missing file degrades to empty state rather than aborting.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::StateError;

/// Maximum number of processed message ids retained.
pub const MAX_PROCESSED_IDS: usize = 1000;

/// Reply-history entries older than this are purged on every save.
pub const RESPONDED_RETENTION_SECS: i64 = 7 * 24 * 3600;

// ── Processed set ───────────────────────────────────────────────────

/// Bounded insertion-ordered set of message ids: a ring buffer for
/// order plus a hash set for O(1) membership. Oldest ids are evicted
/// first once capacity is reached.
#[derive(Debug, Clone, Default)]
pub struct ProcessedSet {
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl ProcessedSet {
    pub fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    /// Insert an id, evicting the oldest entries beyond capacity.
    /// Returns `false` if the id was already present.
    pub fn insert(&mut self, id: &str) -> bool {
        if !self.members.insert(id.to_string()) {
            return false;
        }
        self.order.push_back(id.to_string());
        while self.order.len() > MAX_PROCESSED_IDS {
            if let Some(evicted) = self.order.pop_front() {
                self.members.remove(&evicted);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Ids in insertion order, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Rebuild from a persisted id list (oldest first). Oversized legacy
    /// lists are truncated to the most recent entries by eviction.
    fn from_ids(ids: Vec<String>) -> Self {
        let mut set = Self::default();
        for id in ids {
            set.insert(&id);
        }
        set
    }
}

// ── In-memory state ─────────────────────────────────────────────────

/// In-memory dedup state: which messages have been handled and when each
/// sender was last replied to.
#[derive(Debug, Default)]
pub struct ProcessedState {
    processed: ProcessedSet,
    /// Lowercased sender address → last-response Unix timestamp.
    responded_to: HashMap<String, i64>,
    dirty: bool,
}

impl ProcessedState {
    pub fn is_processed(&self, id: &str) -> bool {
        self.processed.contains(id)
    }

    /// Record a message id as handled.
    pub fn mark_processed(&mut self, id: &str) {
        if self.processed.insert(id) {
            self.dirty = true;
        }
    }

    /// When the given sender was last replied to, if within retention.
    pub fn last_response(&self, address: &str) -> Option<DateTime<Utc>> {
        self.responded_to
            .get(&address.to_lowercase())
            .and_then(|ts| DateTime::from_timestamp(*ts, 0))
    }

    /// Record a successful reply to `address` at `at`.
    pub fn record_response(&mut self, address: &str, at: DateTime<Utc>) {
        self.responded_to
            .insert(address.to_lowercase(), at.timestamp());
        self.dirty = true;
    }

    /// Drop reply-history entries older than the retention window.
    pub fn prune_responses(&mut self, now: DateTime<Utc>) {
        let cutoff = now.timestamp() - RESPONDED_RETENTION_SECS;
        let before = self.responded_to.len();
        self.responded_to.retain(|_, ts| *ts > cutoff);
        if self.responded_to.len() != before {
            self.dirty = true;
        }
    }

    /// Whether the state has changed since it was last saved (or loaded).
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn processed_len(&self) -> usize {
        self.processed.len()
    }

    pub fn responded_len(&self) -> usize {
        self.responded_to.len()
    }
}

// ── Wire document ───────────────────────────────────────────────────

/// On-disk JSON shape. All fields default so documents written by newer
/// versions (with extra fields) still parse.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StateDocument {
    #[serde(default)]
    processed: Vec<String>,
    #[serde(default)]
    responded_to: HashMap<String, i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated: Option<String>,
}

// ── Store ───────────────────────────────────────────────────────────

/// Loads and saves [`ProcessedState`] at a fixed path.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load persisted state. A missing file yields empty state; an
    /// unreadable or invalid file is logged and also yields empty state.
    pub async fn load(&self) -> ProcessedState {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No state file yet, starting empty");
                return ProcessedState::default();
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to read state file, starting with empty state"
                );
                return ProcessedState::default();
            }
        };

        match serde_json::from_str::<StateDocument>(&raw) {
            Ok(doc) => {
                let state = ProcessedState {
                    processed: ProcessedSet::from_ids(doc.processed),
                    responded_to: doc.responded_to,
                    dirty: false,
                };
                debug!(
                    processed = state.processed_len(),
                    responded = state.responded_len(),
                    "Loaded state"
                );
                state
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "State file corrupt, starting with empty state"
                );
                ProcessedState::default()
            }
        }
    }

    /// Prune stale reply history, then atomically replace the state file.
    /// The dirty flag is cleared only on success, so a failed save is
    /// retried after the next cycle.
    pub async fn save(
        &self,
        state: &mut ProcessedState,
        now: DateTime<Utc>,
    ) -> Result<(), StateError> {
        state.prune_responses(now);

        let doc = StateDocument {
            processed: state.processed.iter().map(str::to_string).collect(),
            responded_to: state.responded_to.clone(),
            updated: Some(now.to_rfc3339()),
        };
        let json = serde_json::to_string(&doc)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }

        // Temp file in the same directory so the rename stays atomic.
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &self.path).await?;

        state.dirty = false;
        Ok(())
    }
}
