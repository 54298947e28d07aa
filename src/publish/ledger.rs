//! Publish Ledger
//!
//! Append-only record of every publish attempt. Entries are immutable once
//! written, except for one transition: attaching the external post id to an
//! entry that has none yet (`confirm`).

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{GateError, Result};

/// Publishing path for a draft
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Direct post through the metered write API
    Api,
    /// User posts it themselves from the composer
    Manual,
    /// User posts it to a shared community venue
    Community,
}

impl Channel {
    /// Whether this channel counts against the monthly write ceiling
    pub fn is_metered(&self) -> bool {
        matches!(self, Channel::Api)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Api => write!(f, "api"),
            Channel::Manual => write!(f, "manual"),
            Channel::Community => write!(f, "community"),
        }
    }
}

impl FromStr for Channel {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "api" => Ok(Channel::Api),
            "manual" => Ok(Channel::Manual),
            "community" => Ok(Channel::Community),
            other => Err(GateError::InvalidInput(format!(
                "channel must be 'api', 'manual', or 'community', got '{}'",
                other
            ))),
        }
    }
}

/// Outcome of a publish attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Logged, external post not yet known
    Recorded,
    /// External post id known
    Published,
    /// External publish call failed
    Failed,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Recorded => write!(f, "recorded"),
            Outcome::Published => write!(f, "published"),
            Outcome::Failed => write!(f, "failed"),
        }
    }
}

/// A single publish attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Monotonically increasing id
    pub id: u64,

    pub user_id: String,

    /// Draft text as submitted
    pub text: String,

    pub channel: Channel,

    /// External post id, once known
    pub external_id: Option<String>,

    pub created_at: DateTime<Utc>,

    pub outcome: Outcome,

    /// When the external id was attached after the fact
    #[serde(default)]
    pub confirmed_at: Option<DateTime<Utc>>,

    /// Collaborator error for failed attempts
    #[serde(default)]
    pub failure: Option<String>,
}

/// Collapse runs of whitespace so trivially different copies compare equal
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Append-only publish ledger with a per-user index
#[derive(Debug, Clone)]
pub struct PublishLedger {
    entries: Arc<DashMap<u64, LedgerEntry>>,
    by_user: Arc<DashMap<String, Vec<u64>>>,
    next_id: Arc<AtomicU64>,
}

impl PublishLedger {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            by_user: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    fn insert(&self, entry: LedgerEntry) -> LedgerEntry {
        self.by_user
            .entry(entry.user_id.clone())
            .or_default()
            .push(entry.id);
        self.entries.insert(entry.id, entry.clone());
        info!(
            "Ledger entry {} appended for {} via {} ({})",
            entry.id, entry.user_id, entry.channel, entry.outcome
        );
        entry
    }

    /// Append a publish attempt
    ///
    /// Outcome is `published` when the external id is already known,
    /// `recorded` otherwise. Appends are never gated here.
    pub fn append(
        &self,
        user_id: &str,
        text: &str,
        channel: Channel,
        external_id: Option<String>,
        now: DateTime<Utc>,
    ) -> LedgerEntry {
        let outcome = if external_id.is_some() {
            Outcome::Published
        } else {
            Outcome::Recorded
        };
        self.insert(LedgerEntry {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            user_id: user_id.to_string(),
            text: text.to_string(),
            channel,
            external_id,
            created_at: now,
            outcome,
            confirmed_at: None,
            failure: None,
        })
    }

    /// Append an attempt whose external publish call failed
    pub fn append_failed(
        &self,
        user_id: &str,
        text: &str,
        channel: Channel,
        reason: &str,
        now: DateTime<Utc>,
    ) -> LedgerEntry {
        self.insert(LedgerEntry {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            user_id: user_id.to_string(),
            text: text.to_string(),
            channel,
            external_id: None,
            created_at: now,
            outcome: Outcome::Failed,
            confirmed_at: None,
            failure: Some(reason.to_string()),
        })
    }

    /// Attach the external post id to an entry that has none
    ///
    /// Confirming again with the same id is a no-op; a different id is
    /// rejected with `AlreadyConfirmed`.
    pub fn confirm(
        &self,
        entry_id: u64,
        external_id: &str,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry> {
        let mut entry = self
            .entries
            .get_mut(&entry_id)
            .ok_or(GateError::NotFound(entry_id))?;

        match entry.external_id.as_deref() {
            Some(existing) if existing == external_id => {
                debug!("Ledger entry {} already confirmed as {}", entry_id, existing);
                Ok(entry.clone())
            }
            Some(existing) => Err(GateError::AlreadyConfirmed {
                entry_id,
                existing: existing.to_string(),
            }),
            None => {
                entry.external_id = Some(external_id.to_string());
                entry.outcome = Outcome::Published;
                entry.confirmed_at = Some(now);
                info!("Ledger entry {} confirmed as {}", entry_id, external_id);
                Ok(entry.clone())
            }
        }
    }

    pub fn get(&self, entry_id: u64) -> Option<LedgerEntry> {
        self.entries.get(&entry_id).map(|e| e.value().clone())
    }

    /// A user's entries, newest first
    pub fn entries_for_user(&self, user_id: &str, limit: Option<usize>) -> Vec<LedgerEntry> {
        let ids = self
            .by_user
            .get(user_id)
            .map(|ids| ids.value().clone())
            .unwrap_or_default();

        let mut entries: Vec<LedgerEntry> = ids.iter().filter_map(|id| self.get(*id)).collect();
        entries.sort_by(|a, b| b.id.cmp(&a.id));
        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        entries
    }

    /// Whether the user already published the same text within `window`
    ///
    /// Failed attempts do not count.
    pub fn was_recently_published(
        &self,
        user_id: &str,
        text: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        let norm = normalize_text(text);
        let cutoff = now - window;
        self.entries_for_user(user_id, None).iter().any(|e| {
            e.outcome != Outcome::Failed && e.created_at >= cutoff && normalize_text(&e.text) == norm
        })
    }

    /// Count entries by outcome: (recorded, published, failed)
    pub fn count_by_outcome(&self) -> (usize, usize, usize) {
        let mut counts = (0, 0, 0);
        for entry in self.entries.iter() {
            match entry.outcome {
                Outcome::Recorded => counts.0 += 1,
                Outcome::Published => counts.1 += 1,
                Outcome::Failed => counts.2 += 1,
            }
        }
        counts
    }

    /// All entries in id order
    pub fn snapshot(&self) -> Vec<LedgerEntry> {
        let mut entries: Vec<LedgerEntry> =
            self.entries.iter().map(|e| e.value().clone()).collect();
        entries.sort_by_key(|e| e.id);
        entries
    }

    /// Replace the ledger with previously persisted entries
    pub fn restore(&self, entries: Vec<LedgerEntry>) {
        self.entries.clear();
        self.by_user.clear();
        let next = entries.iter().map(|e| e.id).max().unwrap_or(0) + 1;
        for entry in entries {
            self.by_user
                .entry(entry.user_id.clone())
                .or_default()
                .push(entry.id);
            self.entries.insert(entry.id, entry);
        }
        self.next_id.store(next, Ordering::SeqCst);
    }

    /// Export the ledger as pretty JSON for auditing
    pub fn export_audit_log(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.snapshot())?)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for PublishLedger {
    fn default() -> Self {
        Self::new()
    }
}
