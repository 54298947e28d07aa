//! Usage Store
//!
//! Keyed storage for per-user, per-day usage records. Each (user, day) key
//! is mutated under its map entry lock, so a check and the reservation it
//! makes are one atomic step for that key while other keys proceed in
//! parallel.

use chrono::NaiveDate;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::plan::PlanTier;
use crate::modes::ModeTag;

/// Key for one user's usage on one UTC day
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct UsageKey {
    pub user_id: String,
    pub day: NaiveDate,
}

impl UsageKey {
    pub fn new(user_id: &str, day: NaiveDate) -> Self {
        Self {
            user_id: user_id.to_string(),
            day,
        }
    }
}

/// Generation usage for one user on one day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub user_id: String,

    /// UTC calendar day
    pub day: NaiveDate,

    /// Committed generations
    pub count: u32,

    /// Tier in effect at the latest reservation
    pub tier: PlanTier,

    /// Modes of committed generations, oldest first
    #[serde(default)]
    pub modes: Vec<ModeTag>,

    /// Reservations handed out but not yet committed or released
    #[serde(skip)]
    pub pending: u32,
}

impl UsageRecord {
    fn empty(key: &UsageKey, tier: PlanTier) -> Self {
        Self {
            user_id: key.user_id.clone(),
            day: key.day,
            count: 0,
            tier,
            modes: Vec::new(),
            pending: 0,
        }
    }

    pub fn key(&self) -> UsageKey {
        UsageKey::new(&self.user_id, self.day)
    }
}

/// In-memory usage store
#[derive(Debug, Clone, Default)]
pub struct UsageStore {
    records: Arc<DashMap<UsageKey, UsageRecord>>,
}

impl UsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` against the record for `key`, creating it if absent
    ///
    /// The entry stays locked for the duration of `f`.
    pub fn with_record<R>(
        &self,
        key: &UsageKey,
        tier: PlanTier,
        f: impl FnOnce(&mut UsageRecord) -> R,
    ) -> R {
        let mut entry = self
            .records
            .entry(key.clone())
            .or_insert_with(|| UsageRecord::empty(key, tier));
        f(entry.value_mut())
    }

    /// Run `f` against an existing record only
    pub fn with_existing<R>(
        &self,
        key: &UsageKey,
        f: impl FnOnce(&mut UsageRecord) -> R,
    ) -> Option<R> {
        self.records.get_mut(key).map(|mut entry| f(entry.value_mut()))
    }

    /// Get a copy of the record for `key`
    pub fn get(&self, key: &UsageKey) -> Option<UsageRecord> {
        self.records.get(key).map(|r| r.value().clone())
    }

    /// All records for a user, oldest day first
    pub fn records_for_user(&self, user_id: &str) -> Vec<UsageRecord> {
        let mut records: Vec<UsageRecord> = self
            .records
            .iter()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.value().clone())
            .collect();
        records.sort_by_key(|r| r.day);
        records
    }

    /// Copy of every record, for persistence
    pub fn snapshot(&self) -> Vec<UsageRecord> {
        let mut records: Vec<UsageRecord> =
            self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.day.cmp(&b.day).then_with(|| a.user_id.cmp(&b.user_id)));
        records
    }

    /// Replace the store contents with previously persisted records
    pub fn restore(&self, records: Vec<UsageRecord>) {
        self.records.clear();
        for mut record in records {
            record.pending = 0;
            self.records.insert(record.key(), record);
        }
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }
}
