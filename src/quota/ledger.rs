//! Quota Ledger
//!
//! Two-phase daily quota: `check_and_reserve` holds a slot, and the slot is
//! charged only when the returned [`QuotaReservation`] is committed after a
//! successful generation. A reservation dropped without commit (generator
//! error, timeout, cancelled request) gives its slot back.

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info};

use super::plan::{DailyLimit, PlanState, PlanTier, UsageSnapshot};
use super::store::{UsageKey, UsageRecord, UsageStore};
use crate::modes::ModeTag;

/// Default free-tier generations per UTC day
pub const DEFAULT_FREE_DAILY_LIMIT: u32 = 3;

/// Outcome of a quota check
#[derive(Debug)]
pub struct QuotaDecision {
    /// Whether generation may proceed
    pub allowed: bool,

    /// Generations counted against today's limit: the committed count when
    /// allowed, committed plus in-flight when denied
    pub used: u32,

    /// Applicable daily limit
    pub limit: DailyLimit,

    reservation: Option<QuotaReservation>,
}

impl QuotaDecision {
    /// Take the held slot (present only when allowed)
    pub fn into_reservation(self) -> Option<QuotaReservation> {
        self.reservation
    }
}

/// A held quota slot awaiting commit
#[derive(Debug)]
#[must_use = "dropping a reservation releases the slot"]
pub struct QuotaReservation {
    store: UsageStore,
    key: UsageKey,
    limit: DailyLimit,
    settled: bool,
}

impl QuotaReservation {
    pub fn user_id(&self) -> &str {
        &self.key.user_id
    }

    pub fn day(&self) -> NaiveDate {
        self.key.day
    }

    /// Charge the slot: count goes up by exactly one
    pub fn commit(mut self, mode: Option<ModeTag>) -> UsageSnapshot {
        self.settled = true;
        let limit = self.limit;
        let snapshot = self.store.with_record(&self.key, tier_for(limit), |record| {
            record.pending = record.pending.saturating_sub(1);
            record.count += 1;
            if let Some(mode) = mode {
                record.modes.push(mode);
            }
            snapshot_of(record, limit)
        });
        info!(
            "Quota committed for {} on {}: {}/{}",
            self.key.user_id, self.key.day, snapshot.used_today, limit
        );
        snapshot
    }

    /// Give the slot back without charging
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.settled {
            return;
        }
        self.settled = true;
        self.store.with_existing(&self.key, |record| {
            record.pending = record.pending.saturating_sub(1);
        });
        debug!(
            "Quota reservation released for {} on {}",
            self.key.user_id, self.key.day
        );
    }
}

impl Drop for QuotaReservation {
    fn drop(&mut self) {
        self.release_inner();
    }
}

fn tier_for(limit: DailyLimit) -> PlanTier {
    if limit.is_unlimited() {
        PlanTier::Pro
    } else {
        PlanTier::Free
    }
}

fn snapshot_of(record: &UsageRecord, limit: DailyLimit) -> UsageSnapshot {
    let remaining = limit.remaining(record.count);
    UsageSnapshot {
        user_id: record.user_id.clone(),
        day: record.day,
        tier: tier_for(limit),
        used_today: record.count,
        limit,
        remaining,
        can_generate: remaining.map_or(true, |r| r > 0),
    }
}

/// Per-user daily quota gate
#[derive(Debug, Clone)]
pub struct QuotaLedger {
    store: UsageStore,
    free_daily_limit: u32,
}

impl QuotaLedger {
    pub fn new(free_daily_limit: u32) -> Self {
        Self::with_store(UsageStore::new(), free_daily_limit)
    }

    pub fn with_store(store: UsageStore, free_daily_limit: u32) -> Self {
        Self {
            store,
            free_daily_limit,
        }
    }

    pub fn free_daily_limit(&self) -> u32 {
        self.free_daily_limit
    }

    fn limit_for(&self, tier: PlanTier) -> DailyLimit {
        match tier {
            PlanTier::Pro => DailyLimit::Unlimited,
            PlanTier::Free => DailyLimit::Capped(self.free_daily_limit),
        }
    }

    /// Check the user's quota for the UTC day of `now` and hold a slot if allowed
    ///
    /// A denial leaves the committed count untouched. Pro users are never
    /// denied; their usage is still counted for display.
    pub fn check_and_reserve(
        &self,
        user_id: &str,
        plan: &PlanState,
        now: DateTime<Utc>,
    ) -> QuotaDecision {
        let tier = plan.effective_tier(now);
        let limit = self.limit_for(tier);
        let key = UsageKey::new(user_id, now.date_naive());

        let (allowed, used) = self.store.with_record(&key, tier, |record| {
            record.tier = tier;
            let held = record.count + record.pending;
            let allowed = match limit {
                DailyLimit::Unlimited => true,
                DailyLimit::Capped(cap) => held < cap,
            };
            if allowed {
                record.pending += 1;
                (true, record.count)
            } else {
                (false, held)
            }
        });

        if allowed {
            debug!("Quota reserved for {} on {} ({}/{})", user_id, key.day, used, limit);
            QuotaDecision {
                allowed,
                used,
                limit,
                reservation: Some(QuotaReservation {
                    store: self.store.clone(),
                    key,
                    limit,
                    settled: false,
                }),
            }
        } else {
            info!("Quota denied for {} on {} ({}/{})", user_id, key.day, used, limit);
            QuotaDecision {
                allowed,
                used,
                limit,
                reservation: None,
            }
        }
    }

    /// Current quota view without reserving anything
    pub fn usage_status(&self, user_id: &str, plan: &PlanState, now: DateTime<Utc>) -> UsageSnapshot {
        let tier = plan.effective_tier(now);
        let limit = self.limit_for(tier);
        let key = UsageKey::new(user_id, now.date_naive());
        match self.store.get(&key) {
            Some(record) => snapshot_of(&record, limit),
            None => {
                let remaining = limit.remaining(0);
                UsageSnapshot {
                    user_id: user_id.to_string(),
                    day: key.day,
                    tier,
                    used_today: 0,
                    limit,
                    remaining,
                    can_generate: remaining.map_or(true, |r| r > 0),
                }
            }
        }
    }

    /// Modes of today's committed generations, oldest first
    pub fn recent_modes(&self, user_id: &str, day: NaiveDate) -> Vec<ModeTag> {
        self.store
            .get(&UsageKey::new(user_id, day))
            .map(|r| r.modes)
            .unwrap_or_default()
    }

    /// Every usage record kept for a user
    pub fn history(&self, user_id: &str) -> Vec<UsageRecord> {
        self.store.records_for_user(user_id)
    }

    pub fn store(&self) -> &UsageStore {
        &self.store
    }
}

impl Default for QuotaLedger {
    fn default() -> Self {
        Self::new(DEFAULT_FREE_DAILY_LIMIT)
    }
}
