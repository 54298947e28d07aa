//! Monthly Write Governor
//!
//! Caps the system's aggregate writes through the metered publish API per
//! calendar month. Same reserve/commit discipline as the daily quota: a write
//! slot is held before the external call and charged only once it succeeds.

use chrono::{DateTime, Datelike, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default metered writes per calendar month
pub const DEFAULT_MONTHLY_WRITE_CEILING: u32 = 480;

/// Calendar month key (UTC)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
}

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    pub fn of(now: DateTime<Utc>) -> Self {
        Self::new(now.year(), now.month())
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Metered writes recorded for one month
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyWriteCounter {
    pub month: MonthKey,
    pub count: u32,
    pub ceiling: u32,

    /// Writes reserved but not yet committed or released
    #[serde(skip)]
    pub pending: u32,
}

impl MonthlyWriteCounter {
    fn new(month: MonthKey, ceiling: u32) -> Self {
        Self {
            month,
            count: 0,
            ceiling,
            pending: 0,
        }
    }

    /// Slots not yet committed or held
    pub fn remaining(&self) -> u32 {
        self.ceiling.saturating_sub(self.count + self.pending)
    }
}

type Counters = Arc<Mutex<BTreeMap<MonthKey, MonthlyWriteCounter>>>;

/// Outcome of a write-ceiling check
#[derive(Debug)]
pub struct WriteDecision {
    pub allowed: bool,

    /// Slots left this month (0 when denied)
    pub remaining: u32,

    reservation: Option<WriteReservation>,
}

impl WriteDecision {
    pub fn into_reservation(self) -> Option<WriteReservation> {
        self.reservation
    }
}

/// A held write slot awaiting commit
#[derive(Debug)]
#[must_use = "dropping a reservation releases the slot"]
pub struct WriteReservation {
    counters: Counters,
    month: MonthKey,
    settled: bool,
}

impl WriteReservation {
    pub fn month(&self) -> MonthKey {
        self.month
    }

    /// Charge the slot; returns the remaining writes this month
    pub fn commit(mut self) -> u32 {
        self.settled = true;
        let mut counters = self.counters.lock();
        let remaining = match counters.get_mut(&self.month) {
            Some(counter) => {
                counter.pending = counter.pending.saturating_sub(1);
                counter.count += 1;
                info!(
                    "Metered write committed for {}: {}/{}",
                    self.month, counter.count, counter.ceiling
                );
                counter.remaining()
            }
            None => {
                warn!("Write counter for {} vanished before commit", self.month);
                0
            }
        };
        remaining
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
        if let Some(counter) = self.counters.lock().get_mut(&self.month) {
            counter.pending = counter.pending.saturating_sub(1);
        }
        debug!("Write reservation released for {}", self.month);
    }
}

impl Drop for WriteReservation {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// System-wide monthly write cap
#[derive(Debug, Clone)]
pub struct MonthlyWriteGovernor {
    counters: Counters,
    ceiling: u32,
}

impl MonthlyWriteGovernor {
    pub fn new(ceiling: u32) -> Self {
        Self {
            counters: Arc::new(Mutex::new(BTreeMap::new())),
            ceiling,
        }
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    /// Check the ceiling for `month` and hold a write slot if allowed
    pub fn reserve_write(&self, month: MonthKey) -> WriteDecision {
        let mut counters = self.counters.lock();
        let counter = counters
            .entry(month)
            .or_insert_with(|| MonthlyWriteCounter::new(month, self.ceiling));
        counter.ceiling = self.ceiling;

        if counter.count + counter.pending >= counter.ceiling {
            warn!(
                "Monthly write ceiling reached for {} ({}/{})",
                month, counter.count, counter.ceiling
            );
            return WriteDecision {
                allowed: false,
                remaining: 0,
                reservation: None,
            };
        }

        counter.pending += 1;
        let remaining = counter.remaining();
        debug!("Metered write reserved for {} ({} remaining)", month, remaining);

        WriteDecision {
            allowed: true,
            remaining,
            reservation: Some(WriteReservation {
                counters: Arc::clone(&self.counters),
                month,
                settled: false,
            }),
        }
    }

    /// Writes left for `month`: max(0, ceiling - count), less any held slots
    pub fn remaining(&self, month: MonthKey) -> u32 {
        self.counters
            .lock()
            .get(&month)
            .map(|c| self.ceiling.saturating_sub(c.count + c.pending))
            .unwrap_or(self.ceiling)
    }

    /// Committed writes for `month`
    pub fn used(&self, month: MonthKey) -> u32 {
        self.counters.lock().get(&month).map_or(0, |c| c.count)
    }

    /// Copy of every month's counter, for persistence and audit
    pub fn snapshot(&self) -> Vec<MonthlyWriteCounter> {
        self.counters.lock().values().cloned().collect()
    }

    /// Replace all counters with previously persisted ones
    pub fn restore(&self, counters: Vec<MonthlyWriteCounter>) {
        let mut map = self.counters.lock();
        map.clear();
        for mut counter in counters {
            counter.pending = 0;
            map.insert(counter.month, counter);
        }
    }
}

impl Default for MonthlyWriteGovernor {
    fn default() -> Self {
        Self::new(DEFAULT_MONTHLY_WRITE_CEILING)
    }
}
