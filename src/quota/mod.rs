//! Daily Generation Quota
//!
//! Per-user, per-UTC-day generation allowance. Free accounts get a capped
//! number of generations per day; pro accounts are unlimited but still
//! counted.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                 Quota Ledger                   │
//! │   check_and_reserve ──► QuotaReservation       │
//! │                           │ commit / drop       │
//! ├───────────────────────────┼───────────────────┤
//! │   Usage Store  (user, day) ─► UsageRecord      │
//! └───────────────────────────────────────────────┘
//! ```

pub mod ledger;
pub mod plan;
pub mod store;

pub use ledger::{QuotaDecision, QuotaLedger, QuotaReservation, DEFAULT_FREE_DAILY_LIMIT};
pub use plan::{DailyLimit, PlanState, PlanTier, UsageSnapshot};
pub use store::{UsageKey, UsageRecord, UsageStore};
