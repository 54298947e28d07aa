//! Banger Orchestrator Library
//!
//! Usage-gated draft generation and multi-channel publishing ledger: a
//! per-user daily quota with two-phase reserve/commit, deterministic mode
//! rotation, a system-wide monthly ceiling on metered writes, and an
//! append-only ledger of every publish attempt.

pub mod clock;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod governor;
pub mod metrics;
pub mod modes;
pub mod orchestrator;
pub mod publish;
pub mod quota;
pub mod state;
pub mod timeout;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::Config;
pub use error::{GateError, Result};
pub use governor::{MonthKey, MonthlyWriteGovernor, WriteDecision, WriteReservation};
pub use modes::{ModeRotator, ModeTag};
pub use orchestrator::{
    Gate, GenerateRequest, GenerationOrchestrator, GenerationOutcome, PublishOrchestrator,
    PublishReceipt,
};
pub use publish::{Channel, LedgerEntry, Outcome, PublishLedger};
pub use quota::{DailyLimit, PlanState, PlanTier, QuotaDecision, QuotaLedger, UsageSnapshot};
pub use state::{StateLock, StateSnapshot};
