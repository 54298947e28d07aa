//! Plan Tiers and Daily Limits
//!
//! Plan state is owned by the billing collaborator; this module only
//! evaluates it at request time.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Account plan classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    /// Capped daily generations
    #[default]
    Free,
    /// Unlimited generations
    Pro,
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanTier::Free => write!(f, "free"),
            PlanTier::Pro => write!(f, "pro"),
        }
    }
}

impl FromStr for PlanTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(PlanTier::Free),
            "pro" => Ok(PlanTier::Pro),
            other => Err(format!("unknown plan tier '{}'", other)),
        }
    }
}

/// Plan state for one user, as presented by the billing collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PlanState {
    /// Tier on record
    pub tier: PlanTier,

    /// End of the paid period (None = no expiry)
    pub active_until: Option<DateTime<Utc>>,
}

impl PlanState {
    /// A free account
    pub fn free() -> Self {
        Self::default()
    }

    /// A pro account with no expiry
    pub fn pro() -> Self {
        Self {
            tier: PlanTier::Pro,
            active_until: None,
        }
    }

    /// A pro account paid up to `until`
    pub fn pro_until(until: DateTime<Utc>) -> Self {
        Self {
            tier: PlanTier::Pro,
            active_until: Some(until),
        }
    }

    /// Tier used for gating at `now`
    ///
    /// A pro tier whose paid period has ended is treated as free.
    pub fn effective_tier(&self, now: DateTime<Utc>) -> PlanTier {
        match (self.tier, self.active_until) {
            (PlanTier::Pro, Some(until)) if until <= now => PlanTier::Free,
            (tier, _) => tier,
        }
    }
}

/// Daily generation allowance reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DailyLimit {
    Capped(u32),
    Unlimited,
}

impl DailyLimit {
    /// Slots left after `used`, or None when unlimited
    pub fn remaining(&self, used: u32) -> Option<u32> {
        match self {
            DailyLimit::Capped(limit) => Some(limit.saturating_sub(used)),
            DailyLimit::Unlimited => None,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, DailyLimit::Unlimited)
    }
}

impl fmt::Display for DailyLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DailyLimit::Capped(limit) => write!(f, "{}", limit),
            DailyLimit::Unlimited => write!(f, "unlimited"),
        }
    }
}

/// Point-in-time view of a user's quota for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub user_id: String,
    pub day: NaiveDate,
    pub tier: PlanTier,
    pub used_today: u32,
    pub limit: DailyLimit,
    /// None when unlimited
    pub remaining: Option<u32>,
    pub can_generate: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 10, h, 0, 0).unwrap()
    }

    #[test]
    fn test_free_stays_free() {
        assert_eq!(PlanState::free().effective_tier(at(12)), PlanTier::Free);
    }

    #[test]
    fn test_pro_without_expiry() {
        assert_eq!(PlanState::pro().effective_tier(at(12)), PlanTier::Pro);
    }

    #[test]
    fn test_expired_pro_is_free() {
        let plan = PlanState::pro_until(at(9));
        assert_eq!(plan.effective_tier(at(8)), PlanTier::Pro);
        assert_eq!(plan.effective_tier(at(9)), PlanTier::Free);
        assert_eq!(plan.effective_tier(at(10)), PlanTier::Free);
    }

    #[test]
    fn test_tier_parse() {
        assert_eq!("PRO".parse::<PlanTier>().unwrap(), PlanTier::Pro);
        assert_eq!(" free ".parse::<PlanTier>().unwrap(), PlanTier::Free);
        assert!("gold".parse::<PlanTier>().is_err());
    }

    #[test]
    fn test_daily_limit_remaining() {
        assert_eq!(DailyLimit::Capped(3).remaining(1), Some(2));
        assert_eq!(DailyLimit::Capped(3).remaining(5), Some(0));
        assert_eq!(DailyLimit::Unlimited.remaining(100), None);
        assert_eq!(DailyLimit::Unlimited.to_string(), "unlimited");
    }
}
