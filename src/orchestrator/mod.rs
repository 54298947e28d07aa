//! Orchestrators
//!
//! Request entry points that compose the quota ledger, mode rotator, write
//! governor and publish ledger with the external collaborators.
//!
//! # Architecture
//!
//! ```text
//! generate:  QuotaLedger ─► ModeRotator ─► ContentGenerator ─► commit
//! publish:   MonthlyWriteGovernor (api only) ─► PublishApi ─► PublishLedger
//! ```

pub mod generation;
pub mod publishing;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::collaborators::{
    ContentGenerator, DisabledPublisher, HttpGenerator, HttpPublisher, PublishApi,
    TemplateGenerator,
};
use crate::config::Config;
use crate::governor::MonthlyWriteGovernor;
use crate::modes::ModeRotator;
use crate::publish::PublishLedger;
use crate::quota::QuotaLedger;
use crate::state::StateSnapshot;

pub use generation::{
    filter_drafts, GenerateRequest, GenerationOrchestrator, GenerationOutcome, BANNED_PHRASES,
    PROMO_PHRASES,
};
pub use publishing::{PublishOrchestrator, PublishReceipt};

/// Both orchestrators wired to one set of stores
pub struct Gate {
    pub generation: GenerationOrchestrator,
    pub publishing: PublishOrchestrator,
}

impl Gate {
    /// Build the gate from configuration, seeded with persisted state
    ///
    /// Remote collaborators are used when their endpoints are configured;
    /// otherwise drafts come from the offline template generator and the
    /// metered channel is unavailable.
    pub fn from_config(config: &Config, state: StateSnapshot, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        let quota = QuotaLedger::new(config.quota.free_daily_limit);
        let governor = MonthlyWriteGovernor::new(config.writes.monthly_write_ceiling);
        let ledger = PublishLedger::new();
        state.restore_into(quota.store(), &governor, &ledger);

        let rotator = ModeRotator::new(config.modes.tags()).context("Mode set must not be empty")?;

        let generator: Arc<dyn ContentGenerator> = match &config.generation.endpoint {
            Some(url) => Arc::new(
                HttpGenerator::new(url, Duration::from_secs(config.generation.timeout_secs))
                    .context("Failed to create content generator client")?,
            ),
            None => Arc::new(TemplateGenerator::new()),
        };

        let api: Arc<dyn PublishApi> = match &config.publish.endpoint {
            Some(url) => Arc::new(
                HttpPublisher::new(
                    url,
                    config.publish.bearer_token.clone(),
                    Duration::from_secs(config.publish.timeout_secs),
                )
                .context("Failed to create publish API client")?,
            ),
            None => Arc::new(DisabledPublisher),
        };

        Ok(Self {
            generation: GenerationOrchestrator::new(
                quota,
                rotator,
                generator,
                Arc::clone(&clock),
                config.generation.clone(),
            ),
            publishing: PublishOrchestrator::new(
                governor,
                ledger,
                api,
                clock,
                config.publish.clone(),
            ),
        })
    }

    /// Current contents of every store, ready to persist
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot::capture(
            self.generation.quota().store(),
            self.publishing.governor(),
            self.publishing.ledger(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::{Bounds, GenerationConfig};
    use crate::quota::PlanState;

    #[tokio::test]
    async fn test_gate_from_default_config() {
        let gate = Gate::from_config(&Config::default(), StateSnapshot::default(), Arc::new(SystemClock))
            .unwrap();

        let outcome = gate
            .generation
            .generate(&GenerateRequest::new("u1", PlanState::free(), "fixed auth, added stripe"))
            .await
            .unwrap();
        assert_eq!(outcome.drafts.len(), 3);

        // No publish endpoint configured
        let err = gate.publishing.publish("u1", "api", "hello").await.unwrap_err();
        assert!(err.is_retryable());

        let snapshot = gate.snapshot();
        assert_eq!(snapshot.usage.len(), 1);
        assert_eq!(snapshot.ledger.len(), 1);
    }

    #[test]
    fn test_gate_rejects_invalid_config() {
        let mut config = Config::default();
        config.generation.max_options_bounds = Bounds(5, 1);

        let err = Gate::from_config(&config, StateSnapshot::default(), Arc::new(SystemClock))
            .err()
            .unwrap();
        assert!(format!("{:#}", err).contains("max_options_bounds"));
    }

    #[tokio::test]
    async fn test_inverted_bounds_do_not_panic_generation() {
        let settings = GenerationConfig {
            max_options_bounds: Bounds(5, 1),
            ..GenerationConfig::default()
        };
        let orch = GenerationOrchestrator::new(
            QuotaLedger::default(),
            ModeRotator::default(),
            Arc::new(TemplateGenerator::new()),
            Arc::new(SystemClock),
            settings,
        );

        let outcome = orch
            .generate(&GenerateRequest::new("u1", PlanState::free(), "shipped it"))
            .await
            .unwrap();
        assert_eq!(outcome.drafts.len(), 1);
    }

    #[test]
    fn test_gate_restores_state() {
        let gate = Gate::from_config(&Config::default(), StateSnapshot::default(), Arc::new(SystemClock))
            .unwrap();
        let first = gate.snapshot();

        let again = Gate::from_config(&Config::default(), first.clone(), Arc::new(SystemClock)).unwrap();
        assert_eq!(again.snapshot(), first);
    }
}
