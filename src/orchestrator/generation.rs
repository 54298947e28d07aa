//! Generation Orchestrator
//!
//! reserve quota → pick mode → call the content generator under a timeout →
//! clean the drafts → commit quota. Nothing is charged unless drafts come back.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::collaborators::{ContentGenerator, GenerationRequest};
use crate::config::GenerationConfig;
use crate::error::{GateError, Result};
use crate::metrics;
use crate::modes::{ModeRotator, ModeTag};
use crate::publish::normalize_text;
use crate::quota::{PlanState, QuotaLedger, UsageSnapshot};
use crate::timeout::CallTimeout;

/// Phrases that make a draft read like an advert
pub const PROMO_PHRASES: &[&str] = &[
    "introducing",
    "launching soon",
    "big announcement",
    "sign up now",
    "subscribe",
    "download now",
    "limited time",
    "game-changer",
    "revolutionary",
    "ultimate guide",
];

/// Stock phrasings that make a draft sound like a thread template
pub const BANNED_PHRASES: &[&str] = &[
    "the key is",
    "i'm convinced",
    "in my experience",
    "here's the thing",
    "hot take:",
];

/// One generation request, as resolved by the identity layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub user_id: String,
    pub plan: PlanState,
    pub notes: String,
    pub mood: Option<String>,
    pub angle: Option<String>,

    /// Clamped to the configured bounds; default used when absent
    pub max_options: Option<u32>,
    pub max_chars: Option<u32>,
}

impl GenerateRequest {
    pub fn new(user_id: impl Into<String>, plan: PlanState, notes: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            plan,
            notes: notes.into(),
            mood: None,
            angle: None,
            max_options: None,
            max_chars: None,
        }
    }

    pub fn with_mood(mut self, mood: impl Into<String>) -> Self {
        self.mood = Some(mood.into());
        self
    }

    pub fn with_angle(mut self, angle: impl Into<String>) -> Self {
        self.angle = Some(angle.into());
        self
    }

    pub fn with_limits(mut self, max_options: Option<u32>, max_chars: Option<u32>) -> Self {
        self.max_options = max_options;
        self.max_chars = max_chars;
        self
    }
}

/// Successful generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationOutcome {
    pub drafts: Vec<String>,
    pub mode: ModeTag,
    pub usage: UsageSnapshot,
    pub elapsed_ms: u64,
}

fn is_promotional(draft: &str) -> bool {
    let lower = draft.to_lowercase();
    PROMO_PHRASES.iter().any(|phrase| lower.contains(phrase))
}

fn uses_banned_phrase(draft: &str) -> bool {
    let lower = draft.to_lowercase().replace('\u{2019}', "'");
    BANNED_PHRASES.iter().any(|phrase| lower.contains(phrase))
}

/// Clean raw generator output
///
/// Trims each draft, then drops empties, over-length drafts, promotional
/// or stock-phrased drafts and duplicates (compared whitespace-normalised), keeping at most
/// `max_options` in original order.
pub fn filter_drafts(raw: Vec<String>, max_options: usize, max_chars: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.into_iter()
        .map(|draft| draft.trim().to_string())
        .filter(|draft| !draft.is_empty())
        .filter(|draft| draft.chars().count() <= max_chars)
        .filter(|draft| !is_promotional(draft) && !uses_banned_phrase(draft))
        .filter(|draft| seen.insert(normalize_text(draft)))
        .take(max_options)
        .collect()
}

/// Entry point for draft generation
pub struct GenerationOrchestrator {
    quota: QuotaLedger,
    rotator: ModeRotator,
    generator: Arc<dyn ContentGenerator>,
    clock: Arc<dyn Clock>,
    settings: GenerationConfig,
    timeout: CallTimeout,
}

impl GenerationOrchestrator {
    pub fn new(
        quota: QuotaLedger,
        rotator: ModeRotator,
        generator: Arc<dyn ContentGenerator>,
        clock: Arc<dyn Clock>,
        settings: GenerationConfig,
    ) -> Self {
        let timeout = CallTimeout::from_secs(settings.timeout_secs);
        Self {
            quota,
            rotator,
            generator,
            clock,
            settings,
            timeout,
        }
    }

    /// Override the collaborator timeout from the settings
    pub fn with_timeout(mut self, timeout: CallTimeout) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn quota(&self) -> &QuotaLedger {
        &self.quota
    }

    /// Quota view for display, without reserving
    pub fn usage(&self, user_id: &str, plan: &PlanState) -> UsageSnapshot {
        self.quota.usage_status(user_id, plan, self.clock.now())
    }

    /// Generate drafts for one request
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for blank notes or user id (nothing reserved)
    /// - `QuotaExceeded` when the daily allowance is used up
    /// - `GenerationFailed` when the generator errors, times out or returns
    ///   nothing usable (quota not charged)
    pub async fn generate(&self, request: &GenerateRequest) -> Result<GenerationOutcome> {
        let started = Instant::now();

        if request.user_id.trim().is_empty() {
            return Err(GateError::InvalidInput("user id is required".to_string()));
        }
        if request.notes.trim().is_empty() {
            return Err(GateError::InvalidInput("notes must not be empty".to_string()));
        }

        let now = self.clock.now();
        let decision = self
            .quota
            .check_and_reserve(&request.user_id, &request.plan, now);
        let (used, limit) = (decision.used, decision.limit);
        let Some(reservation) = decision.into_reservation() else {
            metrics::QUOTA_DENIALS_TOTAL.inc();
            return Err(GateError::QuotaExceeded { used, limit });
        };

        let recent = self.quota.recent_modes(&request.user_id, reservation.day());
        let mode = self
            .rotator
            .select_mode(&request.user_id, reservation.day(), &recent);
        debug!("Mode {} selected for {}", mode, request.user_id);

        let max_options = self.settings.max_options_bounds.clamp(
            request
                .max_options
                .unwrap_or(self.settings.default_options),
        );
        let max_chars = self.settings.max_chars_bounds.clamp(
            request
                .max_chars
                .unwrap_or(self.settings.default_max_chars),
        );

        let generation = GenerationRequest {
            notes: request.notes.trim().to_string(),
            mood: request.mood.clone(),
            angle: request.angle.clone(),
            mode: mode.clone(),
            max_options,
            max_chars,
        };

        let call_started = Instant::now();
        let raw = self
            .timeout
            .run("content generator", self.generator.generate(&generation))
            .await;
        let call_secs = call_started.elapsed().as_secs_f64();

        let raw = match raw {
            Ok(raw) => {
                metrics::COLLABORATOR_DURATION_SECONDS
                    .with_label_values(&["generator", "ok"])
                    .observe(call_secs);
                raw
            }
            Err(e) => {
                metrics::COLLABORATOR_DURATION_SECONDS
                    .with_label_values(&["generator", "error"])
                    .observe(call_secs);
                metrics::GENERATIONS_TOTAL
                    .with_label_values(&["failed"])
                    .inc();
                warn!("Generation failed for {}: {:#}", request.user_id, e);
                reservation.release();
                return Err(GateError::GenerationFailed(format!("{:#}", e)));
            }
        };

        let drafts = filter_drafts(raw, max_options as usize, max_chars as usize);
        if drafts.is_empty() {
            metrics::GENERATIONS_TOTAL
                .with_label_values(&["failed"])
                .inc();
            warn!("Generator returned no usable drafts for {}", request.user_id);
            reservation.release();
            return Err(GateError::GenerationFailed(
                "generator returned no usable drafts".to_string(),
            ));
        }

        let usage = reservation.commit(Some(mode.clone()));
        metrics::GENERATIONS_TOTAL.with_label_values(&["ok"]).inc();

        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            "Generated {} drafts for {} in mode {} ({}ms)",
            drafts.len(),
            request.user_id,
            mode,
            elapsed_ms
        );

        Ok(GenerationOutcome {
            drafts,
            mode,
            usage,
            elapsed_ms,
        })
    }
}
