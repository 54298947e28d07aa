//! Publish Orchestrator
//!
//! The metered `api` channel goes through the monthly write governor and the
//! external publish API; `manual` and `community` drafts are only recorded
//! and confirmed later, once the user pastes back the post link.

use chrono::Duration;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::collaborators::PublishApi;
use crate::config::{PublishConfig, MAX_DUPLICATE_WINDOW_HOURS};
use crate::error::{GateError, Result};
use crate::governor::{MonthKey, MonthlyWriteGovernor};
use crate::metrics;
use crate::publish::{
    extract_post_id, intent_url, normalize_text, post_url, Channel, LedgerEntry, PublishLedger,
};
use crate::timeout::CallTimeout;

/// What the caller gets back for a recorded or published draft
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub entry: LedgerEntry,

    /// Metered writes left this month
    pub remaining_writes: u32,

    /// Composer link prefilled with the draft
    pub intent_url: String,

    /// Link to the live post, once its id is known
    pub post_url: Option<String>,

    /// Where community drafts should be posted
    pub community_url: Option<String>,
}

type InFlightKey = (String, String);

/// Claim on a (user, normalised text) metered publish, released on drop
struct InFlight<'a> {
    posts: &'a DashMap<InFlightKey, ()>,
    key: InFlightKey,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.posts.remove(&self.key);
    }
}

/// Entry point for recording and confirming publishes
pub struct PublishOrchestrator {
    governor: MonthlyWriteGovernor,
    ledger: PublishLedger,
    api: Arc<dyn PublishApi>,
    clock: Arc<dyn Clock>,
    settings: PublishConfig,
    timeout: CallTimeout,
    in_flight: DashMap<InFlightKey, ()>,
}

impl PublishOrchestrator {
    pub fn new(
        governor: MonthlyWriteGovernor,
        ledger: PublishLedger,
        api: Arc<dyn PublishApi>,
        clock: Arc<dyn Clock>,
        settings: PublishConfig,
    ) -> Self {
        let timeout = CallTimeout::from_secs(settings.timeout_secs);
        Self {
            governor,
            ledger,
            api,
            clock,
            settings,
            timeout,
            in_flight: DashMap::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: CallTimeout) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn ledger(&self) -> &PublishLedger {
        &self.ledger
    }

    pub fn governor(&self) -> &MonthlyWriteGovernor {
        &self.governor
    }

    /// Metered writes left in the current month
    pub fn remaining_writes(&self) -> u32 {
        self.governor.remaining(MonthKey::of(self.clock.now()))
    }

    /// Mark the post as in flight; `None` if the same user is already
    /// publishing the same text
    fn claim(&self, user_id: &str, text: &str) -> Option<InFlight<'_>> {
        let key = (user_id.to_string(), normalize_text(text));
        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(InFlight {
                    posts: &self.in_flight,
                    key,
                })
            }
        }
    }

    fn receipt(&self, entry: LedgerEntry, remaining_writes: u32) -> PublishReceipt {
        let community_url = match entry.channel {
            Channel::Community => self.settings.community_url.clone(),
            _ => None,
        };
        PublishReceipt {
            intent_url: intent_url(&entry.text),
            post_url: entry.external_id.as_deref().map(post_url),
            community_url,
            remaining_writes,
            entry,
        }
    }

    /// Record or publish a draft through `channel`
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for an unknown channel, blank text, or api text over
    ///   the length limit
    /// - `DuplicatePost` when the api channel already carried this text
    ///   within the duplicate window
    /// - `WriteCeilingReached` when the month's metered writes are used up
    ///   (no ledger entry is written)
    /// - `PublishFailed` when the publish API errors or times out; the
    ///   attempt is in the ledger as `failed` and no write is charged
    pub async fn publish(&self, user_id: &str, channel: &str, text: &str) -> Result<PublishReceipt> {
        let channel: Channel = channel.parse()?;
        if user_id.trim().is_empty() {
            return Err(GateError::InvalidInput("user id is required".to_string()));
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(GateError::InvalidInput("text must not be empty".to_string()));
        }

        if channel.is_metered() {
            return self.publish_metered(user_id, text).await;
        }

        let entry = self
            .ledger
            .append(user_id, text, channel, None, self.clock.now());
        metrics::LEDGER_APPENDS_TOTAL
            .with_label_values(&[channel.to_string().as_str(), entry.outcome.to_string().as_str()])
            .inc();
        Ok(self.receipt(entry, self.remaining_writes()))
    }

    async fn publish_metered(&self, user_id: &str, text: &str) -> Result<PublishReceipt> {
        let max_chars = self.settings.max_post_chars as usize;
        let length = text.chars().count();
        if length > max_chars {
            return Err(GateError::InvalidInput(format!(
                "text is {} characters, the limit is {}",
                length, max_chars
            )));
        }

        // Held until the attempt is in the ledger
        let window_hours = self.settings.duplicate_window_hours;
        let Some(_claim) = self.claim(user_id, text) else {
            info!("Same post already in flight for {}", user_id);
            return Err(GateError::DuplicatePost { window_hours });
        };

        let now = self.clock.now();
        let window = Duration::hours(window_hours.min(MAX_DUPLICATE_WINDOW_HOURS) as i64);
        if self.ledger.was_recently_published(user_id, text, window, now) {
            info!("Duplicate metered post rejected for {}", user_id);
            return Err(GateError::DuplicatePost { window_hours });
        }

        let month = MonthKey::of(now);
        let decision = self.governor.reserve_write(month);
        let Some(reservation) = decision.into_reservation() else {
            metrics::WRITE_CEILING_DENIALS_TOTAL.inc();
            return Err(GateError::WriteCeilingReached { remaining: 0 });
        };
        debug!("Write slot held for {} in {}", user_id, month);

        let call_started = Instant::now();
        let result = self
            .timeout
            .run("publish API", self.api.publish(text))
            .await;
        let call_secs = call_started.elapsed().as_secs_f64();

        match result {
            Ok(post) => {
                metrics::COLLABORATOR_DURATION_SECONDS
                    .with_label_values(&["publish_api", "ok"])
                    .observe(call_secs);
                let remaining = reservation.commit();
                metrics::WRITES_COMMITTED_TOTAL.inc();

                let entry = self.ledger.append(
                    user_id,
                    text,
                    Channel::Api,
                    Some(post.external_id),
                    self.clock.now(),
                );
                metrics::LEDGER_APPENDS_TOTAL
                    .with_label_values(&["api", "published"])
                    .inc();
                Ok(self.receipt(entry, remaining))
            }
            Err(e) => {
                metrics::COLLABORATOR_DURATION_SECONDS
                    .with_label_values(&["publish_api", "error"])
                    .observe(call_secs);
                reservation.release();

                let reason = format!("{:#}", e);
                warn!("Metered publish failed for {}: {}", user_id, reason);
                let entry =
                    self.ledger
                        .append_failed(user_id, text, Channel::Api, &reason, self.clock.now());
                metrics::LEDGER_APPENDS_TOTAL
                    .with_label_values(&["api", "failed"])
                    .inc();
                Err(GateError::PublishFailed {
                    entry_id: entry.id,
                    reason,
                })
            }
        }
    }

    /// Attach the external post to one of the user's entries
    ///
    /// `post` may be a bare post id or a pasted post link. Entries owned by
    /// another user are reported as not found.
    pub fn confirm(&self, user_id: &str, entry_id: u64, post: &str) -> Result<PublishReceipt> {
        let external_id = extract_post_id(post).ok_or_else(|| {
            GateError::InvalidInput(format!("'{}' is not a post id or post link", post.trim()))
        })?;

        match self.ledger.get(entry_id) {
            Some(entry) if entry.user_id == user_id => {}
            _ => return Err(GateError::NotFound(entry_id)),
        }

        let entry = self
            .ledger
            .confirm(entry_id, &external_id, self.clock.now())?;
        metrics::LEDGER_CONFIRMS_TOTAL.inc();
        Ok(self.receipt(entry, self.remaining_writes()))
    }

    /// A user's entries, newest first
    pub fn history(&self, user_id: &str, limit: Option<usize>) -> Vec<LedgerEntry> {
        self.ledger.entries_for_user(user_id, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::collaborators::{DisabledPublisher, PublishedPost};
    use crate::publish::Outcome;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingApi {
        next: AtomicU64,
    }

    impl CountingApi {
        fn new() -> Self {
            Self {
                next: AtomicU64::new(1000),
            }
        }
    }

    #[async_trait]
    impl PublishApi for CountingApi {
        async fn publish(&self, _text: &str) -> anyhow::Result<PublishedPost> {
            Ok(PublishedPost {
                external_id: self.next.fetch_add(1, Ordering::SeqCst).to_string(),
            })
        }
    }

    fn clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 10, 3, 9, 30, 0).unwrap(),
        ))
    }

    fn orchestrator(api: Arc<dyn PublishApi>, ceiling: u32, clock: Arc<FixedClock>) -> PublishOrchestrator {
        let settings = PublishConfig {
            community_url: Some("https://x.com/i/communities/42".to_string()),
            ..PublishConfig::default()
        };
        PublishOrchestrator::new(
            MonthlyWriteGovernor::new(ceiling),
            PublishLedger::new(),
            api,
            clock,
            settings,
        )
    }

    #[tokio::test]
    async fn test_api_publish_charges_write() {
        let orch = orchestrator(Arc::new(CountingApi::new()), 10, clock());
        let receipt = orch.publish("u1", "api", "shipped it").await.unwrap();

        assert_eq!(receipt.entry.outcome, Outcome::Published);
        assert_eq!(receipt.entry.external_id.as_deref(), Some("1000"));
        assert_eq!(receipt.remaining_writes, 9);
        assert_eq!(
            receipt.post_url.as_deref(),
            Some("https://x.com/i/web/status/1000")
        );
    }

    #[tokio::test]
    async fn test_api_failure_recorded_not_charged() {
        let orch = orchestrator(Arc::new(DisabledPublisher), 10, clock());
        let err = orch.publish("u1", "api", "shipped it").await.unwrap_err();

        let GateError::PublishFailed { entry_id, .. } = err else {
            panic!("unexpected error: {:?}", err);
        };
        let entry = orch.ledger().get(entry_id).unwrap();
        assert_eq!(entry.outcome, Outcome::Failed);
        assert!(entry.external_id.is_none());
        assert_eq!(orch.remaining_writes(), 10);
    }

    #[tokio::test]
    async fn test_manual_publish_recorded() {
        let orch = orchestrator(Arc::new(DisabledPublisher), 10, clock());
        let receipt = orch.publish("u1", "manual", "shipped it").await.unwrap();

        assert_eq!(receipt.entry.outcome, Outcome::Recorded);
        assert!(receipt.post_url.is_none());
        assert!(receipt.intent_url.starts_with("https://twitter.com/intent/tweet?text="));
        assert!(receipt.community_url.is_none());
        assert_eq!(receipt.remaining_writes, 10);
    }

    #[tokio::test]
    async fn test_community_receipt_has_venue() {
        let orch = orchestrator(Arc::new(DisabledPublisher), 10, clock());
        let receipt = orch.publish("u1", "community", "shipped it").await.unwrap();
        assert_eq!(
            receipt.community_url.as_deref(),
            Some("https://x.com/i/communities/42")
        );
    }

    #[tokio::test]
    async fn test_invalid_inputs() {
        let orch = orchestrator(Arc::new(CountingApi::new()), 10, clock());

        let err = orch.publish("u1", "carrier-pigeon", "hi").await.unwrap_err();
        assert!(matches!(err, GateError::InvalidInput(_)));

        let err = orch.publish("u1", "manual", "  ").await.unwrap_err();
        assert!(matches!(err, GateError::InvalidInput(_)));

        let err = orch.publish("u1", "api", &"x".repeat(281)).await.unwrap_err();
        assert!(matches!(err, GateError::InvalidInput(_)));

        // Length limit applies to the metered channel only
        assert!(orch.publish("u1", "manual", &"x".repeat(281)).await.is_ok());
        assert_eq!(orch.ledger().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_within_window() {
        let clock = clock();
        let orch = orchestrator(Arc::new(CountingApi::new()), 10, clock.clone());
        orch.publish("u1", "api", "shipped   it").await.unwrap();

        let err = orch.publish("u1", "api", "shipped it").await.unwrap_err();
        assert_eq!(err, GateError::DuplicatePost { window_hours: 48 });

        // Other users are unaffected
        assert!(orch.publish("u2", "api", "shipped it").await.is_ok());

        clock.advance(Duration::hours(49));
        assert!(orch.publish("u1", "api", "shipped it").await.is_ok());
    }

    #[tokio::test]
    async fn test_claim_released_on_every_exit() {
        let orch = orchestrator(Arc::new(DisabledPublisher), 10, clock());

        let claim = orch.claim("u1", "shipped  it").unwrap();
        assert!(orch.claim("u1", "shipped it").is_none());
        assert!(orch.claim("u2", "shipped it").is_some());
        drop(claim);
        assert!(orch.claim("u1", "shipped it").is_some());

        // A failed publish leaves nothing behind
        assert!(orch.publish("u1", "api", "shipped it").await.is_err());
        assert!(orch.in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_ceiling_reached_writes_no_entry() {
        let orch = orchestrator(Arc::new(CountingApi::new()), 1, clock());
        orch.publish("u1", "api", "first").await.unwrap();

        let err = orch.publish("u1", "api", "second").await.unwrap_err();
        assert_eq!(err, GateError::WriteCeilingReached { remaining: 0 });
        assert_eq!(orch.ledger().len(), 1);

        // Unmetered channels still work
        assert!(orch.publish("u1", "manual", "second").await.is_ok());
    }

    #[tokio::test]
    async fn test_confirm_by_url() {
        let orch = orchestrator(Arc::new(DisabledPublisher), 10, clock());
        let receipt = orch.publish("u1", "manual", "shipped it").await.unwrap();
        let id = receipt.entry.id;

        let confirmed = orch
            .confirm("u1", id, "https://x.com/someone/status/98765?s=20")
            .unwrap();
        assert_eq!(confirmed.entry.outcome, Outcome::Published);
        assert_eq!(confirmed.entry.external_id.as_deref(), Some("98765"));

        // Same id again is a no-op
        assert!(orch.confirm("u1", id, "98765").is_ok());

        let err = orch.confirm("u1", id, "11111").unwrap_err();
        assert!(matches!(err, GateError::AlreadyConfirmed { .. }));
    }

    #[tokio::test]
    async fn test_confirm_checks_owner_and_input() {
        let orch = orchestrator(Arc::new(DisabledPublisher), 10, clock());
        let receipt = orch.publish("u1", "manual", "shipped it").await.unwrap();
        let id = receipt.entry.id;

        assert_eq!(orch.confirm("u2", id, "123").unwrap_err(), GateError::NotFound(id));
        assert_eq!(orch.confirm("u1", 999, "123").unwrap_err(), GateError::NotFound(999));
        assert!(matches!(
            orch.confirm("u1", id, "https://example.com/status/123").unwrap_err(),
            GateError::InvalidInput(_)
        ));
    }
}
