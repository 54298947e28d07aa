use async_trait::async_trait;
use banger_orchestrator::collaborators::{PublishApi, PublishedPost};
use banger_orchestrator::config::PublishConfig;
use banger_orchestrator::timeout::CallTimeout;
use banger_orchestrator::{
    Clock, FixedClock, GateError, MonthKey, MonthlyWriteGovernor, Outcome, PublishLedger,
    PublishOrchestrator,
};
use chrono::{TimeZone, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Publish API double: hands out sequential ids, can be switched to fail or stall
struct FakeApi {
    calls: AtomicUsize,
    failing: AtomicBool,
    delay: Duration,
}

impl FakeApi {
    fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            delay,
        })
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PublishApi for FakeApi {
    async fn publish(&self, _text: &str) -> anyhow::Result<PublishedPost> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("HTTP 503 from publish API");
        }
        Ok(PublishedPost {
            external_id: (1_800_000_000_000 + n as u64).to_string(),
        })
    }
}

fn clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2026, 10, 30, 18, 0, 0).unwrap(),
    ))
}

fn orchestrator(api: Arc<FakeApi>, ceiling: u32, clock: Arc<FixedClock>) -> Arc<PublishOrchestrator> {
    Arc::new(PublishOrchestrator::new(
        MonthlyWriteGovernor::new(ceiling),
        PublishLedger::new(),
        api,
        clock,
        PublishConfig::default(),
    ))
}

#[tokio::test]
async fn test_scenario_d_write_ceiling_reached() {
    let api = FakeApi::new();
    let orch = orchestrator(api.clone(), 2, clock());
    orch.publish("u1", "api", "first").await.unwrap();
    orch.publish("u1", "api", "second").await.unwrap();
    assert_eq!(orch.remaining_writes(), 0);

    let err = orch.publish("u1", "api", "third").await.unwrap_err();
    assert_eq!(err, GateError::WriteCeilingReached { remaining: 0 });
    assert_eq!(err.status_code(), 429);

    // No external call, no new entry, nothing charged
    assert_eq!(api.calls(), 2);
    assert_eq!(orch.ledger().len(), 2);
    assert_eq!(orch.governor().used(MonthKey::new(2026, 10)), 2);
}

#[tokio::test]
async fn test_scenario_e_manual_then_confirm() {
    let orch = orchestrator(FakeApi::new(), 10, clock());

    let receipt = orch.publish("u1", "manual", "wrote the docs").await.unwrap();
    assert_eq!(receipt.entry.outcome, Outcome::Recorded);
    assert!(receipt.entry.external_id.is_none());

    let confirmed = orch.confirm("u1", receipt.entry.id, "12345").unwrap();
    assert_eq!(confirmed.entry.outcome, Outcome::Published);
    assert_eq!(confirmed.entry.external_id.as_deref(), Some("12345"));
    assert!(confirmed.entry.confirmed_at.is_some());

    // Manual channel never touches the write governor
    assert_eq!(orch.remaining_writes(), 10);
}

#[tokio::test]
async fn test_confirm_idempotent_and_exclusive() {
    let orch = orchestrator(FakeApi::new(), 10, clock());
    let id = orch
        .publish("u1", "community", "weekly recap")
        .await
        .unwrap()
        .entry
        .id;

    let first = orch.confirm("u1", id, "777").unwrap();
    let second = orch.confirm("u1", id, "https://twitter.com/u1/status/777").unwrap();
    assert_eq!(first.entry, second.entry);

    let err = orch.confirm("u1", id, "778").unwrap_err();
    assert_eq!(
        err,
        GateError::AlreadyConfirmed {
            entry_id: id,
            existing: "777".to_string()
        }
    );
    assert_eq!(err.status_code(), 409);
}

#[tokio::test]
async fn test_failed_publish_retry_is_not_duplicate() {
    let api = FakeApi::new();
    let orch = orchestrator(api.clone(), 5, clock());

    api.set_failing(true);
    let err = orch.publish("u1", "api", "launch day").await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(orch.remaining_writes(), 5);

    api.set_failing(false);
    let receipt = orch.publish("u1", "api", "launch day").await.unwrap();
    assert_eq!(receipt.entry.outcome, Outcome::Published);
    assert_eq!(receipt.remaining_writes, 4);

    let history = orch.history("u1", None);
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].outcome, Outcome::Published);
    assert_eq!(history[1].outcome, Outcome::Failed);
}

#[tokio::test]
async fn test_publish_timeout_recorded_as_failed() {
    let api = FakeApi::with_delay(Duration::from_secs(5));
    let orch = PublishOrchestrator::new(
        MonthlyWriteGovernor::new(3),
        PublishLedger::new(),
        api,
        clock(),
        PublishConfig::default(),
    )
    .with_timeout(CallTimeout::new(Duration::from_millis(20)));

    let err = orch.publish("u1", "api", "slow day").await.unwrap_err();
    let GateError::PublishFailed { entry_id, reason } = err else {
        panic!("unexpected error: {:?}", err);
    };
    assert!(reason.contains("timed out"));
    assert_eq!(orch.ledger().get(entry_id).unwrap().outcome, Outcome::Failed);
    assert_eq!(orch.remaining_writes(), 3);
}

#[tokio::test]
async fn test_ceiling_resets_next_month() {
    let clock = clock();
    let orch = orchestrator(FakeApi::new(), 1, clock.clone());
    orch.publish("u1", "api", "october").await.unwrap();
    assert!(orch.publish("u1", "api", "still october").await.is_err());

    clock.set(Utc.with_ymd_and_hms(2026, 11, 1, 0, 0, 0).unwrap());
    assert_eq!(orch.remaining_writes(), 1);
    let receipt = orch.publish("u1", "api", "november").await.unwrap();
    assert_eq!(receipt.remaining_writes, 0);

    // October retained for audit
    assert_eq!(orch.governor().used(MonthKey::new(2026, 10)), 1);
    assert_eq!(orch.governor().used(MonthKey::of(clock.now())), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_metered_publishes_respect_ceiling() {
    let api = FakeApi::with_delay(Duration::from_millis(10));
    let orch = orchestrator(api.clone(), 5, clock());

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move {
                let user = format!("user-{}", i);
                orch.publish(&user, "api", "same text, different users").await
            })
        })
        .collect();

    let mut published = 0;
    let mut denied = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => published += 1,
            Err(GateError::WriteCeilingReached { remaining: 0 }) => denied += 1,
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }

    assert_eq!(published, 5);
    assert_eq!(denied, 15);
    assert_eq!(api.calls(), 5);
    assert_eq!(orch.governor().used(MonthKey::new(2026, 10)), 5);
    assert_eq!(orch.ledger().count_by_outcome(), (0, 5, 0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_same_post_published_once() {
    let api = FakeApi::with_delay(Duration::from_millis(50));
    let orch = orchestrator(api.clone(), 10, clock());

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.publish("u1", "api", "same text").await })
        })
        .collect();

    let mut published = 0;
    let mut duplicates = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => published += 1,
            Err(GateError::DuplicatePost { .. }) => duplicates += 1,
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }

    assert_eq!(published, 1);
    assert_eq!(duplicates, 1);
    assert_eq!(api.calls(), 1);
    assert_eq!(orch.governor().used(MonthKey::new(2026, 10)), 1);
    assert_eq!(orch.ledger().len(), 1);

    // The claim is gone once the attempt is recorded
    assert!(orch.publish("u1", "api", "different text").await.is_ok());
    assert!(matches!(
        orch.publish("u1", "api", "same  text").await,
        Err(GateError::DuplicatePost { .. })
    ));
}

#[tokio::test]
async fn test_audit_export_lists_every_attempt() {
    let api = FakeApi::new();
    let orch = orchestrator(api.clone(), 5, clock());
    orch.publish("u1", "manual", "a").await.unwrap();
    orch.publish("u2", "api", "b").await.unwrap();
    api.set_failing(true);
    let _ = orch.publish("u3", "api", "c").await;

    let log = orch.ledger().export_audit_log().unwrap();
    let entries: Vec<serde_json::Value> = serde_json::from_str(&log).unwrap();
    let outcomes: Vec<&str> = entries
        .iter()
        .map(|e| e["outcome"].as_str().unwrap())
        .collect();
    assert_eq!(outcomes, vec!["recorded", "published", "failed"]);
}
