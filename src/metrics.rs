// Prometheus metrics for the generation gate and publishing ledger
//
// Counters:
// - Generations by status (ok, failed)
// - Quota denials
// - Metered writes committed / denied by the monthly ceiling
// - Ledger appends by channel and outcome
// - Ledger confirms
//
// Gauge:
// - Ledger entries held, by outcome
//
// Histogram:
// - Collaborator call latency

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Registry, TextEncoder,
};
use std::sync::{Arc, Once};

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    // Generation metrics
    pub static ref GENERATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("banger_generations_total", "Generation requests by status"),
        &["status"]
    ).expect("Failed to create generations metric");

    pub static ref QUOTA_DENIALS_TOTAL: IntCounter = IntCounter::new(
        "banger_quota_denials_total",
        "Generation requests denied by the daily quota"
    ).expect("Failed to create quota denials metric");

    // Metered write metrics
    pub static ref WRITES_COMMITTED_TOTAL: IntCounter = IntCounter::new(
        "banger_writes_committed_total",
        "Metered writes charged against the monthly ceiling"
    ).expect("Failed to create writes committed metric");

    pub static ref WRITE_CEILING_DENIALS_TOTAL: IntCounter = IntCounter::new(
        "banger_write_ceiling_denials_total",
        "Metered publish requests denied by the monthly ceiling"
    ).expect("Failed to create write ceiling denials metric");

    // Ledger metrics
    pub static ref LEDGER_APPENDS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("banger_ledger_appends_total", "Ledger entries appended"),
        &["channel", "outcome"]
    ).expect("Failed to create ledger appends metric");

    pub static ref LEDGER_CONFIRMS_TOTAL: IntCounter = IntCounter::new(
        "banger_ledger_confirms_total",
        "Ledger entries confirmed with an external post id"
    ).expect("Failed to create ledger confirms metric");

    pub static ref LEDGER_ENTRIES: IntGaugeVec = IntGaugeVec::new(
        prometheus::Opts::new("banger_ledger_entries", "Ledger entries held, by outcome"),
        &["outcome"]
    ).expect("Failed to create ledger entries metric");

    // Collaborator latency
    pub static ref COLLABORATOR_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "banger_collaborator_duration_seconds",
            "Duration of content generator and publish API calls"
        ),
        &["collaborator", "status"]
    ).expect("Failed to create collaborator duration metric");
}

static INIT: Once = Once::new();

fn register_all() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(GENERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(QUOTA_DENIALS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WRITES_COMMITTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WRITE_CEILING_DENIALS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(LEDGER_APPENDS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(LEDGER_CONFIRMS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(LEDGER_ENTRIES.clone()))?;
    REGISTRY.register(Box::new(COLLABORATOR_DURATION_SECONDS.clone()))?;
    Ok(())
}

/// Register every metric with [`REGISTRY`]
///
/// Safe to call more than once; only the first call registers.
pub fn init() -> prometheus::Result<()> {
    let mut result = Ok(());
    INIT.call_once(|| result = register_all());
    result
}

/// Refresh the ledger gauge from (recorded, published, failed) counts
pub fn record_ledger_counts(recorded: usize, published: usize, failed: usize) {
    for (outcome, count) in [
        ("recorded", recorded),
        ("published", published),
        ("failed", failed),
    ] {
        LEDGER_ENTRIES
            .with_label_values(&[outcome])
            .set(count as i64);
    }
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}
