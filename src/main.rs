// Banger Orchestrator - Main Entry Point
//
// Command-line front end for the generation gate and publishing ledger:
// - Draft generation under the daily quota
// - Publishing through api / manual / community channels
// - Ledger confirmation, queries and audit export
//
// State is loaded from and saved back to a JSON file on every invocation,
// under an exclusive lock so concurrent invocations run one after another.

use anyhow::{Context, Result};
use banger_orchestrator::governor::MonthKey;
use banger_orchestrator::{
    metrics, Clock, Config, Gate, GenerateRequest, PlanState, PlanTier, StateLock, StateSnapshot,
    SystemClock,
};
use chrono::{DateTime, Utc};
use clap::{Args as ClapArgs, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, Level};
use tracing_subscriber::EnvFilter;

/// Banger: usage-gated post drafts and publishing ledger
#[derive(Parser, Debug)]
#[command(name = "banger")]
#[command(author = "Banger Contributors")]
#[command(version)]
#[command(about = "Generate build-in-public drafts and track where they were published", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to the state file (overrides configuration)
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Plan state as supplied by the billing collaborator
#[derive(ClapArgs, Debug, Clone)]
struct PlanArgs {
    /// Plan tier (free or pro)
    #[arg(long, default_value = "free")]
    tier: PlanTier,

    /// End of the paid period (RFC 3339)
    #[arg(long)]
    pro_until: Option<DateTime<Utc>>,
}

impl PlanArgs {
    fn plan(&self) -> PlanState {
        PlanState {
            tier: self.tier,
            active_until: self.pro_until,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate drafts from notes
    Generate {
        /// User id
        #[arg(long)]
        user: String,

        #[command(flatten)]
        plan: PlanArgs,

        /// How the day felt
        #[arg(long)]
        mood: Option<String>,

        /// What's next
        #[arg(long)]
        angle: Option<String>,

        /// Number of drafts to ask for
        #[arg(long)]
        options: Option<u32>,

        /// Character limit per draft
        #[arg(long)]
        max_chars: Option<u32>,

        /// Free-text notes
        notes: String,
    },
    /// Publish or record a draft
    Publish {
        #[arg(long)]
        user: String,

        /// api, manual or community
        #[arg(long, default_value = "manual")]
        channel: String,

        /// Draft text
        text: String,
    },
    /// Attach the live post to a ledger entry
    Confirm {
        #[arg(long)]
        user: String,

        /// Ledger entry id
        #[arg(long)]
        entry: u64,

        /// Post id or post link
        post: String,
    },
    /// Show today's quota
    Usage {
        #[arg(long)]
        user: String,

        #[command(flatten)]
        plan: PlanArgs,
    },
    /// List a user's ledger entries, newest first
    Ledger {
        #[arg(long)]
        user: String,

        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print the full ledger as JSON
    Export,
    /// Show metered writes for the current month
    Writes,
    /// Print metrics in Prometheus text format
    Metrics,
}

fn init_tracing(config: &Config, verbose: bool) {
    let level = if verbose {
        Level::DEBUG
    } else {
        config.log_level().unwrap_or(Level::INFO)
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match config.logging.format.to_lowercase().as_str() {
        "json" => builder.json().init(),
        "pretty" => builder.pretty().init(),
        _ => builder.compact().init(),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to encode output")?;
    println!("{}", text);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    init_tracing(&config, args.verbose);
    metrics::init().context("Failed to register metrics")?;

    let state_path = args
        .state
        .clone()
        .unwrap_or_else(|| config.storage.resolved_state_path());
    debug!("Using state file {:?}", state_path);

    let _lock = StateLock::acquire(&state_path)
        .await
        .context("Failed to lock state")?;
    let state = StateSnapshot::load(&state_path).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let gate = Gate::from_config(&config, state, Arc::clone(&clock))?;

    let (result, dirty) = run(&gate, args.command, clock.as_ref()).await;
    if dirty {
        gate.snapshot()
            .save(&state_path)
            .await
            .context("Failed to save state")?;
    }
    result
}

/// Run one command; the flag says whether state may have changed
async fn run(gate: &Gate, command: Commands, clock: &dyn Clock) -> (Result<()>, bool) {
    match command {
        Commands::Generate {
            user,
            plan,
            mood,
            angle,
            options,
            max_chars,
            notes,
        } => {
            let request = GenerateRequest {
                mood,
                angle,
                ..GenerateRequest::new(user, plan.plan(), notes).with_limits(options, max_chars)
            };

            let result = match gate.generation.generate(&request).await {
                Ok(outcome) => print_json(&outcome),
                Err(e) => Err(e.into()),
            };
            (result, true)
        }
        Commands::Publish {
            user,
            channel,
            text,
        } => {
            info!("Publishing for {} via {}", user, channel);
            let result = match gate.publishing.publish(&user, &channel, &text).await {
                Ok(receipt) => print_json(&receipt),
                Err(e) => Err(e.into()),
            };
            (result, true)
        }
        Commands::Confirm { user, entry, post } => {
            let result = match gate.publishing.confirm(&user, entry, &post) {
                Ok(receipt) => print_json(&receipt),
                Err(e) => Err(e.into()),
            };
            (result, true)
        }
        Commands::Usage { user, plan } => {
            (print_json(&gate.generation.usage(&user, &plan.plan())), false)
        }
        Commands::Ledger { user, limit } => {
            (print_json(&gate.publishing.history(&user, limit)), false)
        }
        Commands::Export => {
            let result = gate
                .publishing
                .ledger()
                .export_audit_log()
                .map(|log| println!("{}", log))
                .map_err(anyhow::Error::from);
            (result, false)
        }
        Commands::Writes => {
            let month = MonthKey::of(clock.now());
            let governor = gate.publishing.governor();
            let summary = json!({
                "month": month.to_string(),
                "used": governor.used(month),
                "remaining": governor.remaining(month),
                "ceiling": governor.ceiling(),
            });
            (print_json(&summary), false)
        }
        Commands::Metrics => {
            let (recorded, published, failed) = gate.publishing.ledger().count_by_outcome();
            metrics::record_ledger_counts(recorded, published, failed);
            let result = metrics::gather_metrics().map(|text| print!("{}", text));
            (result, false)
        }
    }
}
