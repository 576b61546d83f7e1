//! Back-office runtime and operator commands
//!
//! `run` hosts the event pump and workers. The other commands act on the
//! same state directory from a separate process. RocksDB allows a single
//! process per directory, so they need `run` to be stopped first.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use backoffice_agents::{check_endpoint, AgentsConfig, HttpLedgerCommitter, LlmBookingAgent};
use clap::{Parser, Subcommand, ValueEnum};
use orchestration::{
    Actor, AgentKind, EventLog, EventType, OrchestrationConfig, Orchestrator, PriorityRules,
    ProposedDecision, Resolution, ReviewEscalator, ReviewFilter, ReviewPriority, SharedAutomation,
    SharedLedger, SharedStateStore, StateStore, TaskFilter, TaskQueue, TaskStatus, Worker,
    WorkerConfig,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Orchestration TOML file (overrides BACKOFFICE_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,

    /// RocksDB state directory (overrides BACKOFFICE_STATE_PATH; needs heavy-state)
    #[arg(long)]
    state_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the orchestrator and workers until Ctrl-C
    Run {
        /// Workers per agent kind (overrides BACKOFFICE_WORKERS)
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Append an event to the log
    Publish {
        tenant: String,
        /// Event type, e.g. invoice_received
        event_type: String,
        /// JSON payload
        #[arg(long, default_value = "{}")]
        payload: String,
    },
    /// Inspect and resolve human review items
    Review {
        #[command(subcommand)]
        action: ReviewCommand,
    },
    /// List tasks
    Tasks {
        #[arg(long)]
        tenant: Option<String>,
        /// pending, in_progress, completed or failed
        #[arg(long)]
        status: Option<String>,
    },
    /// Delete processed events and finished tasks past retention
    Prune {
        /// Overrides retention.keep_finished_days
        #[arg(long)]
        older_than_days: Option<u32>,
    },
}

impl Command {
    /// Whether the command reads or writes the runtime's durable state
    fn needs_shared_state(&self) -> bool {
        !matches!(self, Command::Run { .. })
    }
}

#[derive(Subcommand, Debug)]
enum ReviewCommand {
    /// List review items, highest priority first
    List {
        #[arg(long)]
        tenant: Option<String>,
        /// Include resolved items
        #[arg(long, default_value_t = false)]
        all: bool,
        /// low, medium, high or urgent
        #[arg(long)]
        min_priority: Option<String>,
    },
    /// Approve, reject or correct a review item
    Resolve {
        item_id: String,
        #[arg(long, value_enum)]
        verdict: Verdict,
        /// Reviewer identity recorded in the audit trail
        #[arg(long)]
        reviewer: String,
        #[arg(long)]
        notes: Option<String>,
        /// JSON file with the corrected decision (required for `correct`)
        #[arg(long)]
        decision: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Verdict {
    Approve,
    Reject,
    Correct,
}

/// Everything the subcommands share
struct Runtime {
    store: SharedStateStore,
    config: OrchestrationConfig,
    agents: AgentsConfig,
}

impl Runtime {
    fn open(cli: &Cli, mut agents: AgentsConfig) -> Result<Self> {
        if cli.config.is_some() {
            agents.orchestration_config = cli.config.clone();
        }
        if cli.state_path.is_some() {
            agents.state_path = cli.state_path.clone();
        }
        if cli.command.needs_shared_state() {
            agents
                .require_state_path()
                .context("This command acts on the runtime's state")?;
        }

        let config = OrchestrationConfig::load(agents.orchestration_config.as_deref())
            .context("Failed to load orchestration config")?;
        let store = open_store(agents.state_path.as_deref())?;
        Ok(Self {
            store,
            config,
            agents,
        })
    }

    fn ledger(&self) -> Result<SharedLedger> {
        let ledger = HttpLedgerCommitter::new(self.agents.ledger.clone())
            .context("Failed to build ledger client")?;
        Ok(Arc::new(ledger))
    }

    fn escalator(
        &self,
        events: orchestration::SharedEventLog,
        ledger: SharedLedger,
    ) -> orchestration::SharedEscalator {
        ReviewEscalator::new(Arc::clone(&self.store), events, ledger)
            .with_rules(PriorityRules::from_policy(&self.config.policy))
            .with_commit_timeout(Duration::from_millis(self.config.events.commit_timeout_ms))
            .shared()
    }
}

#[cfg(feature = "heavy-state")]
fn open_store(path: Option<&Path>) -> Result<SharedStateStore> {
    match path {
        Some(path) => {
            let store = StateStore::open(path).with_context(|| {
                format!(
                    "Failed to open state at {} (only one process may hold it; stop `run` first)",
                    path.display()
                )
            })?;
            Ok(store.shared())
        }
        None => {
            warn!("No state path configured; state lives in memory only");
            Ok(StateStore::in_memory().shared())
        }
    }
}

#[cfg(not(feature = "heavy-state"))]
fn open_store(path: Option<&Path>) -> Result<SharedStateStore> {
    if let Some(path) = path {
        bail!(
            "State path {} requires building with the heavy-state feature",
            path.display()
        );
    }
    warn!("Built without heavy-state; state lives in memory only");
    Ok(StateStore::in_memory().shared())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let runtime = Runtime::open(&cli, AgentsConfig::default())?;

    match cli.command {
        Command::Run { workers } => run(runtime, workers).await,
        Command::Publish {
            tenant,
            event_type,
            payload,
        } => publish(&runtime, &tenant, &event_type, &payload),
        Command::Review { action } => review(&runtime, action).await,
        Command::Tasks { tenant, status } => tasks(&runtime, tenant, status),
        Command::Prune { older_than_days } => prune(&runtime, older_than_days),
    }
}

async fn run(runtime: Runtime, workers: Option<usize>) -> Result<()> {
    let workers = workers.unwrap_or(runtime.agents.workers_per_agent);
    info!(
        llm = %runtime.agents.llm.url,
        ledger = %runtime.agents.ledger.url,
        workers,
        "Back-office runtime starting"
    );
    if !check_endpoint(&runtime.agents.llm.url).await {
        warn!(url = %runtime.agents.llm.url, "LLM endpoint not reachable; tasks will retry");
    }

    let store = Arc::clone(&runtime.store);
    let events = EventLog::new(Arc::clone(&store)).shared();
    let queue =
        TaskQueue::with_config(Arc::clone(&store), runtime.config.queue.queue_config()).shared();
    let ledger = runtime.ledger()?;
    let escalator = runtime.escalator(Arc::clone(&events), Arc::clone(&ledger));
    let orchestrator = Orchestrator::new(
        store,
        Arc::clone(&queue),
        Arc::clone(&events),
        escalator,
        ledger,
        &runtime.config,
    )
    .context("Failed to build orchestrator")?
    .shared();

    let automation: SharedAutomation = Arc::new(
        LlmBookingAgent::new(runtime.agents.llm.clone()).context("Failed to build LLM agent")?,
    );

    let cancel = CancellationToken::new();
    let mut handles = Vec::new();
    {
        let orchestrator = Arc::clone(&orchestrator);
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move { orchestrator.run(cancel).await }));
    }
    for agent in [AgentKind::InvoiceBooking, AgentKind::BankReconciliation] {
        for n in 0..workers {
            let worker = Worker::new(
                format!("{}-{}", agent, n),
                Arc::clone(&queue),
                Arc::clone(&events),
                Arc::clone(&automation),
                WorkerConfig::from_settings(agent, &runtime.config.worker),
            );
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move { worker.run(cancel).await }));
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");
    cancel.cancel();

    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            warn!(error = %e, "Runtime task ended abnormally");
        }
    }
    Ok(())
}

fn publish(runtime: &Runtime, tenant: &str, event_type: &str, payload: &str) -> Result<()> {
    let event_type: EventType = event_type
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;
    let payload: serde_json::Value =
        serde_json::from_str(payload).context("Payload is not valid JSON")?;
    let events = EventLog::new(Arc::clone(&runtime.store));
    let event = events
        .publish(tenant, event_type, payload)
        .context("Failed to publish event")?;
    println!("{} {} seq={}", event.id, event.event_type, event.sequence);
    Ok(())
}

async fn review(runtime: &Runtime, action: ReviewCommand) -> Result<()> {
    let events = EventLog::new(Arc::clone(&runtime.store)).shared();
    let escalator = runtime.escalator(events, runtime.ledger()?);

    match action {
        ReviewCommand::List {
            tenant,
            all,
            min_priority,
        } => {
            let min_priority = min_priority
                .map(|p| p.parse::<ReviewPriority>())
                .transpose()
                .map_err(|e| anyhow::anyhow!(e))?;
            let mut filter = if all {
                ReviewFilter::default()
            } else {
                ReviewFilter::open()
            };
            filter.tenant_id = tenant;
            filter.min_priority = min_priority;

            for item in escalator.list(&filter).context("Failed to list review items")? {
                println!(
                    "{}  {:<7} {:<9} {:<22} {:.2}  {}/{}  {}",
                    item.id,
                    item.priority.to_string(),
                    item.status.to_string(),
                    item.issue_category.to_string(),
                    item.confidence_score,
                    item.tenant_id,
                    item.source_ref,
                    item.issue_description
                );
            }
        }
        ReviewCommand::Resolve {
            item_id,
            verdict,
            reviewer,
            notes,
            decision,
        } => {
            let resolution = match verdict {
                Verdict::Approve => Resolution::Approve { notes },
                Verdict::Reject => Resolution::Reject { notes },
                Verdict::Correct => {
                    let Some(path) = decision else {
                        bail!("--decision is required to correct an item");
                    };
                    let text = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    let decision: ProposedDecision = serde_json::from_str(&text)
                        .with_context(|| format!("{} is not a decision", path.display()))?;
                    Resolution::Correct { decision, notes }
                }
            };
            let outcome = escalator
                .resolve(&item_id, resolution, &Actor::human(reviewer))
                .await
                .with_context(|| format!("Failed to resolve {}", item_id))?;
            match outcome.receipt {
                Some(receipt) => println!(
                    "{} {} posted={}",
                    outcome.item.id, outcome.item.status, receipt.posted_reference
                ),
                None => println!("{} {}", outcome.item.id, outcome.item.status),
            }
        }
    }
    Ok(())
}

fn tasks(runtime: &Runtime, tenant: Option<String>, status: Option<String>) -> Result<()> {
    let status = status
        .map(|s| s.parse::<TaskStatus>())
        .transpose()
        .map_err(|e| anyhow::anyhow!(e))?;
    let queue = TaskQueue::with_config(
        Arc::clone(&runtime.store),
        runtime.config.queue.queue_config(),
    );
    let filter = TaskFilter {
        tenant_id: tenant,
        status,
        ..Default::default()
    };
    for task in queue.list(&filter).context("Failed to list tasks")? {
        println!(
            "{}  {:<11} {:<20} {}/{}  retries={}/{}{}",
            task.id,
            task.status.to_string(),
            task.kind.to_string(),
            task.tenant_id,
            task.source_ref().unwrap_or("-"),
            task.retry_count,
            task.max_retries,
            task.error_message
                .as_ref()
                .map(|e| format!("  error: {}", e))
                .unwrap_or_default()
        );
    }
    let stats = queue.stats().context("Failed to count tasks")?;
    println!(
        "pending={} in_progress={} completed={} failed={}",
        stats.pending, stats.in_progress, stats.completed, stats.failed
    );
    Ok(())
}

fn prune(runtime: &Runtime, older_than_days: Option<u32>) -> Result<()> {
    let mut config = runtime.config.clone();
    if let Some(days) = older_than_days {
        config.retention.keep_finished_days = days;
    }
    let store = Arc::clone(&runtime.store);
    let events = EventLog::new(Arc::clone(&store)).shared();
    let queue = TaskQueue::with_config(Arc::clone(&store), config.queue.queue_config()).shared();
    let ledger = runtime.ledger()?;
    let escalator = runtime.escalator(Arc::clone(&events), Arc::clone(&ledger));
    let orchestrator = Orchestrator::new(store, queue, events, escalator, ledger, &config)
        .context("Failed to build orchestrator")?;

    let stats = orchestrator.prune_expired().context("Failed to prune")?;
    println!(
        "pruned events={} tasks={} (older than {} days)",
        stats.events, stats.tasks, config.retention.keep_finished_days
    );
    Ok(())
}
