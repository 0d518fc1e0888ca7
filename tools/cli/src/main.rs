//! omnisync CLI - Command line interface for instance synchronization.
//!
//! This tool manages sync configurations, loads local records and runs
//! synchronizations against remote instances, either on demand or as a
//! periodic daemon.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use omnisync_common::{Endpoint, EntityKind, Error, ExecutionMode, RecordId, Secret};
use omnisync_remote::JsonRpcConnector;
use omnisync_store::{Invoice, PriceList, Product, Record, SaleOrder, Store, SyncConfiguration};
use omnisync_sync::{
    ConfigurationReport, KindOutcome, Notification, Orchestrator, RunRequest, RunSummary,
    ScheduleMode, Scheduler,
};

#[derive(Parser)]
#[command(name = "omnisync")]
#[command(about = "omnisync - Synchronize products, prices and orders between instances")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Path to the local store (default: platform data dir).
    #[arg(short, long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage sync configurations.
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Load local records from a JSON array.
    Load {
        /// Record kind in the file.
        #[arg(value_enum)]
        kind: LoadKind,

        /// JSON file holding an array of records.
        file: PathBuf,
    },

    /// Run enabled entity kinds.
    Run {
        /// Configuration id (default: every active configuration).
        #[arg(short, long)]
        config: Option<i64>,

        /// Record the run as scheduled instead of manual.
        #[arg(long)]
        scheduled: bool,
    },

    /// Copy product images from the remote.
    Images {
        /// Configuration id.
        #[arg(short, long)]
        config: i64,

        /// Single brand (default: the configured brands).
        #[arg(short, long)]
        brand: Option<String>,
    },

    /// Push a confirmed sale order.
    PushOrder {
        /// Local sale order id.
        order: i64,

        /// Configuration id (default: first active with sales enabled).
        #[arg(short, long)]
        config: Option<i64>,
    },

    /// Confirm a local sale order and push it if sales sync is enabled.
    ConfirmOrder {
        /// Local sale order id.
        order: i64,
    },

    /// Clear the synced flag of a sale order so it can be pushed again.
    ResetOrder {
        /// Local sale order id.
        order: i64,
    },

    /// Post a customer invoice and push it as purchase orders.
    PostInvoice {
        /// Local invoice id.
        invoice: i64,
    },

    /// Confirm remote purchase orders left unconfirmed.
    ConfirmPending {
        /// Configuration id.
        #[arg(short, long)]
        config: i64,
    },

    /// Show configuration and sales statistics.
    Stats {
        /// Configuration id (default: all).
        #[arg(short, long)]
        config: Option<i64>,
    },

    /// Show recorded runs, newest first.
    Logs {
        /// Configuration id (default: all).
        #[arg(short, long)]
        config: Option<i64>,

        /// Number of runs to show.
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,

        /// Print per-item lines.
        #[arg(long)]
        lines: bool,
    },

    /// Force-release a stale run lock.
    Unlock {
        /// Configuration id.
        #[arg(short, long)]
        config: i64,
    },

    /// Run every active configuration periodically until interrupted.
    Daemon {
        /// Seconds between runs.
        #[arg(short, long, default_value_t = 3600)]
        interval: u64,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Add a configuration.
    Add {
        /// Configuration name.
        #[arg(short, long)]
        name: String,

        /// Remote base URL.
        #[arg(short, long)]
        url: String,

        /// Remote database.
        #[arg(short, long)]
        database: String,

        /// Remote login.
        #[arg(short = 'U', long)]
        username: String,

        /// Entity kinds to enable, e.g. "products,price_lists".
        #[arg(short, long, value_delimiter = ',')]
        kinds: Vec<String>,

        /// Comma-separated brands for image sync.
        #[arg(short, long)]
        brands: Option<String>,

        /// Page size for product pulls.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Transport timeout in seconds.
        #[arg(long)]
        timeout: Option<u64>,

        /// Confirm remote purchase orders right after creating them.
        #[arg(long)]
        auto_confirm: bool,
    },

    /// List configurations.
    List,

    /// Enable or disable an entity kind.
    Set {
        /// Configuration id.
        id: i64,

        /// Entity kind.
        kind: String,

        /// "on" or "off".
        state: String,
    },

    /// Activate or deactivate a configuration.
    Activate {
        /// Configuration id.
        id: i64,

        /// Deactivate instead.
        #[arg(long)]
        off: bool,
    },

    /// Remove a configuration.
    Remove {
        /// Configuration id.
        id: i64,
    },

    /// Write a configuration as JSON.
    Export {
        /// Configuration id.
        id: i64,

        /// Output file (default: stdout).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Keep the credential in the output.
        #[arg(long)]
        with_credential: bool,
    },

    /// Add configurations from a JSON object or array.
    Import {
        /// JSON file.
        file: PathBuf,
    },

    /// Authenticate against the remote.
    Test {
        /// Configuration id.
        id: i64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum LoadKind {
    Products,
    PriceLists,
    Orders,
    Invoices,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let store = open_store(cli.store)?;
    let orchestrator = Orchestrator::new(store, JsonRpcConnector);

    match cli.command {
        Commands::Config(command) => cmd_config(&orchestrator, command).await,

        Commands::Load { kind, file } => cmd_load(orchestrator.store(), kind, &file),

        Commands::Run { config, scheduled } => {
            let mode = if scheduled {
                ExecutionMode::Scheduled
            } else {
                ExecutionMode::Manual
            };
            cmd_run(&orchestrator, config.map(RecordId::new), mode).await
        }

        Commands::Images { config, brand } => {
            let notification = orchestrator
                .sync_images(RecordId::new(config), brand, ExecutionMode::Manual)
                .await
                .context("Image synchronization failed")?;
            print_notification(&notification);
            Ok(())
        }

        Commands::PushOrder { order, config } => {
            let notification = orchestrator
                .push_sale_order(RecordId::new(order), config.map(RecordId::new))
                .await
                .context("Failed to push sale order")?;
            print_notification(&notification);
            Ok(())
        }

        Commands::ConfirmOrder { order } => {
            let notification = orchestrator
                .handle_order_confirmed(RecordId::new(order))
                .await
                .context("Failed to confirm sale order")?;
            println!("Sale order {} confirmed.", order);
            if let Some(notification) = notification {
                print_notification(&notification);
            }
            Ok(())
        }

        Commands::ResetOrder { order } => {
            orchestrator
                .reset_sale_order(RecordId::new(order))
                .context("Failed to reset sale order")?;
            println!("Sale order {} can be pushed again.", order);
            Ok(())
        }

        Commands::PostInvoice { invoice } => {
            let notifications = orchestrator
                .handle_invoice_posted(RecordId::new(invoice))
                .await
                .context("Failed to post invoice")?;
            println!("Invoice {} posted.", invoice);
            for notification in &notifications {
                print_notification(notification);
            }
            Ok(())
        }

        Commands::ConfirmPending { config } => {
            let notification = orchestrator
                .confirm_pending_purchase_orders(RecordId::new(config))
                .await
                .context("Failed to confirm pending purchase orders")?;
            print_notification(&notification);
            Ok(())
        }

        Commands::Stats { config } => cmd_stats(&orchestrator, config.map(RecordId::new)),

        Commands::Logs {
            config,
            limit,
            lines,
        } => cmd_logs(orchestrator.store(), config.map(RecordId::new), limit, lines),

        Commands::Unlock { config } => {
            let released = orchestrator
                .store()
                .force_release_run_lock(RecordId::new(config))
                .context("Failed to release run lock")?;
            if released {
                println!("Run lock of configuration {} released.", config);
            } else {
                println!("Configuration {} was not locked.", config);
            }
            Ok(())
        }

        Commands::Daemon { interval } => cmd_daemon(orchestrator, interval).await,
    }
}

/// Open the SQLite store, creating its directory.
fn open_store(path: Option<PathBuf>) -> Result<Arc<Store>> {
    let path = match path {
        Some(path) => path,
        None => dirs::data_dir()
            .context("No data directory on this platform; pass --store")?
            .join("omnisync")
            .join("omnisync.db"),
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let store = Store::open_sqlite(&path)
        .with_context(|| format!("Failed to open store at {}", path.display()))?;
    info!("Using store at {}", path.display());
    Ok(Arc::new(store))
}

/// Prompt for a credential without echoing it.
fn prompt_credential(prompt: &str) -> Result<Secret> {
    let credential = rpassword::prompt_password(prompt).context("Failed to read credential")?;
    if credential.is_empty() {
        anyhow::bail!("Credential cannot be empty");
    }
    Ok(Secret::new(credential))
}

fn print_notification(notification: &Notification) {
    println!(
        "[{}] {}: {}",
        notification.severity, notification.title, notification.message
    );
}

async fn cmd_config(
    orchestrator: &Orchestrator<JsonRpcConnector>,
    command: ConfigCommand,
) -> Result<()> {
    let store = orchestrator.store();

    match command {
        ConfigCommand::Add {
            name,
            url,
            database,
            username,
            kinds,
            brands,
            batch_size,
            timeout,
            auto_confirm,
        } => {
            let credential = prompt_credential("Remote password or API key: ")?;
            let mut config =
                SyncConfiguration::new(name, Endpoint::new(url, database, username, credential));

            if !kinds.is_empty() {
                for kind in EntityKind::ORDERED {
                    config.flags.set(kind, false);
                }
                for kind in &kinds {
                    let kind: EntityKind = kind.parse().context("Invalid entity kind")?;
                    config.flags.set(kind, true);
                }
            }
            if let Some(brands) = brands {
                config.brands_to_sync = brands;
            }
            if let Some(batch_size) = batch_size {
                config.batch_size = batch_size;
            }
            if let Some(timeout) = timeout {
                config.timeout_secs = timeout;
            }
            config.auto_confirm_purchase_orders = auto_confirm;

            let config = store
                .add_configuration(config)
                .context("Failed to save configuration")?;

            println!("Configuration created successfully!");
            println!("  ID: {}", config.id);
            println!("  Remote: {} ({})", config.endpoint.url, config.endpoint.database);
            println!("  Kinds: {}", enabled_kinds(&config));
            Ok(())
        }

        ConfigCommand::List => {
            let configs = store.configurations().context("Failed to list configurations")?;
            if configs.is_empty() {
                println!("No configurations.");
                return Ok(());
            }
            for config in configs {
                let state = if config.active { "active" } else { "inactive" };
                let locked = store.is_locked(config.id).unwrap_or(false);
                println!(
                    "  {:>4}  {} [{}{}]",
                    config.id,
                    config.name,
                    state,
                    if locked { ", running" } else { "" }
                );
                println!(
                    "        {} ({}) as {}",
                    config.endpoint.url, config.endpoint.database, config.endpoint.username
                );
                println!("        kinds: {}", enabled_kinds(&config));
            }
            Ok(())
        }

        ConfigCommand::Set { id, kind, state } => {
            let kind: EntityKind = kind.parse().context("Invalid entity kind")?;
            let enabled = match state.as_str() {
                "on" => true,
                "off" => false,
                _ => anyhow::bail!("Invalid state. Use: on or off"),
            };

            let mut config = store.configuration(RecordId::new(id))?;
            config.flags.set(kind, enabled);
            store
                .save_configuration(&config)
                .context("Failed to save configuration")?;
            println!("{}: {} {}", config.name, kind, state);
            Ok(())
        }

        ConfigCommand::Activate { id, off } => {
            let mut config = store.configuration(RecordId::new(id))?;
            config.active = !off;
            store
                .save_configuration(&config)
                .context("Failed to save configuration")?;
            println!(
                "{} is now {}.",
                config.name,
                if config.active { "active" } else { "inactive" }
            );
            Ok(())
        }

        ConfigCommand::Remove { id } => {
            if store.remove::<SyncConfiguration>(RecordId::new(id))? {
                println!("Configuration {} removed.", id);
            } else {
                println!("Configuration {} not found.", id);
            }
            Ok(())
        }

        ConfigCommand::Export {
            id,
            output,
            with_credential,
        } => {
            let config = store.configuration(RecordId::new(id))?;
            let mut value = serde_json::to_value(&config)?;
            if !with_credential {
                value["endpoint"]["credential"] = serde_json::Value::String(String::new());
            }
            let json = serde_json::to_string_pretty(&value)?;

            match output {
                Some(path) => {
                    tokio::fs::write(&path, json)
                        .await
                        .context("Failed to write output file")?;
                    println!("Configuration exported to {}", path.display());
                }
                None => println!("{}", json),
            }
            Ok(())
        }

        ConfigCommand::Import { file } => {
            let text = tokio::fs::read_to_string(&file)
                .await
                .context("Failed to read configuration file")?;
            let value: serde_json::Value =
                serde_json::from_str(&text).context("Invalid configuration JSON")?;
            let values = match value {
                serde_json::Value::Array(values) => values,
                other => vec![other],
            };

            for value in values {
                let mut config: SyncConfiguration =
                    serde_json::from_value(value).context("Invalid configuration")?;
                config.id = RecordId::default();
                config.stats = Default::default();
                if config.endpoint.credential.is_empty() {
                    config.endpoint.credential =
                        prompt_credential(&format!("Credential for '{}': ", config.name))?;
                }
                let config = store
                    .add_configuration(config)
                    .context("Failed to save configuration")?;
                println!("Imported '{}' as configuration {}", config.name, config.id);
            }
            Ok(())
        }

        ConfigCommand::Test { id } => {
            let notification = orchestrator
                .test_connection(RecordId::new(id))
                .await
                .context("Connection test failed")?;
            print_notification(&notification);
            Ok(())
        }
    }
}

fn enabled_kinds(config: &SyncConfiguration) -> String {
    let kinds: Vec<&str> = config.flags.enabled().map(|k| k.as_str()).collect();
    if kinds.is_empty() {
        "none".to_string()
    } else {
        kinds.join(", ")
    }
}

/// Load local records of one kind.
fn cmd_load(store: &Store, kind: LoadKind, file: &Path) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let loaded = match kind {
        LoadKind::Products => load_records::<Product>(store, &text)?,
        LoadKind::PriceLists => load_records::<PriceList>(store, &text)?,
        LoadKind::Orders => load_records::<SaleOrder>(store, &text)?,
        LoadKind::Invoices => load_records::<Invoice>(store, &text)?,
    };

    println!("Loaded {} records from {}", loaded, file.display());
    Ok(())
}

fn load_records<R: Record>(store: &Store, text: &str) -> Result<usize> {
    let records: Vec<R> = serde_json::from_str(text).context("Invalid record JSON")?;
    let count = records.len();
    for record in records {
        let record = store.insert(record).context("Failed to store record")?;
        info!(table = R::TABLE, id = %record.id(), "Loaded record");
    }
    Ok(count)
}

async fn cmd_run(
    orchestrator: &Orchestrator<JsonRpcConnector>,
    config: Option<RecordId>,
    mode: ExecutionMode,
) -> Result<()> {
    let started = Instant::now();

    let reports = match config {
        Some(id) => vec![orchestrator
            .run_configuration(id, mode)
            .await
            .context("Failed to run configuration")?],
        None => orchestrator
            .run_all(mode)
            .await
            .context("Failed to run configurations")?,
    };

    if reports.is_empty() {
        println!("No active configurations.");
        return Ok(());
    }
    for report in &reports {
        print_report(report);
    }

    let summary = RunSummary::from_reports(&reports, started.elapsed());
    println!(
        "\n{} configurations, {} with failures, in {:.2?}",
        summary.configurations, summary.failed_configurations, summary.duration
    );
    Ok(())
}

fn print_report(report: &ConfigurationReport) {
    println!("{} (#{})", report.name, report.config_id);
    if let Some(reason) = &report.aborted {
        println!("  aborted: {}", reason);
    }
    for kind in &report.kinds {
        match &kind.outcome {
            KindOutcome::Completed { counts } => println!(
                "  {:<12} {} total, {} synced, {} skipped, {} failed",
                kind.kind, counts.total, counts.synced, counts.skipped, counts.failed
            ),
            KindOutcome::Failed { error, scope } => {
                println!("  {:<12} failed ({:?}): {}", kind.kind, scope, error)
            }
        }
    }
}

fn cmd_stats(orchestrator: &Orchestrator<JsonRpcConnector>, config: Option<RecordId>) -> Result<()> {
    let store = orchestrator.store();
    let configs = match config {
        Some(id) => vec![store.configuration(id)?],
        None => store.configurations()?,
    };

    for config in configs {
        let stats = orchestrator
            .refresh_statistics(config.id)
            .context("Failed to compute statistics")?;
        println!("{} (#{})", config.name, config.id);
        for kind in EntityKind::ORDERED {
            println!("  {:<12} {}", kind, stats.count(kind));
        }
        match stats.last_sync_date {
            Some(date) => println!("  last sync    {}", date.format("%Y-%m-%d %H:%M:%S UTC")),
            None => println!("  last sync    never"),
        }
    }

    let sales = orchestrator.sales_stats()?;
    println!(
        "\nSynced sale orders: {} (average total {:.2})",
        sales.total_count, sales.avg_value
    );
    Ok(())
}

fn cmd_logs(store: &Store, config: Option<RecordId>, limit: usize, lines: bool) -> Result<()> {
    let runs = store.runs(config).context("Failed to read run ledger")?;
    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }

    for run in runs.into_iter().take(limit) {
        println!(
            "#{:<5} config {:<4} {:<22} {:<9} {:?} {} synced, {} skipped, {} failed ({:.2}s) {}",
            run.id,
            run.config_id,
            run.subject.to_string(),
            run.mode.to_string(),
            run.status,
            run.counts.synced,
            run.counts.skipped,
            run.counts.failed,
            run.duration_secs,
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
        );
        if let Some(error) = &run.error {
            println!("        error: {}", error);
        }
        if lines {
            for line in &run.lines {
                println!("        {:<8} {} - {}", line.outcome, line.item, line.reason);
            }
        }
    }
    Ok(())
}

/// Run every active configuration on a fixed interval until Ctrl-C.
async fn cmd_daemon(orchestrator: Orchestrator<JsonRpcConnector>, interval: u64) -> Result<()> {
    if interval == 0 {
        anyhow::bail!("Interval must be at least 1 second");
    }

    let orchestrator = Arc::new(orchestrator);
    let (scheduler, handle) = Scheduler::new(ScheduleMode::Periodic {
        interval: Duration::from_secs(interval),
    });

    let task = tokio::spawn(async move {
        handle
            .run(move |request, mode| {
                let orchestrator = orchestrator.clone();
                async move {
                    let started = Instant::now();
                    let reports = match request {
                        RunRequest::Configuration(id) => {
                            vec![orchestrator.run_configuration(id, mode).await?]
                        }
                        _ => orchestrator.run_all(mode).await?,
                    };
                    Ok::<_, Error>(RunSummary::from_reports(&reports, started.elapsed()))
                }
            })
            .await;
    });

    info!("Running every {} seconds; press Ctrl-C to stop", interval);
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Stopping after the current run");
    scheduler.shutdown().await;
    if let Err(e) = task.await {
        warn!("Scheduler task ended abnormally: {}", e);
    }
    Ok(())
}
