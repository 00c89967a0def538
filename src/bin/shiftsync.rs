use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use shiftsync::date_util::{format_timestamp, humanize_since, parse_timestamp};
use shiftsync::{
    ChannelProgress, ConnectivityProvider, Database, LogProgress, ManualConnectivity, NewChange,
    OutboxRemote, Priority, ProgressSnapshot, ShiftSync, SourceType, SyncProgress, SyncReport,
};

#[derive(Parser)]
#[command(name = "shiftsync", about = "Offline-first sync for shifts, vehicles and calculations")]
struct Cli {
    /// Database path (default: ~/.shiftsync/shiftsync.db)
    #[arg(long)]
    db: Option<String>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Progress reporter that writes to stderr.
struct StderrProgress;

impl SyncProgress for StderrProgress {
    fn on_run_start(&self, total_items: usize, total_batches: usize) {
        eprintln!("Syncing {total_items} items in {total_batches} batches...");
    }

    fn on_progress(&self, snapshot: &ProgressSnapshot) {
        eprintln!(
            "  [{}/{}] {}%",
            snapshot.completed_batches, snapshot.total_batches, snapshot.percent
        );
    }

    fn on_run_complete(&self, report: &SyncReport) {
        match &report.error {
            None => eprintln!("  Done: {} items synced", report.items_synced),
            Some(err) => eprintln!("  {}: {err}", report.status),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Record a local change to be synced
    Add {
        /// Domain: shift, vehicle, calculation
        domain: SourceType,
        /// Record id
        id: String,
        /// When the change was made (RFC 3339 or YYYY-MM-DD HH:MM:SS)
        #[arg(long)]
        captured_at: Option<String>,
        /// JSON payload
        #[arg(long)]
        payload: Option<String>,
        /// Override the domain priority: high, medium, low
        #[arg(long)]
        priority: Option<Priority>,
    },
    /// Show the queue the next sync would push
    Pending {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run one sync now
    Sync {
        /// Outbox directory (default: ~/.shiftsync/outbox)
        #[arg(long)]
        remote: Option<PathBuf>,
        /// Output the run report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Keep syncing periodically until interrupted
    Watch {
        /// Outbox directory (default: ~/.shiftsync/outbox)
        #[arg(long)]
        remote: Option<PathBuf>,
    },
    /// Show pending counts and recent runs
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// Remove a config value so its default applies
    Unset { key: String },
    /// List all config values
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let db = match &cli.db {
        Some(path) => Database::open_at(path).await?,
        None => Database::open().await?,
    };

    match cli.command {
        Commands::Add {
            domain,
            id,
            captured_at,
            payload,
            priority,
        } => {
            let mut change = NewChange::new(domain, id);
            if let Some(raw) = captured_at {
                change.captured_at = Some(
                    parse_timestamp(&raw)
                        .ok_or_else(|| anyhow::anyhow!("Invalid --captured-at: {raw}"))?,
                );
            }
            if let Some(raw) = payload {
                change.payload = serde_json::from_str(&raw)
                    .map_err(|e| anyhow::anyhow!("Invalid --payload JSON: {e}"))?;
            }
            change.priority = priority;
            let label = format!("{}:{}", change.domain, change.record_id);
            app(db, None)?.record_change(change).await?;
            println!("Recorded: {label}");
        }
        Commands::Pending { json } => {
            let queue = app(db, None)?.pending_queue().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&queue)?);
            } else if queue.is_empty() {
                println!("Nothing pending.");
            } else {
                println!("{} pending item(s):", queue.len());
                for item in &queue {
                    println!(
                        "  {:<6} {:<11} {:<24} {}",
                        item.priority.as_str(),
                        item.source_type.as_str(),
                        item.id,
                        format_timestamp(&item.captured_at)
                    );
                }
            }
        }
        Commands::Sync { remote, json } => {
            let observer: Arc<dyn SyncProgress> = if json {
                Arc::new(LogProgress)
            } else {
                Arc::new(StderrProgress)
            };
            let report = app(db, remote)?.with_observer(observer).sync_now().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if report.batches_total == 0 {
                println!("Nothing to sync.");
            }
            if !report.is_success() {
                std::process::exit(1);
            }
        }
        Commands::Watch { remote } => {
            run_watch(app(db, remote)?).await?;
        }
        Commands::Status { json } => {
            print_status(&app(db, None)?, json).await?;
        }
        Commands::Config { action } => {
            handle_config(&app(db, None)?, action).await?;
        }
    }

    Ok(())
}

fn app(db: Database, remote: Option<PathBuf>) -> anyhow::Result<ShiftSync> {
    let dir = match remote {
        Some(dir) => dir,
        None => OutboxRemote::default_dir()?,
    };
    Ok(ShiftSync::new(db, Arc::new(OutboxRemote::new(dir))))
}

async fn run_watch(app: ShiftSync) -> anyhow::Result<()> {
    let (observer, mut reports) = ChannelProgress::new(Arc::new(StderrProgress));
    let app = app.with_observer(Arc::new(observer));
    let coordinator = app.coordinator().await?.clone();
    let interval = coordinator.config().periodic_interval;

    // The CLI has no network probe; it assumes it is online while running.
    let connectivity: Arc<dyn ConnectivityProvider> = Arc::new(ManualConnectivity::new(true));
    let triggers = coordinator.start(connectivity);
    coordinator.request_sync();

    eprintln!(
        "Watching for changes every {}s. Press Ctrl-C to stop.",
        interval.as_secs()
    );

    loop {
        tokio::select! {
            Some(report) = reports.recv() => {
                if let Err(e) = app.record_run(&report).await {
                    log::error!("Failed to record sync run: {e}");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Stopping...");
                break;
            }
        }
    }

    triggers.shutdown().await;
    // An active run stops at its next batch boundary.
    coordinator.cancel_current();
    coordinator.wait_idle().await;
    while let Ok(report) = reports.try_recv() {
        app.record_run(&report).await?;
    }
    Ok(())
}

async fn print_status(app: &ShiftSync, json: bool) -> anyhow::Result<()> {
    let status = app.status(5).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let now = chrono::Utc::now();
    println!("Sync Status");
    for (domain, count) in &status.pending {
        println!("  Pending {:<12} {count}", format!("{domain}:"));
    }
    println!(
        "  Last success:        {}",
        status
            .last_success_at
            .map(|at| format!("{} ({})", format_timestamp(&at), humanize_since(at, now)))
            .unwrap_or_else(|| "never".to_string())
    );
    if !status.recent_runs.is_empty() {
        println!();
        println!("Recent runs");
        for run in &status.recent_runs {
            println!(
                "  {}  {:<9} {}/{} batches, {}/{} items{}",
                run.finished_at,
                run.status,
                run.batches_completed,
                run.batches_total,
                run.items_synced,
                run.items_total,
                run.error_message
                    .as_deref()
                    .map(|e| format!("  ({e})"))
                    .unwrap_or_default()
            );
        }
    }
    Ok(())
}

async fn handle_config(app: &ShiftSync, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => match app.config_get(&key).await? {
            Some(v) => println!("{key} = {v}"),
            None => println!("{key} is not set"),
        },
        ConfigAction::Set { key, value } => {
            app.config_set(&key, &value).await?;
            println!("Config updated.");
        }
        ConfigAction::Unset { key } => {
            if app.config_unset(&key).await? {
                println!("Removed: {key}");
            } else {
                println!("{key} is not set");
            }
        }
        ConfigAction::List => {
            let items = app.config_list().await?;
            if items.is_empty() {
                println!("No configuration set.");
            } else {
                for (k, v) in items {
                    println!("{k} = {v}");
                }
            }
        }
    }
    Ok(())
}
