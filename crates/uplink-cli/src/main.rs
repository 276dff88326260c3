//! uplink: operator CLI for the upload queue
//!
//! Commands:
//!   enqueue <kind> --payload JSON | --file PATH  - add a task
//!   status                                       - queue counts and footprint
//!   list [--state S]                             - one line per task
//!   run                                          - one processing run now
//!   retry-failed                                 - requeue failed tasks
//!   clear --yes                                  - drop every task
//!   prune                                        - drop completed tasks
//!   config show                                  - display current configuration
//!
//! The CLI edits the queue file directly. While uplinkd is running, use its
//! /v1 control endpoints instead.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use uplink_core::config::{expand_tilde, UplinkConfig};
use uplink_core::types::{SyncTask, TaskState};
use uplink_sync::{
    Clock, EngineSettings, JsonTaskStore, NetworkStatus, RemoteUploader, StorageUploader,
    SyncEngine, SystemClock, UploaderRegistry,
};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "uplink",
    version,
    about = "Offline-first upload queue client",
    long_about = "uplink: enqueue, inspect and drive the uplink upload queue"
)]
struct Cli {
    /// Path to the uplink configuration file
    #[arg(long, short = 'c', env = "UPLINK_CONFIG", default_value = "/etc/uplink/config.toml")]
    config: PathBuf,

    /// Queue file (overrides sync.queue_path)
    #[arg(long, short = 'q', env = "UPLINK_QUEUE_PATH")]
    queue: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Add a task to the queue
    Enqueue {
        /// Task kind (e.g. pdf_upload, photo_upload)
        kind: String,
        /// Raw JSON payload
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        payload: Option<String>,
        /// Local file to upload; builds a {"local_path": ...} payload
        #[arg(long)]
        file: Option<PathBuf>,
        /// Remote object name (with --file)
        #[arg(long, requires = "file")]
        remote_name: Option<String>,
        /// Metadata JSON stored next to the object (with --file)
        #[arg(long, requires = "file")]
        metadata: Option<String>,
    },

    /// Show queue counts and storage footprint
    Status,

    /// List tasks
    List {
        /// Only show tasks in this state (queued, processing, completed, failed)
        #[arg(long)]
        state: Option<String>,
    },

    /// Run the processor once, checking storage reachability first
    ///
    /// Credentials are read from AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY
    /// environment variables.
    Run,

    /// Move failed tasks back to queued (attempt counters are kept)
    #[command(name = "retry-failed")]
    RetryFailed,

    /// Remove every task from the queue
    Clear {
        /// Confirm the removal
        #[arg(long)]
        yes: bool,
    },

    /// Remove completed tasks
    Prune,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();
    let config = UplinkConfig::load(&cli.config)?.unwrap_or_default();
    let queue = resolve_queue_path(&config, cli.queue.as_deref());

    match cli.command {
        Commands::Enqueue {
            kind,
            payload,
            file,
            remote_name,
            metadata,
        } => {
            let payload = build_payload(
                payload.as_deref(),
                file.as_deref(),
                remote_name.as_deref(),
                metadata.as_deref(),
            )?;
            cmd_enqueue(&config, &queue, &kind, payload)
        }
        Commands::Status => cmd_status(&config, &queue),
        Commands::List { state } => cmd_list(&config, &queue, state.as_deref()),
        Commands::Run => cmd_run(&config, &queue).await,
        Commands::RetryFailed => cmd_retry_failed(&config, &queue),
        Commands::Clear { yes } => cmd_clear(&config, &queue, yes),
        Commands::Prune => cmd_prune(&config, &queue),
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config),
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

// ── Config ────────────────────────────────────────────────────────────────────

/// Resolve the queue file: CLI flag > config
fn resolve_queue_path(config: &UplinkConfig, override_path: Option<&Path>) -> PathBuf {
    match override_path {
        Some(p) => p.to_path_buf(),
        None => expand_tilde(&config.sync.queue_path),
    }
}

fn open_engine(
    config: &UplinkConfig,
    queue: &Path,
    uploader: Arc<dyn RemoteUploader>,
    online: bool,
) -> SyncEngine {
    SyncEngine::open(
        Arc::new(JsonTaskStore::open(queue)),
        uploader,
        Arc::new(NetworkStatus::new(online)),
        Arc::new(SystemClock),
        EngineSettings::from_config(&config.sync),
    )
}

/// Engine for queue edits only: no uploaders, always offline
fn queue_engine(config: &UplinkConfig, queue: &Path) -> SyncEngine {
    open_engine(config, queue, Arc::new(UploaderRegistry::new()), false)
}

// ── `uplink enqueue` ──────────────────────────────────────────────────────────

fn build_payload(
    raw: Option<&str>,
    file: Option<&Path>,
    remote_name: Option<&str>,
    metadata: Option<&str>,
) -> Result<serde_json::Value> {
    if let Some(raw) = raw {
        return serde_json::from_str(raw).context("parsing --payload as JSON");
    }
    let file = file.context("either --payload or --file is required")?;
    let local = std::fs::canonicalize(file)
        .with_context(|| format!("resolving path: {}", file.display()))?;

    let mut payload = serde_json::json!({ "local_path": local });
    if let Some(name) = remote_name {
        payload["remote_name"] = serde_json::Value::String(name.to_string());
    }
    if let Some(meta) = metadata {
        payload["metadata"] = serde_json::from_str(meta).context("parsing --metadata as JSON")?;
    }
    Ok(payload)
}

fn cmd_enqueue(
    config: &UplinkConfig,
    queue: &Path,
    kind: &str,
    payload: serde_json::Value,
) -> Result<()> {
    if !config.sync.upload_kinds.iter().any(|k| k == kind) {
        eprintln!(
            "warning: '{kind}' is not in sync.upload_kinds ({}); the task will fail when processed",
            config.sync.upload_kinds.join(", ")
        );
    }
    let engine = queue_engine(config, queue);
    let id = engine.enqueue(kind, payload).context("enqueueing task")?;
    println!("{id}");
    Ok(())
}

// ── `uplink status` ───────────────────────────────────────────────────────────

fn cmd_status(config: &UplinkConfig, queue: &Path) -> Result<()> {
    let snap = queue_engine(config, queue)
        .status()
        .with_context(|| format!("reading queue: {}", queue.display()))?;

    println!("Queue: {}", queue.display());
    println!("  pending:     {}", snap.pending);
    println!("  processing:  {}", snap.processing);
    println!("  failed:      {}", snap.failed);
    println!("  completed:   {}", snap.completed);
    println!("  total:       {}", snap.total);
    println!("  size:        {}", fmt_bytes(snap.storage_bytes));
    match snap.last_sync_attempt {
        Some(t) => println!("  last sync:   {}", fmt_age(SystemClock.now(), t)),
        None => println!("  last sync:   never"),
    }
    Ok(())
}

// ── `uplink list` ─────────────────────────────────────────────────────────────

fn parse_state(s: &str) -> Result<TaskState> {
    match s {
        "queued" => Ok(TaskState::Queued),
        "processing" => Ok(TaskState::Processing),
        "completed" => Ok(TaskState::Completed),
        "failed" => Ok(TaskState::Failed),
        other => anyhow::bail!(
            "unknown state '{other}' (expected queued, processing, completed or failed)"
        ),
    }
}

fn cmd_list(config: &UplinkConfig, queue: &Path, state: Option<&str>) -> Result<()> {
    let filter = state.map(parse_state).transpose()?;
    let tasks = queue_engine(config, queue)
        .list()
        .with_context(|| format!("reading queue: {}", queue.display()))?;

    let now = SystemClock.now();
    let shown: Vec<&SyncTask> = tasks
        .iter()
        .filter(|t| filter.map_or(true, |s| t.state == s))
        .collect();
    if shown.is_empty() {
        println!("(no tasks)");
        return Ok(());
    }
    for task in shown {
        println!("{}", format_task_line(task, now));
    }
    Ok(())
}

fn format_task_line(task: &SyncTask, now: u64) -> String {
    let last = match &task.last_result {
        Some(r) if r.success => r.remote_id.clone().unwrap_or_else(|| r.message.clone()),
        Some(r) => r.message.clone(),
        None => "-".to_string(),
    };
    format!(
        "{}  {:<14} {:<10} attempts={}  created {}  {}",
        task.id,
        task.kind,
        task.state.as_str(),
        task.attempts,
        fmt_age(now, task.created_at),
        last
    )
}

// ── `uplink run` ──────────────────────────────────────────────────────────────

async fn cmd_run(config: &UplinkConfig, queue: &Path) -> Result<()> {
    let creds = uplink_storage::Credentials::from_env()?;
    let op = uplink_storage::build_from_core_config(&config.storage, &creds)
        .context("building storage operator")?;

    let reachable = match uplink_storage::check_health(&op).await {
        Ok(()) => true,
        Err(e) => {
            eprintln!("storage unreachable: {e}");
            false
        }
    };

    let mut registry = UploaderRegistry::new();
    for kind in &config.sync.upload_kinds {
        registry.register(
            kind.clone(),
            Arc::new(StorageUploader::new(op.clone(), &config.storage.remote_prefix)),
        );
    }

    let engine = open_engine(config, queue, Arc::new(registry), reachable);
    let summary = engine.run_now().await.context("processing run failed")?;
    if summary.network_error {
        println!("Offline: nothing processed");
        return Ok(());
    }
    println!(
        "Processed {}: {} delivered, {} failed, {} still queued",
        summary.processed, summary.succeeded, summary.failed, summary.remaining
    );
    Ok(())
}

// ── `uplink retry-failed` / `clear` / `prune` ─────────────────────────────────

fn cmd_retry_failed(config: &UplinkConfig, queue: &Path) -> Result<()> {
    let n = queue_engine(config, queue)
        .retry_failed()
        .context("requeueing failed tasks")?;
    println!("Requeued {n} failed task(s)");
    Ok(())
}

fn cmd_clear(config: &UplinkConfig, queue: &Path, yes: bool) -> Result<()> {
    let engine = queue_engine(config, queue);
    if !yes {
        let total = engine.status()?.total;
        anyhow::bail!("refusing to remove {total} task(s) without --yes");
    }
    let n = engine.clear().context("clearing queue")?;
    println!("Removed {n} task(s)");
    Ok(())
}

fn cmd_prune(config: &UplinkConfig, queue: &Path) -> Result<()> {
    let n = queue_engine(config, queue)
        .prune_completed()
        .context("pruning completed tasks")?;
    println!("Pruned {n} completed task(s)");
    Ok(())
}

// ── `uplink config show` ──────────────────────────────────────────────────────

fn cmd_config_show(config: &UplinkConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

// ── Utilities ─────────────────────────────────────────────────────────────────

fn fmt_age(now: u64, then: u64) -> String {
    let secs = now.saturating_sub(then);
    if secs < 60 {
        format!("{secs}s ago")
    } else if secs < 3600 {
        format!("{}m ago", secs / 60)
    } else if secs < 86_400 {
        format!("{}h ago", secs / 3600)
    } else {
        format!("{}d ago", secs / 86_400)
    }
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
