//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use sundew_core::{
    BackoffPolicy, BatchArchive, ChatTransformer, IngestionCycle, ManualBatchRunner, Scheduler,
    TransformProgress, TransformSettings,
};
use sundew_output::FileSink;
use sundew_shared::{AppConfig, ItemId, init_config, load_config, validate_credentials};
use sundew_source::XApiClient;
use sundew_storage::{CheckpointStore, MemoryCheckpoints, Storage};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Sundew: grouped social feed ingestion with LLM transformation.
#[derive(Parser)]
#[command(
    name = "sundew",
    version,
    about = "Poll grouped accounts for new posts, transform them with an LLM, and save the results.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (TOML, or JSON by extension). Defaults to ./sundew.toml, then ~/.sundew/sundew.toml.
    #[arg(long, global = true, env = "SUNDEW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Defaults to `run`.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the polling daemon until interrupted.
    Run,

    /// Transform and save archived batches once, without touching checkpoints.
    Process {
        /// Group whose instruction is applied (defaults to the first group).
        #[arg(short, long)]
        group: Option<String>,

        /// Batch directory (defaults to `batch.dir` from the config).
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// List durable checkpoints.
    Checkpoints,

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Write a default config file to ~/.sundew/sundew.toml.
    Init,
    /// Show the resolved, validated configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "sundew=info",
        1 => "sundew=debug",
        _ => "sundew=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command.unwrap_or(Command::Run) {
        Command::Run => cmd_run(config_path).await,
        Command::Process { group, dir } => {
            cmd_process(config_path, group.as_deref(), dir.as_deref()).await
        }
        Command::Checkpoints => cmd_checkpoints(config_path).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

async fn cmd_run(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    validate_credentials(&config)?;

    let source = Arc::new(XApiClient::from_env(&config.source)?);
    let transformer = Arc::new(ChatTransformer::from_env(&config.transformer)?);
    let sink = Arc::new(FileSink::new(&config.output)?);
    let checkpoints = open_checkpoints(&config).await?;

    let mut cycle = IngestionCycle::new(source, transformer, sink, checkpoints)
        .with_backoff(BackoffPolicy::from(&config.retry))
        .with_settings(TransformSettings::from(&config.transformer))
        .with_rate_limit_retries(config.retry.max_rate_limit_retries);
    if config.batch.archive {
        cycle = cycle.with_archive(BatchArchive::new(&config.batch.dir));
    }

    let handle = Scheduler::new(
        config.groups.clone(),
        Arc::new(cycle),
        config.update_interval(),
    )
    .start();
    let worker_done = handle.stop_token();

    tokio::select! {
        signal = shutdown_signal() => {
            signal?;
            info!("shutdown signal received, stopping");
        }
        _ = worker_done.cancelled() => {}
    }

    handle.stop().await?;
    info!("sundew has shut down");
    Ok(())
}

async fn open_checkpoints(config: &AppConfig) -> Result<Arc<dyn CheckpointStore>> {
    Ok(match &config.checkpoints.path {
        Some(path) => Arc::new(Storage::open(path).await?),
        None => {
            warn!("no checkpoints.path configured, progress is lost on restart");
            Arc::new(MemoryCheckpoints::new())
        }
    })
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            ctrl_c = tokio::signal::ctrl_c() => ctrl_c?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Manual batch
// ---------------------------------------------------------------------------

async fn cmd_process(
    config_path: Option<&Path>,
    group: Option<&str>,
    dir: Option<&Path>,
) -> Result<()> {
    let config = load_config(config_path)?;

    let group = match group {
        Some(name) => config
            .group(name)
            .ok_or_else(|| eyre!("unknown group '{name}'"))?,
        None => config
            .groups
            .first()
            .ok_or_else(|| eyre!("no groups configured"))?,
    };
    let dir = dir.map_or_else(|| config.batch.dir.clone(), Path::to_path_buf);

    let transformer = Arc::new(ChatTransformer::from_env(&config.transformer)?);
    let sink = Arc::new(FileSink::new(&config.output)?);
    let runner = ManualBatchRunner::new(
        transformer,
        sink.clone(),
        TransformSettings::from(&config.transformer),
    );

    info!(group = %group.name, dir = %dir.display(), "processing archived batches");
    let progress = CliProgress::new();
    let summary = runner.run(group, &dir, &progress).await?;

    println!();
    if summary.read == 0 {
        println!("  No archived posts found in {}", dir.display());
    } else {
        println!("  Batch processed!");
        println!("  Group:  {}", group.name);
        println!("  Read:   {}", summary.read);
        println!("  Saved:  {}", summary.saved);
        println!("  Output: {}", sink.destination().display());
    }
    println!();

    Ok(())
}

/// Progress bar over the items of a manual batch.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::hidden();
        if let Ok(style) =
            ProgressStyle::with_template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
        {
            bar.set_style(style.progress_chars("=> "));
        }
        Self { bar }
    }
}

impl TransformProgress for CliProgress {
    fn started(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar
            .set_draw_target(indicatif::ProgressDrawTarget::stderr());
    }

    fn item_done(&self, current: usize, _total: usize, id: &ItemId) {
        self.bar.set_position(current as u64);
        self.bar.set_message(format!("post {id}"));
    }

    fn finished(&self, transformed: usize, skipped: usize) {
        self.bar
            .finish_with_message(format!("{transformed} transformed, {skipped} skipped"));
    }
}

// ---------------------------------------------------------------------------
// Checkpoints
// ---------------------------------------------------------------------------

async fn cmd_checkpoints(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let path = config
        .checkpoints
        .path
        .as_deref()
        .ok_or_else(|| eyre!("checkpoints.path is not set; checkpoints live in memory only"))?;

    let storage = Storage::open_readonly(path).await?;
    let records = storage.list_checkpoints().await?;

    if records.is_empty() {
        println!("No checkpoints recorded yet.");
        return Ok(());
    }

    println!("{:<20} {:<20} {:<24} UPDATED", "GROUP", "ACCOUNT", "LAST ID");
    for r in records {
        println!(
            "{:<20} {:<20} {:<24} {}",
            r.group,
            r.account,
            r.last_id.as_str(),
            r.updated_at
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config: AppConfig = load_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
