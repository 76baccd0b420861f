mod commands;
mod progress;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use commands::{
    backup::BackupCommand, copy::CopyCommand, init::InitCommand, prune::PruneCommand,
    restore::RestoreCommand, snapshots::SnapshotsCommand,
};
use packhaul_core::{CancelToken, Config, ScratchSession};
use packhaul_engine::WorkflowContext;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(
    name = "packhaul",
    about = "A multi-backend backup orchestrator",
    long_about = "Packhaul backs up packages into heterogeneous storage backends under a single snapshot model, with retention, pruning and cross-repository mirroring"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, env = "PACKHAUL_CONFIG", help = "Configuration file path")]
    config: Option<PathBuf>,

    #[arg(short, long, help = "Enable verbose output")]
    verbose: bool,

    #[arg(short, long, help = "Enable quiet mode")]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Initialize the configured repositories")]
    Init(InitCommand),

    #[command(about = "Back up packages into their repositories")]
    Backup(BackupCommand),

    #[command(about = "List snapshots across repositories")]
    Snapshots(SnapshotsCommand),

    #[command(about = "Restore a snapshot")]
    Restore(RestoreCommand),

    #[command(about = "Copy snapshots from one repository to its mirrors")]
    Copy(CopyCommand),

    #[command(about = "Apply retention policies and delete fallen-out snapshots")]
    Prune(PruneCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet);

    let config = load_config(cli.config.as_deref())?;
    let session = Arc::new(ScratchSession::create()?);
    let token = CancelToken::new();

    let interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping");
            interrupt.cancel();
        }
    });

    let (bar, handler) = progress::spinner(cli.quiet);
    let ctx = WorkflowContext::new(config, session.clone())
        .with_progress(handler)
        .with_token(token);

    let result = match cli.command {
        Commands::Init(ref cmd) => cmd.run(&ctx).await,
        Commands::Backup(ref cmd) => cmd.run(&ctx).await,
        Commands::Snapshots(ref cmd) => cmd.run(&ctx).await,
        Commands::Restore(ref cmd) => cmd.run(&ctx).await,
        Commands::Copy(ref cmd) => cmd.run(&ctx).await,
        Commands::Prune(ref cmd) => cmd.run(&ctx).await,
    };

    bar.finish_and_clear();
    if let Err(err) = session.teardown().await {
        warn!(error = %err, "Failed to tear down scratch session");
    }
    result
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => default_config_path()
            .ok_or_else(|| anyhow!("no config file given and no default location available"))?,
    };
    debug!(path = %path.display(), "Loading configuration");
    Ok(Config::load(&path)?)
}

fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "packhaul")
        .map(|dirs| dirs.config_dir().join("packhaul.toml"))
}

fn init_tracing(verbose: bool, quiet: bool) {
    let level = if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        "info"
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!("packhaul={}", level)))
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Setting default subscriber failed");
}
