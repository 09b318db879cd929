//! hubsync: keeps markdown vaults and Notion databases in step.
//!
//! Pull mirrors the database tree into `dir/name/name.md` documents; push turns
//! new local documents into pages.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use hubsync_cli::config::{self, Config, VaultConfig};
use hubsync_cli::{NativeFs, NotionRemote};
use hubsync_core::{Direction, SeedPayload, SyncEngine, SyncEvent, SyncReport};

#[derive(Parser, Debug)]
#[command(name = "hubsync")]
#[command(about = "Two-way sync between markdown vaults and Notion databases")]
struct Args {
    /// Path to sync_config.json (default: ~/.hubsync/sync_config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a template config
    Init {
        /// Replace an existing config
        #[arg(long)]
        overwrite: bool,
    },
    /// Run a sync
    Sync {
        /// Only sync the named vault
        #[arg(long)]
        vault: Option<String>,

        #[arg(long, value_enum, default_value_t = DirectionArg::Both)]
        direction: DirectionArg,
    },
    /// Create a database tree from a JSON outline, writing page ids back into it
    Seed {
        /// Outline file (default: seed_payload.json next to the config)
        #[arg(long)]
        payload: Option<PathBuf>,

        /// Vault whose database receives the tree (default: the first one)
        #[arg(long)]
        vault: Option<String>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum DirectionArg {
    Pull,
    Push,
    Both,
}

impl From<DirectionArg> for Direction {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::Pull => Direction::Pull,
            DirectionArg::Push => Direction::Push,
            DirectionArg::Both => Direction::Both,
        }
    }
}

fn engine_for(vault: &VaultConfig, api_key: &str) -> SyncEngine<NativeFs, NotionRemote> {
    let root = vault.resolved_path();
    info!("Vault {} at {:?}", vault.name, root);
    SyncEngine::new(
        NativeFs::new(root),
        NotionRemote::from_config(&vault.remote, api_key),
    )
}

fn log_event(event: SyncEvent) {
    match event {
        SyncEvent::NodeFailed { id, error } => error!("{} failed: {}", id, error),
        SyncEvent::NodeMoved { from, to, .. } => info!("Moved {} -> {}", from, to),
        SyncEvent::NodeCreated { id, path } => info!("Created {} from {}", id, path),
        SyncEvent::Progress { done, total } => debug!("{}/{}", done, total),
        other => debug!("{:?}", other),
    }
}

fn summarize(vault: &str, report: &SyncReport) -> usize {
    let mut failed = 0;
    if let Some(pull) = &report.pull {
        if pull.idle {
            info!("[{}] pull: nothing changed", vault);
        } else {
            info!(
                "[{}] pull: {} created, {} updated, {} moved, {} deleted, {} hubs relinked",
                vault, pull.created, pull.updated, pull.moved, pull.deleted, pull.hubs_relinked
            );
        }
        for error in &pull.pass_errors {
            warn!("[{}] {}", vault, error);
        }
        failed += pull.failed.len() + pull.pass_errors.len();
    }
    if let Some(push) = &report.push {
        info!(
            "[{}] push: {} created, {} hub stubs, {} already synced",
            vault,
            push.created.len(),
            push.hubs_created,
            push.skipped
        );
        for (path, reason) in &push.failed {
            warn!("[{}] could not push {}: {}", vault, path, reason);
        }
        failed += push.failed.len();
    }
    failed
}

async fn run_sync(config: &Config, vault: Option<&str>, direction: Direction) -> Result<()> {
    let api_key = config::api_key_from_env()?;
    let mut failed = 0;

    for vault in config.select(vault)? {
        let engine = engine_for(vault, &api_key);
        let _events = engine.events().subscribe(log_event);
        let report = engine
            .sync(direction)
            .await
            .with_context(|| format!("sync of vault {} aborted", vault.name))?;
        failed += summarize(&vault.name, &report);
    }

    if failed > 0 {
        bail!("{} items failed; they will be retried on the next run", failed);
    }
    Ok(())
}

async fn run_seed(config: &Config, config_path: &Path, payload: Option<PathBuf>, vault: Option<&str>) -> Result<()> {
    let api_key = config::api_key_from_env()?;
    let vault = match vault {
        Some(name) => config.select(Some(name))?[0],
        None => config
            .vaults
            .first()
            .context("config lists no vaults")?,
    };
    let payload_path = payload.unwrap_or_else(|| config_path.with_file_name("seed_payload.json"));

    let raw = std::fs::read_to_string(&payload_path)
        .with_context(|| format!("reading {}", payload_path.display()))?;
    let mut outline: SeedPayload =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", payload_path.display()))?;

    let engine = engine_for(vault, &api_key);
    let report = engine.seed(&mut outline).await?;

    std::fs::write(&payload_path, serde_json::to_string_pretty(&outline)?)
        .with_context(|| format!("writing ids back to {}", payload_path.display()))?;
    info!(
        "Seeded {} pages ({} already present); ids written to {}",
        report.created,
        report.reused,
        payload_path.display()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Respects RUST_LOG, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,hubsync=debug"
    } else {
        "info,hubsync=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = match args.config {
        Some(path) => path,
        None => config::default_config_path()?,
    };

    match args.command {
        Command::Init { overwrite } => {
            if Config::write_template(&config_path, overwrite)? {
                info!("Wrote template config to {}", config_path.display());
            } else {
                info!(
                    "{} already exists; pass --overwrite to replace it",
                    config_path.display()
                );
            }
        }
        Command::Sync { vault, direction } => {
            let config = Config::load(&config_path)?;
            run_sync(&config, vault.as_deref(), direction.into()).await?;
        }
        Command::Seed { payload, vault } => {
            let config = Config::load(&config_path)?;
            run_seed(&config, &config_path, payload, vault.as_deref()).await?;
        }
    }

    Ok(())
}
