use anyhow::{Context, Result};
use clap::Parser;
use compose_tools::config::{self, DEFAULT_WHITELIST_FILE, LOG_FILE_NAME, LOGS_DIR};
use compose_tools::logging;
use compose_tools::sync::{SyncOptions, VolumeSync, record_changes};
use compose_tools::vcs::GitCli;
use compose_tools::volume::DockerVolumes;
use compose_tools::whitelist::Whitelist;
use indexmap::IndexMap;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn};

#[cfg(target_env = "musl")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Sync whitelisted configuration files from Docker volumes into a git repository
#[derive(Parser, Debug)]
#[command(name = "volume-sync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Show what would be synced without making changes
    #[arg(long)]
    dry_run: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Automatically commit changes to git
    #[arg(long)]
    auto_commit: bool,

    /// Display whitelist configuration and exit
    #[arg(long)]
    show_whitelist: bool,

    /// Sync only the specified volume (e.g. home_assistant_config)
    #[arg(long)]
    volume: Option<String>,

    /// Path to the whitelist TOML file [default: <repo>/scripts/whitelist.toml]
    #[arg(long)]
    whitelist_file: Option<PathBuf>,

    /// Repository root holding the configs and logs directories
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Commit message used with --auto-commit
    #[arg(long)]
    message: Option<String>,

    /// Leave files in the target tree that are no longer in the volume
    #[arg(long)]
    keep_orphans: bool,
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let repo = std::path::absolute(&cli.repo)
        .with_context(|| format!("Invalid repository path {}", cli.repo.display()))?;
    let level = if cli.verbose { "debug" } else { "info" };
    let _log_guard = logging::init_stdout_and_file(&repo.join(LOGS_DIR), LOG_FILE_NAME, level)?;

    let whitelist_path = cli
        .whitelist_file
        .clone()
        .unwrap_or_else(|| repo.join(DEFAULT_WHITELIST_FILE));
    config::ensure_whitelist_file(&whitelist_path)?;
    let config = config::load_whitelist_config(&whitelist_path)?;
    let whitelist = Whitelist::compile(&config.services)
        .with_context(|| format!("Invalid whitelist {}", whitelist_path.display()))?;

    if cli.show_whitelist {
        whitelist.write_summary(&mut io::stdout().lock(), &whitelist_path)?;
        return Ok(ExitCode::SUCCESS);
    }
    if whitelist.is_empty() {
        warn!("No whitelist patterns loaded, every file will be skipped");
    }

    let settings = &config.sync;
    let volumes: IndexMap<String, String> = match &cli.volume {
        None => settings.volumes.clone(),
        Some(name) => match settings.volumes.get(name) {
            Some(service) => IndexMap::from([(name.clone(), service.clone())]),
            None => {
                eprintln!("Unknown volume: {}", name);
                eprintln!(
                    "Available volumes: {}",
                    settings
                        .volumes
                        .keys()
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                return Ok(ExitCode::FAILURE);
            }
        },
    };

    let resolver = DockerVolumes::new(&settings.volume_prefix);
    let options = SyncOptions {
        dry_run: cli.dry_run,
        clean_orphans: !cli.keep_orphans,
    };
    let configs_root = repo.join(&settings.configs_dir);
    let summary = VolumeSync::new(&resolver, &whitelist, &configs_root, options).sync_all(&volumes);
    info!(
        "{} files copied, {} orphaned files removed",
        summary.copied(),
        summary.removed()
    );

    let mut vcs_ok = true;
    if !summary.reports.is_empty() {
        let message = cli
            .message
            .clone()
            .or_else(|| cli.volume.as_ref().map(|v| format!("Sync {} configuration", v)));
        vcs_ok = record_changes(
            &GitCli::new(&repo),
            &[settings.configs_dir.clone()],
            cli.auto_commit,
            cli.dry_run,
            message.as_deref(),
        );
    }

    if summary.all_succeeded() && vcs_ok {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
