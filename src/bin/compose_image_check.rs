use anyhow::Context;
use clap::Parser;
use compose_tools::compose::{self, DEFAULT_COMPOSE_GLOB};
use compose_tools::docker_hub::{self, CachedTagLister, DockerHub};
use compose_tools::image_check::{self, ReportOptions};
use compose_tools::logging;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

#[cfg(target_env = "musl")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Locate images used in compose files and suggest newer version tags
#[derive(Parser, Debug)]
#[command(name = "compose-image-check")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Root directory to search
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Glob pattern, relative to the root, selecting compose files
    #[arg(long, default_value = DEFAULT_COMPOSE_GLOB)]
    glob: String,

    /// Never color the status column
    #[arg(long)]
    no_color: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    logging::init_stderr("warn")?;
    info!("Starting compose-image-check {}", env!("CARGO_PKG_VERSION"));

    let root = std::path::absolute(&cli.root)
        .with_context(|| format!("Invalid root directory {}", cli.root.display()))?;
    let files = if root.is_dir() {
        compose::find_compose_files(&root, &cli.glob)?
    } else {
        Vec::new()
    };
    if files.is_empty() {
        eprintln!(
            "No compose files found under {} matching {}",
            root.display(),
            cli.glob
        );
        return Ok(ExitCode::from(2));
    }

    let usage = compose::collect_usage(&root, &files)?;
    let hub = DockerHub::new(docker_hub::create_client()?, docker_hub::DEFAULT_BASE_URL);
    let mut lister = CachedTagLister::new(hub);
    let checks = image_check::check_images(&usage, &mut lister).await;

    let color =
        !cli.no_color && io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();
    let options = ReportOptions { color };
    image_check::write_report(&mut io::stdout().lock(), &root, files.len(), &checks, options)
        .context("Failed to write report")?;

    Ok(ExitCode::SUCCESS)
}
