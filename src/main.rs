//! Pack - build app images from source with buildpacks
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use pack::cancel::Cancellation;
use pack::cli::{Cli, Commands};
use pack::config::ConfigManager;
use pack::error::PackResult;
use std::process::ExitCode;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> PackResult<()> {
    let cli = Cli::parse();

    let config_manager = if let Some(ref path) = cli.config {
        ConfigManager::with_path(path.clone())
    } else {
        ConfigManager::new()
    };
    let config = config_manager.load().await?;

    // 0 = warn, 1 = info, 2+ = debug; a verbose config counts as -v
    let verbosity = cli.verbose.max(u8::from(config.general.verbose));
    let filter = match verbosity {
        0 => EnvFilter::new("pack=warn"),
        1 => EnvFilter::new("pack=info"),
        _ => EnvFilter::new("pack=debug"),
    };

    if config.general.log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .without_time()
            .init();
    }
    debug!("Loaded config from {}", config_manager.path().display());

    match cli.command {
        Commands::Build(args) => {
            let (handle, cancel) = Cancellation::new();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, cleaning up");
                    handle.cancel();
                }
            });
            pack::cli::commands::build(args, &config, &cancel).await
        }
        Commands::Config(args) => pack::cli::commands::config(args, &config_manager, &config).await,
    }
}
