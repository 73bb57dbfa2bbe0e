mod cli;
mod commands;
mod config;
mod error;
mod logging;
mod prompt;
mod ui;

use crate::cli::{Cli, Commands};
use crate::error::{CliError, Result};
use crate::ui::UiManager;
use clap::Parser;
use tokio::task;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() {
    if let Err(e) = run_app().await {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        eprintln!("\n❌ Error: {}", e);
        std::process::exit(1);
    }
}

async fn run_app() -> Result<()> {
    let cli = Cli::parse();
    logging::setup_logging(cli.verbose, cli.quiet, cli.log_file.as_deref())?;

    std::panic::set_hook(Box::new(|pi| {
        error!("{}", pi);
    }));

    let (ui_manager, ui_sender, shutdown_sender) = UiManager::new();
    let decisions = prompt::decisions_for(
        cli.yes,
        cli.non_interactive,
        Some(ui_manager.multi_progress()),
    );
    let ui_handle = task::spawn(ui_manager.run());

    let command_result = async {
        info!("🚀 xtalevo v{} starting up.", env!("CARGO_PKG_VERSION"));
        debug!("Full CLI arguments parsed: {:?}", &cli);

        if let Some(num_threads) = cli.threads {
            info!(
                "Setting Rayon global thread pool to {} threads.",
                num_threads
            );
            rayon::ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .build_global()
                .map_err(|e| {
                    CliError::Other(anyhow::anyhow!("Failed to build global thread pool: {}", e))
                })?;
        }

        match cli.command {
            Commands::Search(args) => {
                info!("Dispatching to 'search' command.");
                commands::search::run(args, decisions.as_ref(), ui_sender).await
            }
            Commands::Resume(args) => {
                info!("Dispatching to 'resume' command.");
                commands::resume::run(args, decisions.as_ref(), ui_sender).await
            }
            Commands::Check(args) => {
                info!("Dispatching to 'check' command.");
                commands::check::run(args).await
            }
            Commands::Dedupe(args) => {
                info!("Dispatching to 'dedupe' command.");
                commands::dedupe::run(args, decisions.as_ref()).await
            }
        }
    }
    .await;

    match &command_result {
        Ok(_) => {
            info!("✅ Command completed successfully.");
        }
        Err(e) => {
            error!("❌ Command failed: {}", e);
        }
    }

    if shutdown_sender.send(true).is_err() {
        warn!("UI manager may have already exited before shutdown signal.");
    }

    ui_handle
        .await
        .map_err(|e| CliError::Other(anyhow::anyhow!("UI manager task failed: {}", e)))?;

    command_result
}
