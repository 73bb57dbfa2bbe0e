use super::{build_backend, format_summary};
use crate::cli::ResumeArgs;
use crate::error::{CliError, Result};
use crate::ui::{CliProgressHandler, UiEvent};
use tokio::sync::mpsc;
use tracing::{info, warn};
use xtalevo::engine::decision::DecisionProvider;
use xtalevo::engine::progress::ProgressReporter;
use xtalevo::workflows::search::SearchOrchestrator;

pub async fn run(
    args: ResumeArgs,
    decisions: &dyn DecisionProvider,
    ui_sender: mpsc::Sender<UiEvent>,
) -> Result<()> {
    if !args.session.is_dir() {
        return Err(CliError::Argument(format!(
            "Session directory does not exist: {}",
            args.session.display()
        )));
    }

    let progress_handler = CliProgressHandler::new(ui_sender);
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());

    info!(session = %args.session.display(), read_only = args.read_only, "Resuming search session.");
    let summary = tokio::task::block_in_place(|| -> Result<_> {
        let mut orchestrator = SearchOrchestrator::resume(
            &args.session,
            args.read_only,
            |config| Ok(build_backend(config)),
            decisions,
            &reporter,
        )?;
        if orchestrator.is_read_only() {
            warn!("Session is open read-only; no jobs will be submitted.");
            println!("Session opened read-only; no jobs will be submitted.");
        }
        let outcome = orchestrator.run();
        let summary = orchestrator.shutdown()?;
        outcome?;
        Ok(summary)
    })?;

    println!("{}", format_summary(&summary, &args.session));
    Ok(())
}
