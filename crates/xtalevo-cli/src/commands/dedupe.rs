use super::{build_backend, format_summary};
use crate::cli::DedupeArgs;
use crate::error::{CliError, Result};
use tracing::info;
use xtalevo::engine::decision::DecisionProvider;
use xtalevo::engine::progress::ProgressReporter;
use xtalevo::workflows::search::SearchOrchestrator;

/// Reopens a session read-only, relabels its duplicates from scratch and
/// saves it again.
pub async fn run(args: DedupeArgs, decisions: &dyn DecisionProvider) -> Result<()> {
    if !args.session.is_dir() {
        return Err(CliError::Argument(format!(
            "Session directory does not exist: {}",
            args.session.display()
        )));
    }

    let reporter = ProgressReporter::new();
    let (found, summary) = tokio::task::block_in_place(|| -> Result<_> {
        let orchestrator = SearchOrchestrator::resume(
            &args.session,
            true,
            |config| Ok(build_backend(config)),
            decisions,
            &reporter,
        )?;
        let found = orchestrator.dedupe();
        Ok((found, orchestrator.shutdown()?))
    })?;

    info!(duplicates = found, "Duplicate labels recomputed.");
    println!("{} duplicate(s) marked.", found);
    println!("{}", format_summary(&summary, &args.session));
    Ok(())
}
