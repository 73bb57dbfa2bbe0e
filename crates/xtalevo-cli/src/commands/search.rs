use super::{build_backend, format_summary};
use crate::cli::SearchArgs;
use crate::config::PartialSearchConfig;
use crate::error::Result;
use crate::ui::{CliProgressHandler, UiEvent};
use tokio::sync::mpsc;
use tracing::info;
use xtalevo::engine::decision::DecisionProvider;
use xtalevo::engine::progress::ProgressReporter;
use xtalevo::workflows::search::SearchOrchestrator;

pub async fn run(
    args: SearchArgs,
    decisions: &dyn DecisionProvider,
    ui_sender: mpsc::Sender<UiEvent>,
) -> Result<()> {
    let partial = PartialSearchConfig::from_file(&args.config.config)?;
    info!("Merging configuration from file and CLI arguments...");
    let mut resolved = partial.merge_with_cli(&args.config)?;
    if let Some(description) = args.description {
        resolved.description = description;
    }

    let backend = build_backend(&resolved.settings.backend);
    info!(backend = backend.id(), session = %args.output.display(), "Starting a new search session.");

    let progress_handler = CliProgressHandler::new(ui_sender);
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());

    let summary = tokio::task::block_in_place(|| -> Result<_> {
        let mut orchestrator = SearchOrchestrator::start(
            resolved.settings,
            &resolved.description,
            Some(args.output.clone()),
            backend,
            decisions,
            &reporter,
        )?;
        let outcome = orchestrator.run();
        let summary = orchestrator.shutdown()?;
        outcome?;
        Ok(summary)
    })?;

    println!("{}", format_summary(&summary, &args.output));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::ConfigArgs;
    use crate::config::tests::{MINIMAL_CONFIG, write_config_file};
    use xtalevo::engine::decision::FixedDecisions;
    use xtalevo::workflows::search::SessionFile;

    #[tokio::test(flavor = "multi_thread")]
    async fn search_runs_to_the_population_limit_and_saves() {
        let session = tempfile::tempdir().unwrap();
        let config = write_config_file("search_command.toml", MINIMAL_CONFIG);
        let args = SearchArgs {
            config: ConfigArgs {
                config,
                max_structures: Some(6),
                ..ConfigArgs::default()
            },
            output: session.path().join("run"),
            description: Some("command test".into()),
        };
        let (sender, _receiver) = mpsc::channel(4096);

        run(args, &FixedDecisions::accept_all(), sender).await.unwrap();

        let state = SessionFile::load_for_resume(&session.path().join("run")).unwrap();
        assert!(state.save_successful);
        assert_eq!(state.description, "command test");
        assert_eq!(state.config.search.population.max_structures, 6);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalid_limits_are_reported_before_anything_is_written() {
        let session = tempfile::tempdir().unwrap();
        let config = write_config_file(
            "search_illogical.toml",
            &MINIMAL_CONFIG.replace("min = 40.0", "min = 4000.0").replace("max = 200.0", "max = 5000.0"),
        );
        let args = SearchArgs {
            config: ConfigArgs {
                config,
                ..ConfigArgs::default()
            },
            output: session.path().join("run"),
            description: None,
        };
        let (sender, _receiver) = mpsc::channel(64);

        assert!(run(args, &FixedDecisions::accept_all(), sender).await.is_err());
        assert!(!session.path().join("run").exists());
    }
}
