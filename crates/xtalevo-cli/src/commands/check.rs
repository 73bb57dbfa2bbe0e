use crate::cli::CheckArgs;
use crate::config::PartialSearchConfig;
use crate::error::{CliError, Result};
use tracing::info;

/// Merges the configuration exactly as `search` would and runs the limit
/// checks, without touching the filesystem or any remote host.
pub async fn run(args: CheckArgs) -> Result<()> {
    let partial = PartialSearchConfig::from_file(&args.config.config)?;
    let resolved = partial.merge_with_cli(&args.config)?;
    let search = &resolved.settings.search;
    search
        .check_limits()
        .map_err(|e| CliError::Config(e.to_string()))?;

    if let Some(seed) = search.seeds.iter().find(|s| !s.is_file()) {
        return Err(CliError::Config(format!(
            "Seed file does not exist: {}",
            seed.display()
        )));
    }

    info!("Configuration passed all checks.");
    println!(
        "✓ '{}': {} atom(s) per cell, backend '{}', {} initial / {} maximum structures, {} concurrent job(s).",
        resolved.description,
        search.composition.total_atoms(),
        resolved.settings.backend.id(),
        search.population.initial_structures,
        search.population.max_structures,
        search.population.concurrent_jobs
    );
    Ok(())
}
