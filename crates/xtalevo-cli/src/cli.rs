use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    author = "Tony Kan, Ted Yu",
    version,
    about = "xtalevo - Evolutionary crystal structure search with local or remote optimization jobs.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Set the number of threads for offspring generation and job dispatch.
    /// Defaults to the number of available logical cores.
    #[arg(short = 'j', long, global = true, value_name = "NUM")]
    pub threads: Option<usize>,

    /// Answer "yes" to every question (trust host keys, resume job submission).
    #[arg(short = 'y', long, global = true, conflicts_with = "non_interactive")]
    pub yes: bool,

    /// Never prompt; every question is answered "no" and no credential is offered.
    #[arg(long, global = true)]
    pub non_interactive: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a new search session from a configuration file.
    Search(SearchArgs),
    /// Continue a saved search session.
    Resume(ResumeArgs),
    /// Validate a configuration file without starting a search.
    Check(CheckArgs),
    /// Recompute duplicate labels of a saved session offline.
    Dedupe(DedupeArgs),
}

/// Configuration file plus command-line overrides, shared by `search` and `check`.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Path to the search configuration file in TOML format.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub config: PathBuf,

    /// Override `population.initial-structures` from the config file.
    #[arg(long, value_name = "INT")]
    pub initial_structures: Option<usize>,

    /// Override `population.max-structures` from the config file.
    #[arg(short = 'n', long, value_name = "INT")]
    pub max_structures: Option<usize>,

    /// Override `population.concurrent-jobs` from the config file.
    #[arg(long, value_name = "INT")]
    pub concurrent_jobs: Option<usize>,

    /// Add a seed structure listing. Can be used multiple times.
    #[arg(long = "seed", value_name = "PATH")]
    pub seeds: Vec<PathBuf>,

    /// Set a specific configuration value, overriding the config file.
    /// Can be used multiple times. Example: -S population.failure-action=kill
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,
}

/// Arguments for the `search` subcommand.
#[derive(Args, Debug)]
pub struct SearchArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Session directory receiving the session file and one directory per structure.
    #[arg(short, long, required = true, value_name = "DIR")]
    pub output: PathBuf,

    /// Free-form description stored with the session.
    #[arg(short, long, value_name = "TEXT")]
    pub description: Option<String>,
}

/// Arguments for the `resume` subcommand.
#[derive(Args, Debug)]
pub struct ResumeArgs {
    /// Session directory holding `xtalevo.state`.
    #[arg(required = true, value_name = "DIR")]
    pub session: PathBuf,

    /// Open the session without connecting or submitting jobs.
    #[arg(long)]
    pub read_only: bool,
}

/// Arguments for the `check` subcommand.
#[derive(Args, Debug)]
pub struct CheckArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
}

/// Arguments for the `dedupe` subcommand.
#[derive(Args, Debug)]
pub struct DedupeArgs {
    /// Session directory holding `xtalevo.state`.
    #[arg(required = true, value_name = "DIR")]
    pub session: PathBuf,
}
