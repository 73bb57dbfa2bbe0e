pub mod defaults;

use crate::cli::ConfigArgs;
use crate::error::{CliError, Result};
use defaults::DefaultsConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;
use xtalevo::core::models::composition::Composition;
use xtalevo::engine::backend::BackendConfig;
use xtalevo::engine::config::{
    self as core_config, DuplicateTolerances, ExchangeConfig, FailureAction, LatticeLimits,
    OperatorConfig, OperatorWeights, PopulationConfig, RecombinationConfig, RippleConfig,
    VolumeLimits,
};
use xtalevo::workflows::search::SessionSettings;

#[derive(Deserialize, Debug, Default, Clone, Copy)]
#[serde(deny_unknown_fields)]
struct PartialOperatorWeights {
    recombination: Option<f64>,
    ripple: Option<f64>,
    exchange: Option<f64>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct PartialOperatorConfig {
    weights: Option<PartialOperatorWeights>,
    recombination: Option<RecombinationConfig>,
    ripple: Option<RippleConfig>,
    exchange: Option<ExchangeConfig>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct PartialDuplicateTolerances {
    enthalpy: Option<f64>,
    volume: Option<f64>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct PartialPopulationConfig {
    initial_structures: Option<usize>,
    selection_pool: Option<usize>,
    max_structures: Option<usize>,
    concurrent_jobs: Option<usize>,
    failure_limit: Option<u32>,
    failure_action: Option<FailureAction>,
}

/// A search configuration as read from a TOML file, before defaults and
/// command-line overrides are applied.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PartialSearchConfig {
    description: Option<String>,
    composition: Option<Composition>,
    lattice: Option<LatticeLimits>,
    volume: Option<VolumeLimits>,
    min_interatomic_distance: Option<f64>,
    symmetry_tolerance: Option<f64>,
    operators: Option<PartialOperatorConfig>,
    duplicates: Option<PartialDuplicateTolerances>,
    population: Option<PartialPopulationConfig>,
    seeds: Option<Vec<PathBuf>>,
    backend: Option<BackendConfig>,
}

/// Fully merged settings for one session.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub description: String,
    pub settings: SessionSettings,
}

impl PartialSearchConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        let mut partial: Self = toml::from_str(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })?;
        partial.resolve_seed_paths(path.parent().unwrap_or(Path::new("")));
        Ok(partial)
    }

    /// Seeds named in the file are relative to the file itself.
    fn resolve_seed_paths(&mut self, base: &Path) {
        if let Some(seeds) = self.seeds.as_mut() {
            for seed in seeds.iter_mut().filter(|s| s.is_relative()) {
                *seed = base.join(&*seed);
            }
        }
    }

    pub fn merge_with_cli(mut self, args: &ConfigArgs) -> Result<ResolvedConfig> {
        self.apply_set_values(&args.set_values)?;
        let defaults = DefaultsConfig::default();

        let population = self.merge_population(args, &defaults);
        let operators = self.merge_operators(&defaults);
        let duplicates = self.duplicates.take().unwrap_or_default();

        let mut seeds = self.seeds.take().unwrap_or_default();
        seeds.extend(args.seeds.iter().cloned());

        let search = core_config::SearchConfigBuilder::new()
            .composition(self.composition.take().ok_or_else(|| {
                CliError::Config("`composition` section is required.".to_string())
            })?)
            .lattice(
                self.lattice
                    .ok_or_else(|| CliError::Config("`lattice` section is required.".to_string()))?,
            )
            .volume(
                self.volume
                    .ok_or_else(|| CliError::Config("`volume` section is required.".to_string()))?,
            )
            .min_interatomic_distance(self.min_interatomic_distance)
            .symmetry_tolerance(
                self.symmetry_tolerance
                    .unwrap_or(defaults.symmetry_tolerance),
            )
            .operators(operators)
            .duplicates(DuplicateTolerances {
                enthalpy: duplicates.enthalpy.unwrap_or(defaults.duplicates.enthalpy),
                volume: duplicates.volume.unwrap_or(defaults.duplicates.volume),
            })
            .population(population)
            .seeds(seeds)
            .build()
            .map_err(|e| CliError::Config(e.to_string()))?;

        let backend = self
            .backend
            .take()
            .ok_or_else(|| CliError::Config("`backend` section is required.".to_string()))?;

        Ok(ResolvedConfig {
            description: self.description.take().unwrap_or(defaults.description),
            settings: SessionSettings { search, backend },
        })
    }

    fn merge_population(&mut self, args: &ConfigArgs, defaults: &DefaultsConfig) -> PopulationConfig {
        let file = self.population.take().unwrap_or_default();
        let fallback = defaults.population;
        PopulationConfig {
            initial_structures: args
                .initial_structures
                .or(file.initial_structures)
                .unwrap_or(fallback.initial_structures),
            selection_pool: file.selection_pool.unwrap_or(fallback.selection_pool),
            max_structures: args
                .max_structures
                .or(file.max_structures)
                .unwrap_or(fallback.max_structures),
            concurrent_jobs: args
                .concurrent_jobs
                .or(file.concurrent_jobs)
                .unwrap_or(fallback.concurrent_jobs),
            failure_limit: file.failure_limit.unwrap_or(fallback.failure_limit),
            failure_action: file.failure_action.unwrap_or(fallback.failure_action),
        }
    }

    fn merge_operators(&mut self, defaults: &DefaultsConfig) -> OperatorConfig {
        let file = self.operators.take().unwrap_or_default();
        let weights = file.weights.unwrap_or_default();
        OperatorConfig {
            weights: OperatorWeights {
                recombination: weights.recombination.unwrap_or(defaults.weights.recombination),
                ripple: weights.ripple.unwrap_or(defaults.weights.ripple),
                exchange: weights.exchange.unwrap_or(defaults.weights.exchange),
            },
            recombination: file.recombination.unwrap_or(defaults.recombination),
            ripple: file.ripple.unwrap_or(defaults.ripple),
            exchange: file.exchange.unwrap_or(defaults.exchange),
        }
    }

    fn apply_set_values(&mut self, set_values: &[String]) -> Result<()> {
        for kv_pair in set_values {
            let Some((key, value_str)) = kv_pair.split_once('=') else {
                return Err(CliError::Config(format!(
                    "Invalid --set format: '{}'. Expected KEY=VALUE.",
                    kv_pair
                )));
            };
            let key = key.trim();
            let value_str = value_str.trim();

            match key {
                "description" => self.description = Some(value_str.to_string()),
                "symmetry-tolerance" => self.symmetry_tolerance = Some(parse_value(key, value_str)?),
                "min-interatomic-distance" => {
                    self.min_interatomic_distance = Some(parse_value(key, value_str)?)
                }
                "duplicates.enthalpy" => {
                    self.duplicates_mut().enthalpy = Some(parse_value(key, value_str)?)
                }
                "duplicates.volume" => {
                    self.duplicates_mut().volume = Some(parse_value(key, value_str)?)
                }
                "operators.weights.recombination" => {
                    self.weights_mut().recombination = Some(parse_value(key, value_str)?)
                }
                "operators.weights.ripple" => {
                    self.weights_mut().ripple = Some(parse_value(key, value_str)?)
                }
                "operators.weights.exchange" => {
                    self.weights_mut().exchange = Some(parse_value(key, value_str)?)
                }
                "population.initial-structures" => {
                    self.population_mut().initial_structures = Some(parse_value(key, value_str)?)
                }
                "population.selection-pool" => {
                    self.population_mut().selection_pool = Some(parse_value(key, value_str)?)
                }
                "population.max-structures" => {
                    self.population_mut().max_structures = Some(parse_value(key, value_str)?)
                }
                "population.concurrent-jobs" => {
                    self.population_mut().concurrent_jobs = Some(parse_value(key, value_str)?)
                }
                "population.failure-limit" => {
                    self.population_mut().failure_limit = Some(parse_value(key, value_str)?)
                }
                "population.failure-action" => {
                    self.population_mut().failure_action = Some(match value_str {
                        "kill" => FailureAction::Kill,
                        "replace" => FailureAction::Replace,
                        other => {
                            return Err(CliError::Config(format!(
                                "Invalid value for {}: '{}'. Expected 'kill' or 'replace'.",
                                key, other
                            )));
                        }
                    })
                }
                _ => {
                    return Err(CliError::Config(format!(
                        "Unsupported configuration key for --set: '{}'",
                        key
                    )));
                }
            }
        }
        Ok(())
    }

    fn duplicates_mut(&mut self) -> &mut PartialDuplicateTolerances {
        self.duplicates.get_or_insert_with(Default::default)
    }

    fn weights_mut(&mut self) -> &mut PartialOperatorWeights {
        self.operators
            .get_or_insert_with(Default::default)
            .weights
            .get_or_insert_with(Default::default)
    }

    fn population_mut(&mut self) -> &mut PartialPopulationConfig {
        self.population.get_or_insert_with(Default::default)
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        CliError::Config(format!(
            "Invalid {} value for {}: {}",
            std::any::type_name::<T>(),
            key,
            value
        ))
    })
}
