use crate::core::models::composition::Composition;
use crate::core::models::lattice::{Lattice, LatticeParameter};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Illogical {parameter} limits: min {min} is greater than max {max}")]
    IllogicalLimits {
        parameter: &'static str,
        min: f64,
        max: f64,
    },

    #[error("Illogical volume limits: {0}")]
    IllogicalVolume(String),

    #[error("Composition must contain at least one atom")]
    EmptyComposition,

    #[error("Invalid operator weights: {0}")]
    InvalidWeights(String),

    #[error("Selection pool must hold at least one structure")]
    EmptySelectionPool,
}

/// Inclusive range for a sampled parameter. `min == max` pins the value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParamRange {
    pub min: f64,
    pub max: f64,
}

impl ParamRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn fixed(value: f64) -> Self {
        Self::new(value, value)
    }

    pub fn is_pinned(&self) -> bool {
        self.min == self.max
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn sample(&self, rng: &mut impl Rng) -> f64 {
        if self.is_pinned() {
            self.min
        } else {
            self.min + rng.r#gen::<f64>() * (self.max - self.min)
        }
    }

    fn check(&self, parameter: &'static str) -> Result<(), ConfigError> {
        if self.min > self.max || !self.min.is_finite() || !self.max.is_finite() {
            return Err(ConfigError::IllogicalLimits {
                parameter,
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LatticeLimits {
    pub a: ParamRange,
    pub b: ParamRange,
    pub c: ParamRange,
    pub alpha: ParamRange,
    pub beta: ParamRange,
    pub gamma: ParamRange,
}

impl LatticeLimits {
    pub fn get(&self, parameter: LatticeParameter) -> &ParamRange {
        match parameter {
            LatticeParameter::A => &self.a,
            LatticeParameter::B => &self.b,
            LatticeParameter::C => &self.c,
            LatticeParameter::Alpha => &self.alpha,
            LatticeParameter::Beta => &self.beta,
            LatticeParameter::Gamma => &self.gamma,
        }
    }

    /// Draws every parameter uniformly from its range.
    pub fn sample(&self, rng: &mut impl Rng) -> Lattice {
        Lattice::new(
            self.a.sample(rng),
            self.b.sample(rng),
            self.c.sample(rng),
            self.alpha.sample(rng),
            self.beta.sample(rng),
            self.gamma.sample(rng),
        )
    }

    fn min_length_product(&self) -> f64 {
        self.a.min * self.b.min * self.c.min
    }

    fn max_length_product(&self) -> f64 {
        self.a.max * self.b.max * self.c.max
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", deny_unknown_fields)]
pub enum VolumeLimits {
    Fixed { value: f64 },
    Range { min: f64, max: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperatorWeights {
    /// Percent chance of recombination.
    pub recombination: f64,
    /// Percent chance of ripple.
    pub ripple: f64,
    /// Percent chance of exchange; whatever the other two leave is used in
    /// practice.
    pub exchange: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RecombinationConfig {
    /// Minimum percentage of the offspring taken from either parent.
    pub min_contribution: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RippleConfig {
    pub strain_stdev: ParamRange,
    /// Displacement amplitude in Angstroms.
    pub amplitude: ParamRange,
    /// Number of full waves along the two directions perpendicular to the
    /// displacement axis.
    pub waves: (u32, u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ExchangeConfig {
    pub max_strain_stdev: f64,
    /// Number of atom pairs swapped.
    pub exchanges: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperatorConfig {
    pub weights: OperatorWeights,
    pub recombination: RecombinationConfig,
    pub ripple: RippleConfig,
    pub exchange: ExchangeConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DuplicateTolerances {
    pub enthalpy: f64,
    pub volume: f64,
}

impl DuplicateTolerances {
    pub fn matches(&self, enthalpy: (f64, f64), volume: (f64, f64)) -> bool {
        (enthalpy.0 - enthalpy.1).abs() <= self.enthalpy
            && (volume.0 - volume.1).abs() <= self.volume
    }
}

/// What happens to a structure whose optimization failed `failure-limit` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureAction {
    Kill,
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PopulationConfig {
    pub initial_structures: usize,
    /// Number of best structures parents are drawn from.
    pub selection_pool: usize,
    /// The search stops once this many structures exist.
    pub max_structures: usize,
    pub concurrent_jobs: usize,
    pub failure_limit: u32,
    pub failure_action: FailureAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SearchConfig {
    pub composition: Composition,
    pub lattice: LatticeLimits,
    pub volume: VolumeLimits,
    pub min_interatomic_distance: Option<f64>,
    pub symmetry_tolerance: f64,
    pub operators: OperatorConfig,
    pub duplicates: DuplicateTolerances,
    pub population: PopulationConfig,
    #[serde(default)]
    pub seeds: Vec<PathBuf>,
}

impl SearchConfig {
    /// Sanity checks run once before a session starts.
    pub fn check_limits(&self) -> Result<(), ConfigError> {
        if self.composition.total_atoms() == 0 {
            return Err(ConfigError::EmptyComposition);
        }

        for parameter in LatticeParameter::ALL {
            self.lattice.get(parameter).check(parameter.name())?;
        }

        let min_product = self.lattice.min_length_product();
        let max_product = self.lattice.max_length_product();
        match self.volume {
            VolumeLimits::Fixed { value } => {
                if min_product > value || max_product < value {
                    return Err(ConfigError::IllogicalVolume(format!(
                        "fixed volume {value} is outside the range [{min_product}, {max_product}] spanned by the cell lengths"
                    )));
                }
            }
            VolumeLimits::Range { min, max } => {
                if min > max {
                    return Err(ConfigError::IllogicalVolume(format!(
                        "min {min} is greater than max {max}"
                    )));
                }
                if min_product > max || max_product < min {
                    return Err(ConfigError::IllogicalVolume(format!(
                        "range [{min}, {max}] does not overlap [{min_product}, {max_product}] spanned by the cell lengths"
                    )));
                }
            }
        }

        if self.population.selection_pool == 0 {
            return Err(ConfigError::EmptySelectionPool);
        }

        let weights = &self.operators.weights;
        let all = [weights.recombination, weights.ripple, weights.exchange];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ConfigError::InvalidWeights(
                "weights must be finite and non-negative".to_string(),
            ));
        }
        if all.iter().sum::<f64>() <= 0.0 {
            return Err(ConfigError::InvalidWeights(
                "at least one operator must have a positive weight".to_string(),
            ));
        }
        let contribution = self.operators.recombination.min_contribution;
        if !(0.0..=50.0).contains(&contribution) {
            return Err(ConfigError::InvalidWeights(format!(
                "recombination min-contribution {contribution} must lie in [0, 50]"
            )));
        }
        self.operators.ripple.strain_stdev.check("ripple strain-stdev")?;
        self.operators.ripple.amplitude.check("ripple amplitude")?;
        if self.operators.ripple.waves.0 == 0 || self.operators.ripple.waves.1 == 0 {
            return Err(ConfigError::InvalidWeights(
                "ripple waves must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct SearchConfigBuilder {
    composition: Option<Composition>,
    lattice: Option<LatticeLimits>,
    volume: Option<VolumeLimits>,
    min_interatomic_distance: Option<f64>,
    symmetry_tolerance: Option<f64>,
    operators: Option<OperatorConfig>,
    duplicates: Option<DuplicateTolerances>,
    population: Option<PopulationConfig>,
    seeds: Vec<PathBuf>,
}

impl SearchConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn composition(mut self, composition: Composition) -> Self {
        self.composition = Some(composition);
        self
    }
    pub fn lattice(mut self, lattice: LatticeLimits) -> Self {
        self.lattice = Some(lattice);
        self
    }
    pub fn volume(mut self, volume: VolumeLimits) -> Self {
        self.volume = Some(volume);
        self
    }
    pub fn min_interatomic_distance(mut self, distance: Option<f64>) -> Self {
        self.min_interatomic_distance = distance;
        self
    }
    pub fn symmetry_tolerance(mut self, tolerance: f64) -> Self {
        self.symmetry_tolerance = Some(tolerance);
        self
    }
    pub fn operators(mut self, operators: OperatorConfig) -> Self {
        self.operators = Some(operators);
        self
    }
    pub fn duplicates(mut self, tolerances: DuplicateTolerances) -> Self {
        self.duplicates = Some(tolerances);
        self
    }
    pub fn population(mut self, population: PopulationConfig) -> Self {
        self.population = Some(population);
        self
    }
    pub fn seeds(mut self, seeds: Vec<PathBuf>) -> Self {
        self.seeds = seeds;
        self
    }

    pub fn build(self) -> Result<SearchConfig, ConfigError> {
        Ok(SearchConfig {
            composition: self
                .composition
                .ok_or(ConfigError::MissingParameter("composition"))?,
            lattice: self
                .lattice
                .ok_or(ConfigError::MissingParameter("lattice"))?,
            volume: self.volume.ok_or(ConfigError::MissingParameter("volume"))?,
            min_interatomic_distance: self.min_interatomic_distance,
            symmetry_tolerance: self
                .symmetry_tolerance
                .ok_or(ConfigError::MissingParameter("symmetry_tolerance"))?,
            operators: self
                .operators
                .ok_or(ConfigError::MissingParameter("operators"))?,
            duplicates: self
                .duplicates
                .ok_or(ConfigError::MissingParameter("duplicates"))?,
            population: self
                .population
                .ok_or(ConfigError::MissingParameter("population"))?,
            seeds: self.seeds,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A small, internally consistent configuration shared by engine tests.
    pub(crate) fn sample_config() -> SearchConfig {
        SearchConfigBuilder::new()
            .composition(Composition::new().with("A", 2).with("B", 2))
            .lattice(LatticeLimits {
                a: ParamRange::new(3.0, 8.0),
                b: ParamRange::new(3.0, 8.0),
                c: ParamRange::new(3.0, 8.0),
                alpha: ParamRange::new(60.0, 120.0),
                beta: ParamRange::new(60.0, 120.0),
                gamma: ParamRange::new(60.0, 120.0),
            })
            .volume(VolumeLimits::Range {
                min: 40.0,
                max: 200.0,
            })
            .min_interatomic_distance(Some(1.0))
            .symmetry_tolerance(0.05)
            .operators(OperatorConfig {
                weights: OperatorWeights {
                    recombination: 15.0,
                    ripple: 50.0,
                    exchange: 35.0,
                },
                recombination: RecombinationConfig {
                    min_contribution: 25.0,
                },
                ripple: RippleConfig {
                    strain_stdev: ParamRange::new(0.0, 0.2),
                    amplitude: ParamRange::new(0.1, 0.5),
                    waves: (1, 1),
                },
                exchange: ExchangeConfig {
                    max_strain_stdev: 0.2,
                    exchanges: 1,
                },
            })
            .duplicates(DuplicateTolerances {
                enthalpy: 0.1,
                volume: 0.5,
            })
            .population(PopulationConfig {
                initial_structures: 6,
                selection_pool: 10,
                max_structures: 12,
                concurrent_jobs: 3,
                failure_limit: 2,
                failure_action: FailureAction::Replace,
            })
            .build()
            .unwrap()
    }

    #[test]
    fn builder_reports_first_missing_parameter() {
        let err = SearchConfigBuilder::new()
            .composition(Composition::new().with("A", 1))
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::MissingParameter("lattice"));
    }

    #[test]
    fn sample_config_passes_limit_checks() {
        assert_eq!(sample_config().check_limits(), Ok(()));
    }

    #[test]
    fn inverted_lattice_range_is_illogical() {
        let mut config = sample_config();
        config.lattice.beta = ParamRange::new(100.0, 80.0);
        assert_eq!(
            config.check_limits(),
            Err(ConfigError::IllogicalLimits {
                parameter: "beta",
                min: 100.0,
                max: 80.0
            })
        );
    }

    #[test]
    fn fixed_volume_must_be_reachable_from_cell_lengths() {
        let mut config = sample_config();
        config.volume = VolumeLimits::Fixed { value: 10.0 };
        assert!(matches!(
            config.check_limits(),
            Err(ConfigError::IllogicalVolume(_))
        ));
        config.volume = VolumeLimits::Fixed { value: 100.0 };
        assert_eq!(config.check_limits(), Ok(()));
    }

    #[test]
    fn volume_range_must_overlap_cell_length_products() {
        let mut config = sample_config();
        config.volume = VolumeLimits::Range {
            min: 600.0,
            max: 700.0,
        };
        assert!(matches!(
            config.check_limits(),
            Err(ConfigError::IllogicalVolume(_))
        ));
        config.volume = VolumeLimits::Range {
            min: 150.0,
            max: 100.0,
        };
        assert!(matches!(
            config.check_limits(),
            Err(ConfigError::IllogicalVolume(_))
        ));
    }

    #[test]
    fn empty_composition_is_rejected() {
        let mut config = sample_config();
        config.composition = Composition::new();
        assert_eq!(config.check_limits(), Err(ConfigError::EmptyComposition));
    }

    #[test]
    fn empty_selection_pool_is_rejected() {
        let mut config = sample_config();
        config.population.selection_pool = 0;
        assert_eq!(config.check_limits(), Err(ConfigError::EmptySelectionPool));
    }

    #[test]
    fn negative_operator_weight_is_rejected() {
        let mut config = sample_config();
        config.operators.weights.ripple = -1.0;
        assert!(matches!(
            config.check_limits(),
            Err(ConfigError::InvalidWeights(_))
        ));
    }

    #[test]
    fn pinned_range_always_samples_its_value() {
        let mut rng = rand::thread_rng();
        let range = ParamRange::fixed(90.0);
        assert!(range.is_pinned());
        for _ in 0..10 {
            assert_eq!(range.sample(&mut rng), 90.0);
        }
    }

    #[test]
    fn config_survives_toml_round_trip() {
        let config = sample_config();
        let text = toml::to_string(&config).unwrap();
        let parsed: SearchConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
