use xtalevo::engine::config::{
    DuplicateTolerances, ExchangeConfig, FailureAction, OperatorWeights, ParamRange,
    PopulationConfig, RecombinationConfig, RippleConfig,
};

/// Values used for every setting the configuration file leaves out.
pub struct DefaultsConfig {
    pub description: String,
    pub symmetry_tolerance: f64,
    pub weights: OperatorWeights,
    pub recombination: RecombinationConfig,
    pub ripple: RippleConfig,
    pub exchange: ExchangeConfig,
    pub duplicates: DuplicateTolerances,
    pub population: PopulationConfig,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            description: "xtalevo search".to_string(),
            symmetry_tolerance: 0.05,
            weights: OperatorWeights {
                recombination: 15.0,
                ripple: 50.0,
                exchange: 35.0,
            },
            recombination: RecombinationConfig {
                min_contribution: 25.0,
            },
            ripple: RippleConfig {
                strain_stdev: ParamRange::new(0.0, 0.5),
                amplitude: ParamRange::new(0.1, 1.0),
                waves: (1, 1),
            },
            exchange: ExchangeConfig {
                max_strain_stdev: 0.5,
                exchanges: 4,
            },
            duplicates: DuplicateTolerances {
                enthalpy: 0.01,
                volume: 0.1,
            },
            population: PopulationConfig {
                initial_structures: 20,
                selection_pool: 20,
                max_structures: 100,
                concurrent_jobs: 5,
                failure_limit: 2,
                failure_action: FailureAction::Replace,
            },
        }
    }
}
