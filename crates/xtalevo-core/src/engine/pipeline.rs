use super::config::SearchConfig;
use super::error::EngineError;
use super::generator::{CandidateGenerator, RANDOM_PROVENANCE};
use super::operators::{self, Operator, Parent};
use super::registry::PopulationRegistry;
use super::selection::ProbabilityTable;
use crate::core::models::structure::{Structure, StructureEntity};
use crate::core::symmetry::SymmetryClassifier;
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, instrument, trace, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Attempts per operator choice before the operator is reselected.
pub const MAX_OPERATOR_ATTEMPTS: usize = 1000;
/// Operator reselections before the pipeline falls back to a random structure.
pub const MAX_OPERATOR_RESELECTIONS: usize = 100;
/// Fewer ranked structures than this and offspring are generated randomly.
pub const MIN_RANKED_FOR_OPERATORS: usize = 3;

/// Generation number given to structures built from scratch.
pub const RANDOM_GENERATION: u32 = 1;

/// Produces new registered candidates, by genetic operation on the ranked
/// population where possible and from scratch otherwise.
pub struct OffspringPipeline {
    config: Arc<SearchConfig>,
    generator: CandidateGenerator,
    registry: Arc<PopulationRegistry>,
    classifier: Arc<dyn SymmetryClassifier>,
}

impl OffspringPipeline {
    pub fn new(
        config: Arc<SearchConfig>,
        registry: Arc<PopulationRegistry>,
        classifier: Arc<dyn SymmetryClassifier>,
    ) -> Self {
        Self {
            generator: CandidateGenerator::new(Arc::clone(&config)),
            config,
            registry,
            classifier,
        }
    }

    pub fn generator(&self) -> &CandidateGenerator {
        &self.generator
    }

    /// Generates, validates and registers one offspring.
    pub fn generate_offspring(&self, rng: &mut impl Rng) -> Result<StructureEntity, EngineError> {
        let mut ranked = self.registry.ranked();
        if ranked.len() < MIN_RANKED_FOR_OPERATORS {
            debug!(
                ranked = ranked.len(),
                "Too few optimized structures for genetic operators; generating randomly."
            );
            return self.generate_random(rng).map(|(entity, _)| entity);
        }

        let pool = self.config.population.selection_pool;
        ranked.truncate(pool + 1);
        // The structure just outside the pool only anchors the weight range.
        let reference = if ranked.len() > pool { ranked.pop() } else { None };
        let enthalpies: Vec<f64> = ranked.iter().map(|(h, _)| *h).collect();
        let table = match reference {
            Some((worst, _)) => ProbabilityTable::with_reference(&enthalpies, worst)?,
            None => ProbabilityTable::from_enthalpies(&enthalpies)?,
        };

        for _ in 0..MAX_OPERATOR_RESELECTIONS {
            let operator = Operator::choose(rng.r#gen::<f64>(), &self.config.operators.weights);
            let mut parents = Vec::with_capacity(operator.parent_count());
            for _ in 0..operator.parent_count() {
                let index = table.sample(rng.r#gen::<f64>());
                parents.push(Parent::from_structure(ranked[index].1.snapshot()));
            }

            for attempt in 0..MAX_OPERATOR_ATTEMPTS {
                let Some(mut offspring) =
                    operators::apply(operator, &parents, &self.config.operators, rng)
                else {
                    break;
                };
                match self.generator.validate(&mut offspring.structure) {
                    Ok(()) => {
                        trace!(%operator, attempt, "Offspring accepted.");
                        return Ok(self.adopt(
                            offspring.structure,
                            offspring.generation,
                            offspring.provenance,
                        ));
                    }
                    Err(reason) => trace!(%operator, %reason, "Offspring rejected."),
                }
            }
            warn!(
                %operator,
                attempts = MAX_OPERATOR_ATTEMPTS,
                "Unable to perform {operator} after {MAX_OPERATOR_ATTEMPTS} tries. Reselecting operator..."
            );
        }

        warn!(
            reselections = MAX_OPERATOR_RESELECTIONS,
            "No operator produced a valid offspring; generating randomly."
        );
        self.generate_random(rng).map(|(entity, _)| entity)
    }

    /// Generates `count` offspring concurrently. Failures of one task do not
    /// affect the others.
    #[instrument(skip_all, name = "offspring_batch", fields(count = count))]
    pub fn generate_batch(&self, count: usize) -> Vec<Result<StructureEntity, EngineError>> {
        #[cfg(feature = "parallel")]
        let iter = (0..count).into_par_iter();
        #[cfg(not(feature = "parallel"))]
        let iter = 0..count;

        iter.map(|_| self.generate_offspring(&mut rand::thread_rng()))
            .collect()
    }

    /// Registers a valid random structure. Also returns how many invalid
    /// candidates were discarded on the way.
    pub fn generate_random(
        &self,
        rng: &mut impl Rng,
    ) -> Result<(StructureEntity, usize), EngineError> {
        let (structure, rejected) = self.generator.generate_valid_random(rng)?;
        trace!(rejected, "Random structure generated.");
        let entity = self.adopt(structure, RANDOM_GENERATION, RANDOM_PROVENANCE.to_string());
        Ok((entity, rejected))
    }

    /// Replaces the contents of `entity` with a fresh valid random structure,
    /// keeping its identity. `reason` is appended to the provenance.
    pub fn replace_with_random(
        &self,
        entity: &StructureEntity,
        reason: &str,
        rng: &mut impl Rng,
    ) -> Result<(), EngineError> {
        let (mut structure, _) = self.generator.generate_valid_random(rng)?;
        structure.symmetry = self.classifier.classify(&structure);
        let symmetry = structure.symmetry;
        let parents = if reason.is_empty() {
            RANDOM_PROVENANCE.to_string()
        } else {
            format!("{RANDOM_PROVENANCE} ({reason})")
        };
        let mut target = entity.write();
        target.replace_contents(structure, parents);
        target.symmetry = symmetry;
        Ok(())
    }

    /// Classifies and registers a structure built elsewhere.
    pub fn adopt(&self, mut structure: Structure, generation: u32, provenance: String) -> StructureEntity {
        structure.symmetry = self.classifier.classify(&structure);
        let entity = self.registry.register(structure, generation, provenance);
        {
            let s = entity.read();
            debug!(tag = %s.tag(), parents = %s.parents, "Registered new structure.");
        }
        entity
    }
}
