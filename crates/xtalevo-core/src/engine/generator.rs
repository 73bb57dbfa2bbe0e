use super::config::{LatticeLimits, SearchConfig, VolumeLimits};
use crate::core::models::lattice::{DEGENERACY_THRESHOLD, Lattice, LatticeParameter};
use crate::core::models::structure::{Status, Structure};
use rand::Rng;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Provenance of structures built from scratch.
pub const RANDOM_PROVENANCE: &str = "Randomly generated";

/// Random candidates tried by [`CandidateGenerator::generate_valid_random`]
/// before giving up.
pub const MAX_RANDOM_ATTEMPTS: usize = 10_000;

/// Why a candidate was discarded. Expected and frequent; never fatal.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Infeasibility {
    #[error("structure has no content")]
    EmptyStructure,
    #[error("could not place an atom of {element} at the required distance")]
    AtomPlacement { element: String },
    #[error("cell is degenerate")]
    DegenerateCell,
    #[error("lattice parameter {parameter} = {value} is outside its limits")]
    LatticeOutOfRange { parameter: &'static str, value: f64 },
    #[error("shortest interatomic distance {shortest} is below {minimum}")]
    InteratomicDistance { shortest: f64, minimum: f64 },
    #[error("no parents available")]
    NoParents,
}

/// Builds random candidates and checks candidates against the configured
/// physical limits.
#[derive(Debug, Clone)]
pub struct CandidateGenerator {
    config: Arc<SearchConfig>,
}

impl CandidateGenerator {
    pub fn new(config: Arc<SearchConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Draws a random cell within the limits and fills it with the
    /// configured composition, one atom at a time. If any atom cannot be
    /// placed the whole candidate is discarded.
    pub fn generate_random(&self, rng: &mut impl Rng) -> Result<Structure, Infeasibility> {
        let mut structure = Structure::new(self.config.lattice.sample(rng));
        if let VolumeLimits::Fixed { value } = self.config.volume {
            structure.set_volume(value);
        }

        for (element, count) in self.config.composition.iter() {
            for _ in 0..count {
                if !structure.add_atom_randomly(element, self.config.min_interatomic_distance, rng)
                {
                    trace!(element, "Atom placement failed.");
                    return Err(Infeasibility::AtomPlacement {
                        element: element.to_string(),
                    });
                }
            }
        }

        structure.parents = RANDOM_PROVENANCE.to_string();
        structure.status = Status::WaitingForOptimization;
        Ok(structure)
    }

    /// Repeats [`generate_random`](Self::generate_random) and
    /// [`validate`](Self::validate) until a candidate passes. Returns the
    /// candidate and the number of rejected attempts.
    pub fn generate_valid_random(
        &self,
        rng: &mut impl Rng,
    ) -> Result<(Structure, usize), Infeasibility> {
        let mut last = Infeasibility::EmptyStructure;
        for rejected in 0..MAX_RANDOM_ATTEMPTS {
            let attempt = self
                .generate_random(rng)
                .and_then(|mut s| self.validate(&mut s).map(|()| s));
            match attempt {
                Ok(structure) => return Ok((structure, rejected)),
                Err(reason) => {
                    debug!(%reason, "Random candidate rejected.");
                    last = reason;
                }
            }
        }
        warn!(
            attempts = MAX_RANDOM_ATTEMPTS,
            reason = %last,
            "No valid random structure found."
        );
        Err(last)
    }

    /// Brings a candidate into the configured limits where possible and
    /// rejects it otherwise.
    ///
    /// The candidate is modified in place (volume, pinned parameters, cell
    /// reduction) even when it is rejected for another reason afterwards, so
    /// rejected candidates must be discarded.
    pub fn validate(&self, structure: &mut Structure) -> Result<(), Infeasibility> {
        if structure.status == Status::Empty || structure.atoms.is_empty() {
            return Err(Infeasibility::EmptyStructure);
        }

        match self.config.volume {
            VolumeLimits::Fixed { value } => structure.set_volume(value),
            VolumeLimits::Range { min, max } => {
                let volume = structure.volume();
                if volume < min || volume > max {
                    let rescaled = pseudo_random_volume(volume, min, max);
                    debug!(from = volume, to = rescaled, "Rescaling volume into limits.");
                    structure.set_volume(rescaled);
                }
            }
        }

        structure.lattice = apply_pinned(&structure.lattice, &self.config.lattice);

        if !structure.lattice.is_well_formed() {
            return Err(Infeasibility::DegenerateCell);
        }

        structure.fix_angles();

        for parameter in LatticeParameter::ALL {
            let range = self.config.lattice.get(parameter);
            let value = structure.lattice.get(parameter);
            if !range.is_pinned() && !range.contains(value) {
                return Err(Infeasibility::LatticeOutOfRange {
                    parameter: parameter.name(),
                    value,
                });
            }
        }

        if let Some(minimum) = self.config.min_interatomic_distance {
            if let Some(shortest) = structure.shortest_interatomic_distance() {
                if shortest < minimum {
                    return Err(Infeasibility::InteratomicDistance { shortest, minimum });
                }
            }
        }
        Ok(())
    }
}

/// Maps an out-of-range volume into `[min, max]` using its fractional part
/// as the random variate, so no generator is needed.
pub fn pseudo_random_volume(volume: f64, min: f64, max: f64) -> f64 {
    let rescaled = (volume % 1.0).abs() * (max - min) + min;
    if rescaled.abs() < DEGENERACY_THRESHOLD {
        (max - min) * 0.5 + min
    } else {
        rescaled
    }
}

/// Sets every pinned parameter to its value, then scales the free lengths
/// uniformly so the cell keeps its volume.
pub fn apply_pinned(lattice: &Lattice, limits: &LatticeLimits) -> Lattice {
    let pinned: Vec<LatticeParameter> = LatticeParameter::ALL
        .into_iter()
        .filter(|&p| limits.get(p).is_pinned() && lattice.get(p) != limits.get(p).min)
        .collect();
    if pinned.is_empty() {
        return *lattice;
    }

    let volume = lattice.volume();
    let mut result = *lattice;
    for &p in &pinned {
        result.set(p, limits.get(p).min);
    }

    let free: Vec<LatticeParameter> = LatticeParameter::ALL
        .into_iter()
        .filter(|p| p.is_length() && !limits.get(*p).is_pinned())
        .collect();
    let current = result.volume();
    if free.is_empty() || current <= DEGENERACY_THRESHOLD || !current.is_finite() {
        return result;
    }
    let factor = (volume / current).powf(1.0 / free.len() as f64);
    for p in free {
        result.set(p, result.get(p) * factor);
    }
    result
}
