//! Stochastic structural transformations producing offspring from parents.
//!
//! Operators are pure: they read cloned parent data and return a new
//! [`Structure`]; they never touch the registry or parent locks.

pub mod exchange;
pub mod recombination;
pub mod ripple;

use super::config::{OperatorConfig, OperatorWeights};
use crate::core::models::lattice::Lattice;
use crate::core::models::structure::{Status, Structure};
use nalgebra::Matrix3;
use rand::Rng;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Recombination,
    Ripple,
    Exchange,
}

impl Operator {
    /// Picks an operator from one uniform draw in `[0, 1)` against the
    /// percent weights. Exchange takes whatever the other two leave.
    pub fn choose(draw: f64, weights: &OperatorWeights) -> Operator {
        let recombination = weights.recombination / 100.0;
        let ripple = recombination + weights.ripple / 100.0;
        if draw < recombination {
            Operator::Recombination
        } else if draw < ripple {
            Operator::Ripple
        } else {
            Operator::Exchange
        }
    }

    /// Number of parents the operator consumes.
    pub fn parent_count(&self) -> usize {
        match self {
            Operator::Recombination => 2,
            Operator::Ripple | Operator::Exchange => 1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operator::Recombination => "recombination",
            Operator::Ripple => "ripple",
            Operator::Exchange => "exchange",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parent data copied out under a short read lock.
#[derive(Debug, Clone)]
pub struct Parent {
    pub structure: Structure,
    pub generation: u32,
    pub id: u32,
}

impl Parent {
    pub fn from_structure(structure: Structure) -> Self {
        Self {
            generation: structure.generation,
            id: structure.id,
            structure,
        }
    }

    fn tag(&self) -> String {
        format!("{}x{}", self.generation, self.id)
    }
}

/// A candidate produced by one operator application.
#[derive(Debug, Clone)]
pub struct Offspring {
    pub structure: Structure,
    pub provenance: String,
    /// One more than the newest parent generation.
    pub generation: u32,
}

/// Applies `operator` to `parents` (which must hold at least
/// [`Operator::parent_count`] entries).
pub fn apply(
    operator: Operator,
    parents: &[Parent],
    config: &OperatorConfig,
    rng: &mut impl Rng,
) -> Option<Offspring> {
    let offspring = match operator {
        Operator::Recombination => {
            let [first, second, ..] = parents else {
                return None;
            };
            let (structure, percent) = recombination::recombine(
                &first.structure,
                &second.structure,
                config.recombination.min_contribution,
                rng,
            );
            Offspring {
                structure,
                provenance: format!(
                    "Recombination: {} ({:.0}%) + {} ({:.0}%)",
                    first.tag(),
                    percent,
                    second.tag(),
                    100.0 - percent
                ),
                generation: first.generation.max(second.generation) + 1,
            }
        }
        Operator::Ripple => {
            let parent = parents.first()?;
            let (structure, stdev, amplitude) =
                ripple::ripple(&parent.structure, &config.ripple, rng);
            Offspring {
                structure,
                provenance: format!(
                    "Ripple: {} stdev={:.5} amp={:.5} waves={},{}",
                    parent.tag(),
                    stdev,
                    amplitude,
                    config.ripple.waves.0,
                    config.ripple.waves.1
                ),
                generation: parent.generation + 1,
            }
        }
        Operator::Exchange => {
            let parent = parents.first()?;
            let (structure, stdev) = exchange::exchange(&parent.structure, &config.exchange, rng);
            Offspring {
                structure,
                provenance: format!(
                    "Exchange: {} stdev={:.5} exch={}",
                    parent.tag(),
                    stdev,
                    config.exchange.exchanges
                ),
                generation: parent.generation + 1,
            }
        }
    };
    Some(offspring)
}

/// Applies `strain` to the cell vectors. Fractional coordinates are unchanged.
pub(crate) fn strained_lattice(lattice: &Lattice, strain: &Matrix3<f64>) -> Lattice {
    Lattice::from_matrix(&(strain * lattice.matrix()))
}

/// A fresh child structure with no search bookkeeping.
pub(crate) fn child(lattice: Lattice) -> Structure {
    let mut structure = Structure::new(lattice);
    structure.status = Status::WaitingForOptimization;
    structure
}
