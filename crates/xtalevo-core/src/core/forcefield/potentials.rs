use serde::{Deserialize, Serialize};

const OVERLAP_DISTANCE: f64 = 1e-6;
const OVERLAP_ENERGY: f64 = 1e10;

#[inline]
pub fn lennard_jones_12_6(dist: f64, r_min: f64, well_depth: f64) -> f64 {
    if dist < OVERLAP_DISTANCE {
        return OVERLAP_ENERGY;
    }
    let rho = r_min / dist;
    let rho6 = rho.powi(6);
    let rho12 = rho6 * rho6;
    well_depth * (rho12 - 2.0 * rho6)
}

#[inline]
pub fn buckingham_exp_6(dist: f64, r_min: f64, well_depth: f64, gamma: f64) -> f64 {
    if dist < OVERLAP_DISTANCE {
        return OVERLAP_ENERGY;
    }
    let rho = dist / r_min;
    if rho < 0.1 {
        return OVERLAP_ENERGY;
    }

    let factor = gamma / (gamma - 6.0);
    well_depth * (6.0 / (gamma - 6.0) * (gamma * (1.0 - rho)).exp() - factor * rho.powi(-6))
}

/// Functional form of a pair interaction.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "form", rename_all = "kebab-case")]
pub enum PairForm {
    #[default]
    LennardJones,
    Buckingham { gamma: f64 },
}

/// Per-element van der Waals parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct VdwParams {
    pub r_min: f64,
    pub well_depth: f64,
}

impl VdwParams {
    /// Arithmetic mean of radii, geometric mean of well depths.
    pub fn mix(&self, other: &VdwParams) -> VdwParams {
        VdwParams {
            r_min: 0.5 * (self.r_min + other.r_min),
            well_depth: (self.well_depth * other.well_depth).sqrt(),
        }
    }
}

impl PairForm {
    #[inline]
    pub fn energy(&self, dist: f64, params: &VdwParams) -> f64 {
        match *self {
            PairForm::LennardJones => lennard_jones_12_6(dist, params.r_min, params.well_depth),
            PairForm::Buckingham { gamma } => {
                buckingham_exp_6(dist, params.r_min, params.well_depth, gamma)
            }
        }
    }
}
