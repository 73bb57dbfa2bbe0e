//! Symmetry classification of candidate structures.
//!
//! Duplicate detection only needs a stable integer class per structure, with
//! `0` reserved for "unknown". The default classifier derives the class from
//! the lattice system of the reduced cell and reports the lowest space group
//! number of the matching crystal family.

use crate::core::models::lattice::Lattice;
use crate::core::models::structure::Structure;
use crate::core::utils::geometry;

/// Class id reported when a structure cannot be classified.
pub const UNKNOWN_SYMMETRY: u32 = 0;

pub trait SymmetryClassifier: Send + Sync {
    fn classify(&self, structure: &Structure) -> u32;
}

/// Crystal lattice systems, most symmetric first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatticeSystem {
    Cubic,
    Hexagonal,
    Rhombohedral,
    Tetragonal,
    Orthorhombic,
    Monoclinic,
    Triclinic,
}

impl LatticeSystem {
    pub fn class_id(&self) -> u32 {
        match self {
            LatticeSystem::Cubic => 195,
            LatticeSystem::Hexagonal => 168,
            LatticeSystem::Rhombohedral => 146,
            LatticeSystem::Tetragonal => 75,
            LatticeSystem::Orthorhombic => 16,
            LatticeSystem::Monoclinic => 3,
            LatticeSystem::Triclinic => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatticeSystemClassifier {
    /// Relative tolerance for lengths; angles use the same value in degrees
    /// scaled by 100 (0.01 -> 1 degree).
    pub tolerance: f64,
}

impl LatticeSystemClassifier {
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }

    pub fn lattice_system(&self, lattice: &Lattice) -> Option<LatticeSystem> {
        if !lattice.is_well_formed() {
            return None;
        }
        let reduced = Lattice::from_matrix(&geometry::reduce_cell(&lattice.matrix()));
        if !reduced.is_well_formed() {
            return None;
        }

        let angle_tol = self.tolerance * 100.0;
        let same_len = |x: f64, y: f64| (x - y).abs() <= self.tolerance * x.max(y);
        let is_angle = |x: f64, target: f64| (x - target).abs() <= angle_tol;

        let Lattice {
            a,
            b,
            c,
            alpha,
            beta,
            gamma,
        } = reduced;
        let right = [alpha, beta, gamma].map(|x| is_angle(x, 90.0));
        let right_count = right.iter().filter(|&&r| r).count();

        let system = if right_count == 3 {
            match (same_len(a, b), same_len(b, c), same_len(a, c)) {
                (true, true, _) => LatticeSystem::Cubic,
                (true, false, _) | (false, true, _) | (false, false, true) => {
                    LatticeSystem::Tetragonal
                }
                _ => LatticeSystem::Orthorhombic,
            }
        } else if right_count == 2 {
            let hexagonal = (!right[2] && same_len(a, b) && is_60_or_120(gamma, angle_tol))
                || (!right[1] && same_len(a, c) && is_60_or_120(beta, angle_tol))
                || (!right[0] && same_len(b, c) && is_60_or_120(alpha, angle_tol));
            if hexagonal {
                LatticeSystem::Hexagonal
            } else {
                LatticeSystem::Monoclinic
            }
        } else if same_len(a, b)
            && same_len(b, c)
            && (alpha - beta).abs() <= angle_tol
            && (beta - gamma).abs() <= angle_tol
        {
            LatticeSystem::Rhombohedral
        } else {
            LatticeSystem::Triclinic
        };
        Some(system)
    }
}

fn is_60_or_120(angle: f64, tolerance: f64) -> bool {
    (angle - 60.0).abs() <= tolerance || (angle - 120.0).abs() <= tolerance
}

impl SymmetryClassifier for LatticeSystemClassifier {
    fn classify(&self, structure: &Structure) -> u32 {
        if structure.atoms.is_empty() {
            return UNKNOWN_SYMMETRY;
        }
        self.lattice_system(&structure.lattice)
            .map(|s| s.class_id())
            .unwrap_or(UNKNOWN_SYMMETRY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn classify(lattice: Lattice) -> Option<LatticeSystem> {
        LatticeSystemClassifier::new(0.01).lattice_system(&lattice)
    }

    #[test]
    fn recognizes_lattice_systems() {
        assert_eq!(classify(Lattice::cubic(4.0)), Some(LatticeSystem::Cubic));
        assert_eq!(
            classify(Lattice::new(4.0, 4.0, 6.0, 90.0, 90.0, 90.0)),
            Some(LatticeSystem::Tetragonal)
        );
        assert_eq!(
            classify(Lattice::new(3.0, 4.0, 5.0, 90.0, 90.0, 90.0)),
            Some(LatticeSystem::Orthorhombic)
        );
        assert_eq!(
            classify(Lattice::new(3.0, 3.0, 5.0, 90.0, 90.0, 120.0)),
            Some(LatticeSystem::Hexagonal)
        );
        assert_eq!(
            classify(Lattice::new(3.0, 4.0, 5.0, 90.0, 100.0, 90.0)),
            Some(LatticeSystem::Monoclinic)
        );
        assert_eq!(
            classify(Lattice::new(3.0, 4.0, 5.0, 80.0, 95.0, 105.0)),
            Some(LatticeSystem::Triclinic)
        );
    }

    #[test]
    fn skewed_setting_of_cubic_cell_is_still_cubic() {
        // Same lattice as a cubic cell with a -> a + b.
        let skewed = Lattice::new(4.0 * 2f64.sqrt(), 4.0, 4.0, 90.0, 90.0, 45.0);
        assert_eq!(classify(skewed), Some(LatticeSystem::Cubic));
    }

    #[test]
    fn degenerate_cells_are_unknown() {
        assert_eq!(classify(Lattice::new(0.0, 3.0, 3.0, 90.0, 90.0, 90.0)), None);
        let mut empty = Structure::new(Lattice::cubic(3.0));
        assert_eq!(
            LatticeSystemClassifier::new(0.01).classify(&empty),
            UNKNOWN_SYMMETRY
        );
        empty.add_atom("A", Vector3::zeros());
        assert_eq!(LatticeSystemClassifier::new(0.01).classify(&empty), 195);
    }
}
