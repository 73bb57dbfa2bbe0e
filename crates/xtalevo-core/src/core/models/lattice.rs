use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// Smallest magnitude a cell length or angle may take before the cell is
/// considered numerically degenerate.
pub const DEGENERACY_THRESHOLD: f64 = 1e-8;

/// The six parameters describing a crystallographic unit cell.
///
/// Lengths are in Angstroms and angles in degrees. The cell matrix built from
/// these parameters stores the lattice vectors as *columns*, with `a` along
/// the x axis and `b` in the xy plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Lattice {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

/// Identifies one of the six lattice parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LatticeParameter {
    A,
    B,
    C,
    Alpha,
    Beta,
    Gamma,
}

impl LatticeParameter {
    pub const ALL: [LatticeParameter; 6] = [
        LatticeParameter::A,
        LatticeParameter::B,
        LatticeParameter::C,
        LatticeParameter::Alpha,
        LatticeParameter::Beta,
        LatticeParameter::Gamma,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            LatticeParameter::A => "a",
            LatticeParameter::B => "b",
            LatticeParameter::C => "c",
            LatticeParameter::Alpha => "alpha",
            LatticeParameter::Beta => "beta",
            LatticeParameter::Gamma => "gamma",
        }
    }

    pub fn is_length(&self) -> bool {
        matches!(
            self,
            LatticeParameter::A | LatticeParameter::B | LatticeParameter::C
        )
    }
}

impl Lattice {
    pub fn new(a: f64, b: f64, c: f64, alpha: f64, beta: f64, gamma: f64) -> Self {
        Self {
            a,
            b,
            c,
            alpha,
            beta,
            gamma,
        }
    }

    pub fn cubic(a: f64) -> Self {
        Self::new(a, a, a, 90.0, 90.0, 90.0)
    }

    pub fn get(&self, parameter: LatticeParameter) -> f64 {
        match parameter {
            LatticeParameter::A => self.a,
            LatticeParameter::B => self.b,
            LatticeParameter::C => self.c,
            LatticeParameter::Alpha => self.alpha,
            LatticeParameter::Beta => self.beta,
            LatticeParameter::Gamma => self.gamma,
        }
    }

    pub fn set(&mut self, parameter: LatticeParameter, value: f64) {
        match parameter {
            LatticeParameter::A => self.a = value,
            LatticeParameter::B => self.b = value,
            LatticeParameter::C => self.c = value,
            LatticeParameter::Alpha => self.alpha = value,
            LatticeParameter::Beta => self.beta = value,
            LatticeParameter::Gamma => self.gamma = value,
        }
    }

    /// Builds the cell matrix whose columns are the lattice vectors.
    pub fn matrix(&self) -> Matrix3<f64> {
        let (alpha, beta, gamma) = (
            self.alpha.to_radians(),
            self.beta.to_radians(),
            self.gamma.to_radians(),
        );
        let (cos_a, cos_b, cos_g) = (alpha.cos(), beta.cos(), gamma.cos());
        let sin_g = gamma.sin();

        let cx = self.c * cos_b;
        let cy = self.c * (cos_a - cos_b * cos_g) / sin_g;
        let cz = (self.c * self.c - cx * cx - cy * cy).max(0.0).sqrt();

        Matrix3::from_columns(&[
            Vector3::new(self.a, 0.0, 0.0),
            Vector3::new(self.b * cos_g, self.b * sin_g, 0.0),
            Vector3::new(cx, cy, cz),
        ])
    }

    /// Recovers the cell parameters from a matrix whose columns are lattice vectors.
    pub fn from_matrix(matrix: &Matrix3<f64>) -> Self {
        let va = matrix.column(0).into_owned();
        let vb = matrix.column(1).into_owned();
        let vc = matrix.column(2).into_owned();
        let (a, b, c) = (va.norm(), vb.norm(), vc.norm());
        let angle = |u: &Vector3<f64>, v: &Vector3<f64>, nu: f64, nv: f64| {
            (u.dot(v) / (nu * nv)).clamp(-1.0, 1.0).acos().to_degrees()
        };
        Self {
            a,
            b,
            c,
            alpha: angle(&vb, &vc, b, c),
            beta: angle(&va, &vc, a, c),
            gamma: angle(&va, &vb, a, b),
        }
    }

    pub fn volume(&self) -> f64 {
        self.matrix().determinant().abs()
    }

    /// Returns a copy of this cell isotropically scaled to the requested volume.
    ///
    /// Angles are preserved. A cell with zero volume cannot be scaled and is
    /// returned unchanged.
    pub fn with_volume(&self, volume: f64) -> Self {
        let current = self.volume();
        if current <= DEGENERACY_THRESHOLD || !current.is_finite() {
            return *self;
        }
        let factor = (volume / current).cbrt();
        Self {
            a: self.a * factor,
            b: self.b * factor,
            c: self.c * factor,
            ..*self
        }
    }

    /// Whether every parameter is finite and above the degeneracy threshold.
    pub fn is_well_formed(&self) -> bool {
        LatticeParameter::ALL.iter().all(|&p| {
            let v = self.get(p);
            v.is_finite() && v.abs() >= DEGENERACY_THRESHOLD
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-9;

    fn f64_approx_equal(a: f64, b: f64) -> bool {
        (a - b).abs() < TOLERANCE
    }

    #[test]
    fn cubic_cell_volume_is_cube_of_length() {
        let lattice = Lattice::cubic(3.0);
        assert!(f64_approx_equal(lattice.volume(), 27.0));
    }

    #[test]
    fn matrix_round_trips_through_parameters() {
        let lattice = Lattice::new(4.0, 5.0, 6.0, 80.0, 95.0, 110.0);
        let recovered = Lattice::from_matrix(&lattice.matrix());
        for p in LatticeParameter::ALL {
            assert!(
                (lattice.get(p) - recovered.get(p)).abs() < 1e-6,
                "{} differs",
                p.name()
            );
        }
    }

    #[test]
    fn with_volume_scales_lengths_and_keeps_angles() {
        let lattice = Lattice::new(2.0, 3.0, 4.0, 90.0, 100.0, 90.0);
        let scaled = lattice.with_volume(2.0 * lattice.volume());
        assert!((scaled.volume() - 2.0 * lattice.volume()).abs() < 1e-9);
        assert!(f64_approx_equal(scaled.beta, 100.0));
        assert!(f64_approx_equal(scaled.b / scaled.a, 1.5));
    }

    #[test]
    fn degenerate_cells_are_not_well_formed() {
        assert!(Lattice::cubic(3.0).is_well_formed());
        assert!(!Lattice::new(0.0, 3.0, 3.0, 90.0, 90.0, 90.0).is_well_formed());
        assert!(!Lattice::new(f64::NAN, 3.0, 3.0, 90.0, 90.0, 90.0).is_well_formed());
        assert!(!Lattice::new(3.0, 3.0, f64::INFINITY, 90.0, 90.0, 90.0).is_well_formed());
    }
}
