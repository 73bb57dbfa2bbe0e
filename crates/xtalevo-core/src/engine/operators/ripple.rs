use super::{child, strained_lattice};
use crate::core::models::structure::Structure;
use crate::core::utils::geometry::{random_strain, wrap_fractional};
use crate::engine::config::RippleConfig;
use rand::Rng;
use std::f64::consts::TAU;

/// Strains the cell and displaces every atom along one random axis by a
/// cosine wave running along the two other axes.
///
/// The displacement of an atom at fractional `(x, y)` in the wave plane is
/// `amplitude * cos(2 pi w1 x + phi1) * cos(2 pi w2 y + phi2)` Angstrom.
/// Returns the child, the strain standard deviation and the amplitude used.
pub fn ripple(parent: &Structure, config: &RippleConfig, rng: &mut impl Rng) -> (Structure, f64, f64) {
    let stdev = config.strain_stdev.sample(rng);
    let amplitude = config.amplitude.sample(rng);
    let strain = random_strain(rng, stdev);

    let lattice = strained_lattice(&parent.lattice, &strain);
    let axis = rng.gen_range(0..3);
    let (first, second) = ((axis + 1) % 3, (axis + 2) % 3);
    let phase1 = rng.r#gen::<f64>() * TAU;
    let phase2 = rng.r#gen::<f64>() * TAU;
    let (waves1, waves2) = (f64::from(config.waves.0), f64::from(config.waves.1));

    let axis_length = lattice.matrix().column(axis).norm();
    let mut structure = child(lattice);
    for atom in &parent.atoms {
        let mut frac = atom.frac;
        let wave = (TAU * waves1 * frac[first] + phase1).cos()
            * (TAU * waves2 * frac[second] + phase2).cos();
        frac[axis] += amplitude * wave / axis_length;
        structure.add_atom(&atom.element, wrap_fractional(&frac));
    }
    (structure, stdev, amplitude)
}
