use super::{child, strained_lattice};
use crate::core::models::structure::Structure;
use crate::core::utils::geometry::random_strain;
use crate::engine::config::ExchangeConfig;
use rand::Rng;

/// Strains the cell and swaps the positions of randomly chosen pairs of
/// atoms of different elements.
///
/// The strain standard deviation is drawn from `[0, max-strain-stdev]` and
/// returned with the child. A single-element structure is only strained.
pub fn exchange(parent: &Structure, config: &ExchangeConfig, rng: &mut impl Rng) -> (Structure, f64) {
    let stdev = if config.max_strain_stdev > 0.0 {
        rng.gen_range(0.0..=config.max_strain_stdev)
    } else {
        0.0
    };
    let strain = random_strain(rng, stdev);

    let mut atoms = parent.atoms.clone();
    let n = atoms.len();
    let mixed = atoms.iter().any(|a| a.element != atoms[0].element);
    if mixed {
        for _ in 0..config.exchanges {
            let i = rng.gen_range(0..n);
            let mut j = rng.gen_range(0..n);
            while atoms[j].element == atoms[i].element {
                j = rng.gen_range(0..n);
            }
            let frac = atoms[i].frac;
            atoms[i].frac = atoms[j].frac;
            atoms[j].frac = frac;
        }
    }

    let mut structure = child(strained_lattice(&parent.lattice, &strain));
    for atom in atoms {
        structure.add_atom(&atom.element, atom.frac);
    }
    (structure, stdev)
}
