use super::child;
use crate::core::models::lattice::{Lattice, LatticeParameter};
use crate::core::models::structure::{Atom, Structure};
use crate::core::utils::geometry::wrap_fractional;
use nalgebra::Vector3;
use rand::Rng;
use rand::seq::SliceRandom;

/// Cuts both parents with a plane perpendicular to a random cell axis and
/// joins the slab below the cut from `first` with the slab above it from
/// `second`.
///
/// The contribution of `first` (in percent) is drawn uniformly from
/// `[min_contribution, 100 - min_contribution]` and returned alongside the
/// child. Each parent is shifted by a random offset along the axis before
/// cutting. The child cell is the contribution-weighted mean of the parent
/// cells, and the composition of `first` is restored by dropping surplus
/// atoms and taking missing ones from the discarded slabs.
pub fn recombine(
    first: &Structure,
    second: &Structure,
    min_contribution: f64,
    rng: &mut impl Rng,
) -> (Structure, f64) {
    let percent = if min_contribution >= 50.0 {
        50.0
    } else {
        rng.gen_range(min_contribution..=100.0 - min_contribution)
    };
    let fraction = percent / 100.0;
    let axis = rng.gen_range(0..3);
    let shift1 = rng.r#gen::<f64>();
    let shift2 = rng.r#gen::<f64>();

    let mut lattice = Lattice::cubic(1.0);
    for p in LatticeParameter::ALL {
        lattice.set(
            p,
            fraction * first.lattice.get(p) + (1.0 - fraction) * second.lattice.get(p),
        );
    }

    let shifted = |atom: &Atom, shift: f64| {
        let mut frac = atom.frac;
        frac[axis] += shift;
        Atom::new(&atom.element, wrap_fractional(&frac))
    };

    let mut kept = Vec::new();
    let mut spare = Vec::new();
    for atom in &first.atoms {
        let moved = shifted(atom, shift1);
        if moved.frac[axis] < fraction {
            kept.push(moved);
        } else {
            spare.push(moved);
        }
    }
    for atom in &second.atoms {
        let moved = shifted(atom, shift2);
        if moved.frac[axis] >= fraction {
            kept.push(moved);
        } else {
            spare.push(moved);
        }
    }

    let target = first.composition();
    let mut structure = child(lattice);
    for (element, count) in target.iter() {
        let mut own: Vec<Atom> = kept.iter().filter(|a| a.element == element).cloned().collect();
        own.shuffle(rng);
        own.truncate(count as usize);

        let mut extra: Vec<Atom> = spare.iter().filter(|a| a.element == element).cloned().collect();
        extra.shuffle(rng);
        while own.len() < count as usize {
            match extra.pop() {
                Some(atom) => own.push(atom),
                None => {
                    let frac = Vector3::new(rng.r#gen(), rng.r#gen(), rng.r#gen());
                    own.push(Atom::new(element, frac));
                }
            }
        }
        for atom in own {
            structure.add_atom(&atom.element, atom.frac);
        }
    }
    (structure, percent)
}
