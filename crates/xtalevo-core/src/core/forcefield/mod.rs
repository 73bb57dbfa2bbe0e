//! # Force Field Module
//!
//! Classical pair potentials and their periodic lattice sum, used by the
//! local `pair-potential` job backend to score candidate structures.
//!
//! - [`potentials`] - Lennard-Jones 12-6 and Buckingham exp-6 pair energies
//! - [`lattice_sum`] - Energy of a periodic cell summed over images within a cutoff

pub mod lattice_sum;
pub mod potentials;
