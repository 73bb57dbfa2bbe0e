//! # Core Models Module
//!
//! Plain data types describing a candidate crystal structure.
//!
//! - [`lattice`] - Unit cell parameters and conversions to/from cell matrices
//! - [`composition`] - Stoichiometry of a unit cell (element to count)
//! - [`structure`] - The candidate structure itself, its lifecycle status,
//!   its duplicate-detection fingerprint and the lockable [`structure::StructureEntity`] handle
//!
//! ```ignore
//! use xtalevo::core::models::{lattice::Lattice, structure::Structure};
//!
//! let mut structure = Structure::new(Lattice::cubic(5.0));
//! structure.add_atom("Na", Vector3::zeros());
//! let entity = StructureEntity::new(structure);
//! ```

pub mod composition;
pub mod lattice;
pub mod structure;
