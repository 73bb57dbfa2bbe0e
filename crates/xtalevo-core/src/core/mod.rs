//! # Core Module
//!
//! Stateless building blocks of the crystal structure search: data models,
//! geometry, symmetry classification, the pair potentials used for local
//! scoring, and session persistence.
//!
//! - **Structure Representation** ([`models`]) - Lattice, composition, candidate structures
//! - **Geometry** ([`utils::geometry`]) - Cell matrices, periodic distances, cell reduction, strain
//! - **Symmetry** ([`symmetry`]) - Symmetry class ids used for duplicate detection
//! - **Energy Calculations** ([`forcefield`]) - Pair potentials and periodic lattice sums
//! - **File I/O** ([`io`]) - Session and per-structure state files
//!
//! Nothing in this module holds locks or spawns threads; the concurrent
//! machinery lives in [`crate::engine`].

pub mod forcefield;
pub mod io;
pub mod models;
pub mod symmetry;
pub mod utils;
