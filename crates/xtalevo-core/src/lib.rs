//! # xtalevo
//!
//! A concurrent evolutionary search engine for crystal structure prediction.
//!
//! ## Architectural Philosophy
//!
//! The library follows a three-layer architecture.
//!
//! - **[`core`]: The Foundation.** Stateless domain models (`Lattice`,
//!   `Structure`, `Composition`), periodic geometry, symmetry classification,
//!   pair potentials and the session file formats.
//!
//! - **[`engine`]: The Logic Core.** The concurrent machinery: the
//!   population registry, candidate generation and validation, fitness-weighted
//!   parent selection, genetic operators, duplicate reconciliation, the remote
//!   connection pool and the job backends.
//!
//! - **[`workflows`]: The Public API.** The search orchestrator that starts,
//!   runs, resumes and saves a search session.

pub mod core;
pub mod engine;
pub mod workflows;
