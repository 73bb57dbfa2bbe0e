//! # Engine Module
//!
//! The stateful, concurrent machinery of the evolutionary search.
//!
//! ## Overview
//!
//! Candidates live in a shared [`registry`] of independently lockable
//! structure entities. The [`pipeline`] produces new candidates, either from
//! scratch through the [`generator`] or by applying one of the genetic
//! [`operators`] to parents drawn by the [`selection`] engine. Candidates are
//! optimized by a job [`backend`], possibly over pooled [`remote`]
//! connections, and the [`duplicates`] reconciler relabels near-identical
//! results.
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - Immutable search parameters shared by `Arc`
//! - **Error Handling** ([`error`]) - Engine-level error taxonomy
//! - **Progress Monitoring** ([`progress`]) - Advisory progress callbacks
//! - **Decisions** ([`decision`]) - Blocking yes/no and credential prompts
//!
//! ## Locking
//!
//! The registry lock guards membership only, each entity carries its own
//! lock, and id assignment runs under a separate naming lock. Code takes the
//! narrowest lock that suffices and releases it before blocking on anything
//! else.

pub mod backend;
pub mod config;
pub mod decision;
pub mod duplicates;
pub mod error;
pub mod generator;
pub mod operators;
pub mod pipeline;
pub mod progress;
pub mod registry;
pub mod remote;
pub mod selection;
