//! # Workflows Module
//!
//! High-level entry points that tie the [`engine`](crate::engine) and
//! [`core`](crate::core) layers together into complete procedures.
//!
//! - **Search Workflow** ([`search`]) - Starts or resumes an evolutionary
//!   search session, drives job submission and offspring generation until
//!   the population target is met, and persists the session.

pub mod search;
