//! Persistence of search sessions.
//!
//! A session directory holds one `xtalevo.state` file (configuration and
//! resume bookkeeping, see [`session`]) and one subdirectory per structure
//! holding its `structure.state` (see [`state`]). All files are TOML and are
//! written through the staged, rotating [`traits::StateFile`] protocol.
//! Job backends exchange structures as plain [`listing`] text.

pub mod error;
pub mod listing;
pub mod session;
pub mod state;
pub mod traits;
