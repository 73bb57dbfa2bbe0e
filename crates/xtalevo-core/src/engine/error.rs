use thiserror::Error;

use super::backend::BackendError;
use super::config::ConfigError;
use super::generator::Infeasibility;
use super::remote::ConnectionError;
use super::selection::SelectionError;
use crate::core::io::error::PersistenceError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {source}")]
    Configuration {
        #[from]
        source: ConfigError,
    },

    #[error("Connection error: {source}")]
    Connection {
        #[from]
        source: ConnectionError,
    },

    #[error("Persistence error: {source}")]
    Persistence {
        #[from]
        source: PersistenceError,
    },

    #[error("Job backend error: {source}")]
    Backend {
        #[from]
        source: BackendError,
    },

    #[error("Parent selection failed: {source}")]
    Selection {
        #[from]
        source: SelectionError,
    },

    #[error("Candidate generation failed: {source}")]
    Generation {
        #[from]
        source: Infeasibility,
    },

    #[error("Aborted: {0}")]
    Aborted(String),

    #[error("Internal logic error: {0}")]
    Internal(String),
}
