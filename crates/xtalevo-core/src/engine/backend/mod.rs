//! Interchangeable job backends that optimize structures.
//!
//! The search only needs a backend to submit a structure, report the state
//! of the job, and fold results back into the structure. Two backends ship
//! with the engine: [`pair_potential`] evaluates a pair potential locally,
//! [`remote_command`] runs a command on a remote host through the
//! connection pool.

pub mod pair_potential;
pub mod remote_command;

use super::remote::{ConnectionError, LoginDetails};
use super::remote::setup::Connector;
use crate::core::io::listing::{Listing, ListingError};
use crate::core::models::structure::StructureEntity;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, warn};

/// File inside a structure directory holding the last job output.
pub const RESULT_FILE: &str = "result.out";

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Failed to parse job output '{location}': {source}")]
    Parse {
        location: String,
        #[source]
        source: ListingError,
    },

    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Unknown job {0}")]
    UnknownJob(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: u64,
    /// Where the job output is kept once fetched.
    pub result_location: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Running,
    Finished,
    Failed(String),
}

/// One optimization backend, selected by [`id`](JobBackend::id).
pub trait JobBackend: Send + Sync {
    fn id(&self) -> &'static str;

    /// Connections the backend needs established before submitting.
    fn connector(&self) -> Option<&dyn Connector> {
        None
    }

    fn requires_remote(&self) -> bool {
        self.connector().is_some()
    }

    /// Login used to establish the connector's connections.
    fn login(&self) -> Option<LoginDetails> {
        None
    }

    /// Starts optimizing a copy of the entity's current structure.
    fn submit(&self, entity: &StructureEntity) -> Result<JobHandle, BackendError>;

    fn status(&self, handle: &JobHandle) -> Result<JobState, BackendError>;

    /// Folds the output of a finished job into `entity`. Returns whether an
    /// enthalpy was obtained.
    fn fetch(&self, entity: &StructureEntity, handle: &JobHandle) -> Result<bool, BackendError>;

    /// Forgets a job whose output will never be fetched.
    fn discard(&self, _handle: &JobHandle) {}

    /// Reads a structure listing from `location` into `entity`. Returns
    /// whether the file held a usable geometry or result.
    fn read(&self, entity: &StructureEntity, location: &Path) -> Result<bool, BackendError> {
        let text = fs::read_to_string(location).map_err(|source| BackendError::Io {
            path: location.to_path_buf(),
            source,
        })?;
        let listing = Listing::parse(&text).map_err(|source| BackendError::Parse {
            location: location.display().to_string(),
            source,
        })?;
        let usable = listing.has_geometry() || listing.enthalpy.or(listing.energy).is_some();
        listing.apply_to(&mut entity.write());
        Ok(usable)
    }

    /// Restores backend results of a structure read back from its directory.
    /// Returns whether the structure is usable.
    fn load(&self, entity: &StructureEntity) -> Result<bool, BackendError> {
        let result = entity.read().location.as_ref().map(|dir| dir.join(RESULT_FILE));
        if let Some(path) = result.filter(|p| p.is_file()) {
            self.read(entity, &path)?;
        }
        Ok(!entity.read().atoms.is_empty())
    }
}

/// Selects and parameterizes a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BackendConfig {
    PairPotential(pair_potential::PairPotentialConfig),
    RemoteCommand(remote_command::RemoteCommandConfig),
}

impl BackendConfig {
    pub fn id(&self) -> &'static str {
        match self {
            BackendConfig::PairPotential(_) => pair_potential::BACKEND_ID,
            BackendConfig::RemoteCommand(_) => remote_command::BACKEND_ID,
        }
    }
}

#[derive(Debug)]
struct JobRecord {
    state: JobState,
    output: String,
}

/// Bookkeeping shared by backends whose jobs finish during `submit`.
#[derive(Debug, Default)]
pub(crate) struct JobStore {
    next_id: AtomicU64,
    jobs: Mutex<HashMap<u64, JobRecord>>,
}

impl JobStore {
    pub(crate) fn record(&self, entity: &StructureEntity, state: JobState, output: String) -> JobHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.jobs.lock().insert(id, JobRecord { state, output });
        JobHandle {
            id,
            result_location: entity.read().location.as_ref().map(|d| d.join(RESULT_FILE)),
        }
    }

    pub(crate) fn state(&self, handle: &JobHandle) -> Result<JobState, BackendError> {
        self.jobs
            .lock()
            .get(&handle.id)
            .map(|job| job.state.clone())
            .ok_or(BackendError::UnknownJob(handle.id))
    }

    pub(crate) fn discard(&self, handle: &JobHandle) {
        if self.jobs.lock().remove(&handle.id).is_some() {
            debug!(job = handle.id, "Job discarded.");
        }
    }

    /// Removes the job, keeps its output next to the structure when possible
    /// and applies it to `entity`.
    pub(crate) fn fetch(&self, entity: &StructureEntity, handle: &JobHandle) -> Result<bool, BackendError> {
        let job = self
            .jobs
            .lock()
            .remove(&handle.id)
            .ok_or(BackendError::UnknownJob(handle.id))?;
        if let JobState::Failed(reason) = job.state {
            return Err(BackendError::JobFailed(reason));
        }
        if let Some(path) = &handle.result_location {
            if let Err(e) = fs::write(path, &job.output) {
                warn!(path = %path.display(), error = %e, "Cannot keep job output.");
            }
        }
        let listing = Listing::parse(&job.output).map_err(|source| BackendError::Parse {
            location: format!("job {}", handle.id),
            source,
        })?;
        let obtained = listing.enthalpy.or(listing.energy).is_some();
        listing.apply_to(&mut entity.write());
        debug!(job = handle.id, obtained, "Job output fetched.");
        Ok(obtained)
    }
}
