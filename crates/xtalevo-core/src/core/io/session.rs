use super::error::PersistenceError;
use super::traits::StateFile;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name of the session state inside a session directory.
pub const SESSION_STATE_FILE: &str = "xtalevo.state";
pub const SESSION_FORMAT_VERSION: u32 = 1;

/// Remote login details persisted with a session. Credentials never are.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SavedLogin {
    pub host: String,
    pub user: String,
    pub port: u16,
}

/// Session-wide state: search configuration plus the bookkeeping needed to
/// decide whether a session can be resumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[serde(bound(deserialize = "C: DeserializeOwned"))]
pub struct SessionState<C> {
    pub version: u32,
    /// Written `false` before a save starts and `true` once every structure
    /// has been written.
    pub save_successful: bool,
    pub description: String,
    pub backend: String,
    pub login: Option<SavedLogin>,
    pub config: C,
}

impl<C: Serialize + DeserializeOwned> StateFile for SessionState<C> {}

impl<C: Serialize + DeserializeOwned> SessionState<C> {
    pub fn new(description: &str, backend: &str, config: C) -> Self {
        Self {
            version: SESSION_FORMAT_VERSION,
            save_successful: false,
            description: description.to_string(),
            backend: backend.to_string(),
            login: None,
            config,
        }
    }

    pub fn path_in(session_dir: &Path) -> PathBuf {
        session_dir.join(SESSION_STATE_FILE)
    }

    /// Reads the session file and refuses one whose last save did not finish.
    pub fn load_for_resume(session_dir: &Path) -> Result<Self, PersistenceError> {
        let path = Self::path_in(session_dir);
        let state = Self::read_from_path(&path)?;
        if !state.save_successful {
            return Err(PersistenceError::Incomplete { path });
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct DummyConfig {
        population: u32,
        tolerance: f64,
    }

    fn state() -> SessionState<DummyConfig> {
        SessionState::new(
            "TiO2 search",
            "pair-potential",
            DummyConfig {
                population: 20,
                tolerance: 0.05,
            },
        )
    }

    #[test]
    fn session_state_survives_write_and_read() {
        let dir = tempdir().unwrap();
        let mut original = state();
        original.save_successful = true;
        original.login = Some(SavedLogin {
            host: "cluster".into(),
            user: "alice".into(),
            port: 22,
        });
        original
            .write_to_path(SessionState::<DummyConfig>::path_in(dir.path()))
            .unwrap();

        let loaded = SessionState::<DummyConfig>::load_for_resume(dir.path()).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn unfinished_save_cannot_be_resumed() {
        let dir = tempdir().unwrap();
        state()
            .write_to_path(SessionState::<DummyConfig>::path_in(dir.path()))
            .unwrap();
        let err = SessionState::<DummyConfig>::load_for_resume(dir.path()).unwrap_err();
        assert!(matches!(err, PersistenceError::Incomplete { .. }));
    }

    #[test]
    fn missing_session_file_cannot_be_resumed() {
        let dir = tempdir().unwrap();
        let err = SessionState::<DummyConfig>::load_for_resume(dir.path()).unwrap_err();
        assert!(matches!(err, PersistenceError::Missing { .. }));
    }
}
