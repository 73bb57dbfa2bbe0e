use super::error::PersistenceError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};

/// Suffix of the file a save is staged in before it replaces the live file.
pub const STAGING_SUFFIX: &str = "tmp";
/// Suffix the previous version of a file is rotated to on save.
pub const BACKUP_SUFFIX: &str = "old";

/// A TOML document persisted as a single file.
///
/// Writes are staged: the document is written to `<file>.tmp`, the existing
/// file (if any) is rotated to `<file>.old`, and the staged file is renamed
/// into place. A crash therefore leaves either the old or the new version
/// readable.
pub trait StateFile: Serialize + DeserializeOwned {
    fn to_toml(&self) -> Result<String, PersistenceError> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn from_toml(content: &str, path: &Path) -> Result<Self, PersistenceError> {
        toml::from_str(content).map_err(|source| PersistenceError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn read_from_path<P: AsRef<Path>>(path: P) -> Result<Self, PersistenceError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(PersistenceError::Missing {
                path: path.to_path_buf(),
            });
        }
        let content = fs::read_to_string(path).map_err(|e| PersistenceError::io(path, e))?;
        Self::from_toml(&content, path)
    }

    fn write_to_path<P: AsRef<Path>>(&self, path: P) -> Result<(), PersistenceError> {
        let path = path.as_ref();
        let content = self.to_toml()?;
        let staged = with_suffix(path, STAGING_SUFFIX);
        fs::write(&staged, content).map_err(|e| PersistenceError::io(&staged, e))?;
        if path.exists() {
            let backup = with_suffix(path, BACKUP_SUFFIX);
            fs::rename(path, &backup).map_err(|e| PersistenceError::io(&backup, e))?;
        }
        fs::rename(&staged, path).map_err(|e| PersistenceError::io(path, e))
    }
}

/// `dir/file.state` -> `dir/file.state.<suffix>`.
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}
