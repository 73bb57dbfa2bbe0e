use super::error::PersistenceError;
use super::traits::StateFile;
use crate::core::models::structure::Structure;
use std::fs;
use std::path::{Path, PathBuf};

/// File name of a structure's state inside its directory.
pub const STRUCTURE_STATE_FILE: &str = "structure.state";

/// Directory name for a structure, e.g. `00003x00012`.
pub fn structure_dir_name(generation: u32, id: u32) -> String {
    format!("{generation:05}x{id:05}")
}

impl StateFile for Structure {}

/// Writes `structure` into `dir/structure.state`, creating `dir` if needed.
pub fn write_structure(structure: &Structure, dir: &Path) -> Result<(), PersistenceError> {
    fs::create_dir_all(dir).map_err(|e| PersistenceError::io(dir, e))?;
    structure.write_to_path(dir.join(STRUCTURE_STATE_FILE))
}

/// Reads `dir/structure.state`, recording `dir` as the structure's location.
pub fn read_structure(dir: &Path) -> Result<Structure, PersistenceError> {
    let mut structure = Structure::read_from_path(dir.join(STRUCTURE_STATE_FILE))?;
    structure.location = Some(dir.to_path_buf());
    Ok(structure)
}

/// Every immediate subdirectory of `session_dir` that holds a structure
/// state file, sorted by name.
pub fn find_structure_dirs(session_dir: &Path) -> Result<Vec<PathBuf>, PersistenceError> {
    let entries = fs::read_dir(session_dir).map_err(|e| PersistenceError::io(session_dir, e))?;
    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| PersistenceError::io(session_dir, e))?;
        let path = entry.path();
        if path.is_dir() && path.join(STRUCTURE_STATE_FILE).is_file() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}
