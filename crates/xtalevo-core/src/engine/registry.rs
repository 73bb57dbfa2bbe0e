use crate::core::io::state::structure_dir_name;
use crate::core::models::structure::{Status, Structure, StructureEntity};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::cmp::Ordering;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Ordered, concurrently accessible collection of structure entities.
///
/// The collection lock only guards membership and order. Fields of an
/// entity are guarded by the entity's own lock. A separate naming mutex
/// serializes `(generation, id)` assignment so that id traffic does not
/// hold up readers of the collection.
pub struct PopulationRegistry {
    entities: RwLock<Vec<StructureEntity>>,
    naming: Mutex<()>,
    session_dir: Option<PathBuf>,
}

/// Critical section for id assignment, see [`PopulationRegistry::lock_for_naming`].
pub struct NamingGuard<'a> {
    registry: &'a PopulationRegistry,
    snapshot: Vec<StructureEntity>,
    _naming: MutexGuard<'a, ()>,
}

impl PopulationRegistry {
    /// `session_dir`, when set, receives one directory per registered structure.
    pub fn new(session_dir: Option<PathBuf>) -> Self {
        Self {
            entities: RwLock::new(Vec::new()),
            naming: Mutex::new(()),
            session_dir,
        }
    }

    pub fn session_dir(&self) -> Option<&PathBuf> {
        self.session_dir.as_ref()
    }

    pub fn with_read<R>(&self, f: impl FnOnce(&[StructureEntity]) -> R) -> R {
        f(&self.entities.read())
    }

    pub fn with_write<R>(&self, f: impl FnOnce(&mut Vec<StructureEntity>) -> R) -> R {
        f(&mut self.entities.write())
    }

    pub fn append(&self, entity: StructureEntity) {
        self.entities.write().push(entity);
    }

    /// Removes `entity` if present. Returns whether it was.
    pub fn remove(&self, entity: &StructureEntity) -> bool {
        let mut entities = self.entities.write();
        match entities.iter().position(|e| e.ptr_eq(entity)) {
            Some(index) => {
                entities.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, entity: &StructureEntity) -> bool {
        self.entities.read().iter().any(|e| e.ptr_eq(entity))
    }

    pub fn size(&self) -> usize {
        self.entities.read().len()
    }

    /// Shallow copy of the current members. Entities must still be locked
    /// individually when inspected.
    pub fn snapshot(&self) -> Vec<StructureEntity> {
        self.entities.read().clone()
    }

    /// Enters the naming critical section and returns the current members.
    ///
    /// Only one caller can hold the guard at a time; the collection itself
    /// stays readable meanwhile. Call [`NamingGuard::commit`] to name and
    /// append a new structure, or drop the guard to leave without one.
    pub fn lock_for_naming(&self) -> NamingGuard<'_> {
        let naming = self.naming.lock();
        NamingGuard {
            registry: self,
            snapshot: self.snapshot(),
            _naming: naming,
        }
    }

    /// Assigns the next free id in `generation`, records provenance, creates
    /// the structure directory and appends the entity.
    pub fn register(&self, structure: Structure, generation: u32, parents: String) -> StructureEntity {
        self.lock_for_naming().commit(structure, generation, parents)
    }

    /// Drops every member. Callers guarantee no entity is in use elsewhere.
    pub fn delete_all_structures(&self) {
        let removed = std::mem::take(&mut *self.entities.write());
        debug!(count = removed.len(), "Registry cleared.");
    }

    /// Renumbers `index` in registry order. Only valid right after a bulk
    /// load, before any generation work runs.
    pub fn reassign_indices(&self) {
        let entities = self.entities.read();
        for (index, entity) in entities.iter().enumerate() {
            entity.write().index = Some(index);
        }
    }

    /// Members with the given status.
    pub fn with_status(&self, status: Status) -> Vec<StructureEntity> {
        self.snapshot()
            .into_iter()
            .filter(|e| e.read().status == status)
            .collect()
    }

    /// Optimized members with a known enthalpy, lowest enthalpy first,
    /// paired with the enthalpy they were ranked by.
    pub fn ranked(&self) -> Vec<(f64, StructureEntity)> {
        let mut ranked: Vec<(f64, StructureEntity)> = self
            .snapshot()
            .into_iter()
            .filter_map(|e| {
                let s = e.read();
                match (s.status, s.enthalpy) {
                    (Status::Optimized, Some(h)) if h.is_finite() => Some((h, e.clone())),
                    _ => None,
                }
            })
            .collect();
        ranked.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
        ranked
    }

    /// Optimized members with a known enthalpy, lowest enthalpy first.
    pub fn ranked_optimized(&self) -> Vec<StructureEntity> {
        self.ranked().into_iter().map(|(_, e)| e).collect()
    }

    /// Number of members that still count towards the population target.
    pub fn count_live(&self) -> usize {
        self.with_read(|entities| {
            entities
                .iter()
                .filter(|e| !matches!(e.read().status, Status::Failed))
                .count()
        })
    }
}

impl NamingGuard<'_> {
    pub fn snapshot(&self) -> &[StructureEntity] {
        &self.snapshot
    }

    /// One past the highest id used in `generation` (ids start at 1).
    pub fn next_id(&self, generation: u32) -> u32 {
        self.snapshot
            .iter()
            .filter_map(|e| {
                let s = e.read();
                (s.generation == generation).then_some(s.id)
            })
            .max()
            .map_or(1, |id| id + 1)
    }

    /// Names `structure` and appends it, leaving the naming section.
    pub fn commit(self, mut structure: Structure, generation: u32, parents: String) -> StructureEntity {
        let id = self.next_id(generation);
        structure.generation = generation;
        structure.id = id;
        structure.parents = parents;
        if let Some(dir) = &self.registry.session_dir {
            let location = dir.join(structure_dir_name(generation, id));
            if let Err(e) = fs::create_dir_all(&location) {
                warn!(path = %location.display(), error = %e, "Cannot create structure directory.");
            }
            structure.location = Some(location);
        }
        let entity = StructureEntity::new(structure);
        self.registry.append(entity.clone());
        entity
    }
}
