use super::composition::Composition;
use super::lattice::Lattice;
use crate::core::utils::geometry;
use nalgebra::Vector3;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Number of random positions tried before an atom is declared unplaceable.
pub const MAX_PLACEMENT_ATTEMPTS: usize = 1000;

/// Lifecycle status of a candidate structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    /// Freshly constructed; not yet populated with atoms.
    #[default]
    Empty,
    /// Populated and waiting to be submitted to a job backend.
    WaitingForOptimization,
    /// Submitted to a job backend.
    InProgress,
    /// Optimization finished and results were read back.
    Optimized,
    /// Matches a lower-enthalpy structure within tolerance.
    Duplicate,
    /// Gave up on after repeated optimization failures.
    Failed,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Empty => "empty",
            Status::WaitingForOptimization => "waiting",
            Status::InProgress => "in progress",
            Status::Optimized => "optimized",
            Status::Duplicate => "duplicate",
            Status::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// An atom in fractional coordinates of its parent cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Atom {
    pub element: String,
    pub frac: Vector3<f64>,
}

impl Atom {
    pub fn new(element: &str, frac: Vector3<f64>) -> Self {
        Self {
            element: element.to_string(),
            frac,
        }
    }
}

/// Comparison key used for duplicate detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fingerprint {
    /// Symmetry class id; `0` means unknown.
    pub symmetry: u32,
    pub enthalpy: Option<f64>,
    pub volume: f64,
}

/// A candidate crystal structure: cell, atoms and search bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Structure {
    pub lattice: Lattice,
    pub atoms: Vec<Atom>,
    pub status: Status,
    pub generation: u32,
    pub id: u32,
    /// Position in the registry; only meaningful after a bulk load.
    pub index: Option<usize>,
    /// Human readable provenance ("Randomly generated", operator details, ...).
    pub parents: String,
    pub enthalpy: Option<f64>,
    pub energy: Option<f64>,
    /// Symmetry class id; `0` means unknown.
    pub symmetry: u32,
    /// `(generation, id)` of the structure this one duplicates.
    pub duplicate_of: Option<(u32, u32)>,
    pub fail_count: u32,
    /// Local working directory, assigned at registration.
    #[serde(skip)]
    pub location: Option<PathBuf>,
}

impl Structure {
    pub fn new(lattice: Lattice) -> Self {
        Self {
            lattice,
            atoms: Vec::new(),
            status: Status::Empty,
            generation: 0,
            id: 0,
            index: None,
            parents: String::new(),
            enthalpy: None,
            energy: None,
            symmetry: 0,
            duplicate_of: None,
            fail_count: 0,
            location: None,
        }
    }

    /// The `"<generation>x<id>"` label used in provenance strings and logs.
    pub fn tag(&self) -> String {
        format!("{}x{}", self.generation, self.id)
    }

    pub fn volume(&self) -> f64 {
        self.lattice.volume()
    }

    /// Isotropically rescales the cell; fractional coordinates are unchanged.
    pub fn set_volume(&mut self, volume: f64) {
        self.lattice = self.lattice.with_volume(volume);
    }

    pub fn composition(&self) -> Composition {
        Composition::from_elements(self.atoms.iter().map(|a| a.element.as_str()))
    }

    pub fn add_atom(&mut self, element: &str, frac: Vector3<f64>) {
        self.atoms
            .push(Atom::new(element, geometry::wrap_fractional(&frac)));
    }

    pub fn cartesian_positions(&self) -> Vec<Vector3<f64>> {
        let cell = self.lattice.matrix();
        self.atoms
            .iter()
            .map(|a| geometry::frac_to_cart(&cell, &a.frac))
            .collect()
    }

    /// Tries to place an atom at a random position that keeps at least
    /// `min_distance` to every atom already present (periodic images
    /// included). Returns `false` if no such position was found.
    pub fn add_atom_randomly(
        &mut self,
        element: &str,
        min_distance: Option<f64>,
        rng: &mut impl Rng,
    ) -> bool {
        let cell = self.lattice.matrix();
        if let Some(min) = min_distance {
            if geometry::shortest_lattice_vector(&cell) < min {
                return false;
            }
        }

        for _ in 0..MAX_PLACEMENT_ATTEMPTS {
            let frac = Vector3::new(rng.r#gen::<f64>(), rng.r#gen::<f64>(), rng.r#gen::<f64>());
            let fits = match min_distance {
                Some(min) => self
                    .atoms
                    .iter()
                    .all(|a| geometry::minimum_image_distance(&cell, &a.frac, &frac) >= min),
                None => true,
            };
            if fits {
                self.add_atom(element, frac);
                return true;
            }
        }
        false
    }

    /// Shortest distance between any two atoms, including an atom and its own
    /// periodic image. `None` for a structure without atoms.
    pub fn shortest_interatomic_distance(&self) -> Option<f64> {
        if self.atoms.is_empty() {
            return None;
        }
        let cell = self.lattice.matrix();
        let mut shortest = geometry::shortest_lattice_vector(&cell);
        for (i, first) in self.atoms.iter().enumerate() {
            for second in &self.atoms[i + 1..] {
                let d = geometry::minimum_image_distance(&cell, &first.frac, &second.frac);
                shortest = shortest.min(d);
            }
        }
        Some(shortest)
    }

    /// Reduces the cell so that every angle lies in `[60, 120]` degrees,
    /// re-expressing atom positions in the new basis.
    pub fn fix_angles(&mut self) {
        let cell = self.lattice.matrix();
        let reduced = geometry::reduce_cell(&cell);
        let Some(inverse) = reduced.try_inverse() else {
            return;
        };
        for atom in &mut self.atoms {
            let cart = geometry::frac_to_cart(&cell, &atom.frac);
            atom.frac = geometry::wrap_fractional(&geometry::cart_to_frac(&inverse, &cart));
        }
        self.lattice = Lattice::from_matrix(&reduced);
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            symmetry: self.symmetry,
            enthalpy: self.enthalpy,
            volume: self.volume(),
        }
    }

    /// Clears every optimization result so the structure can be resubmitted.
    pub fn reset_results(&mut self) {
        self.enthalpy = None;
        self.energy = None;
        self.symmetry = 0;
        self.duplicate_of = None;
        self.fail_count = 0;
    }

    /// Replaces cell and atoms with those of `other` while keeping this
    /// structure's identity (generation, id, index, location).
    pub fn replace_contents(&mut self, other: Structure, parents: String) {
        self.lattice = other.lattice;
        self.atoms = other.atoms;
        self.parents = parents;
        self.reset_results();
        self.status = Status::WaitingForOptimization;
    }
}

/// Shared, independently lockable handle to a [`Structure`].
///
/// Cloning the handle is cheap and yields another reference to the same
/// structure; readers may proceed concurrently, writers are exclusive.
#[derive(Debug, Clone)]
pub struct StructureEntity {
    inner: Arc<RwLock<Structure>>,
}

impl StructureEntity {
    pub fn new(structure: Structure) -> Self {
        Self {
            inner: Arc::new(RwLock::new(structure)),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Structure> {
        self.inner.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Structure> {
        self.inner.write()
    }

    /// Whether both handles refer to the same structure.
    pub fn ptr_eq(&self, other: &StructureEntity) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Copies the structure out under a short read lock.
    pub fn snapshot(&self) -> Structure {
        self.inner.read().clone()
    }
}

impl From<Structure> for StructureEntity {
    fn from(structure: Structure) -> Self {
        Self::new(structure)
    }
}
