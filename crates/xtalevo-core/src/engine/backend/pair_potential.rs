use super::{BackendError, JobBackend, JobHandle, JobState, JobStore};
use crate::core::forcefield::lattice_sum::{LatticeSumError, PairTable, lattice_energy};
use crate::core::forcefield::potentials::{PairForm, VdwParams};
use crate::core::io::listing::Listing;
use crate::core::models::structure::{Structure, StructureEntity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub const BACKEND_ID: &str = "pair-potential";

/// 1 GPa expressed in eV/Å³.
pub const GPA_TO_EV_PER_A3: f64 = 1.0 / 160.217_662_08;

/// Golden-section iterations of the volume relaxation.
const RELAX_ITERATIONS: usize = 40;

fn default_cutoff() -> f64 {
    8.0
}

fn default_scale_window() -> f64 {
    0.15
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PairPotentialConfig {
    /// External pressure in GPa.
    #[serde(default)]
    pub pressure: f64,
    #[serde(default = "default_cutoff")]
    pub cutoff: f64,
    #[serde(default)]
    pub form: PairForm,
    /// Isotropic cell scaling explored by the relaxation, as a fraction of
    /// the submitted cell edges. Zero disables relaxation.
    #[serde(default = "default_scale_window")]
    pub scale_window: f64,
    pub elements: BTreeMap<String, VdwParams>,
}

impl PairPotentialConfig {
    pub fn table(&self) -> PairTable {
        let mut table = PairTable::new(self.form, self.cutoff);
        for (element, params) in &self.elements {
            table.insert(element, *params);
        }
        table
    }
}

/// Local backend: relaxes the cell isotropically under a pair potential and
/// reports `E + PV`.
pub struct PairPotentialBackend {
    config: PairPotentialConfig,
    table: PairTable,
    jobs: JobStore,
}

impl PairPotentialBackend {
    pub fn new(config: PairPotentialConfig) -> Self {
        Self {
            table: config.table(),
            config,
            jobs: JobStore::default(),
        }
    }

    fn enthalpy(&self, structure: &Structure) -> Result<(f64, f64), LatticeSumError> {
        let energy = lattice_energy(structure, &self.table)?;
        let pv = self.config.pressure * GPA_TO_EV_PER_A3 * structure.volume();
        Ok((energy, energy + pv))
    }

    fn scaled(structure: &Structure, factor: f64) -> Structure {
        let mut scaled = structure.clone();
        scaled.lattice.a *= factor;
        scaled.lattice.b *= factor;
        scaled.lattice.c *= factor;
        scaled
    }

    /// Golden-section search for the isotropic scale factor of lowest
    /// enthalpy within the configured window.
    pub fn relax(&self, structure: &Structure) -> Result<(Structure, f64, f64), LatticeSumError> {
        let window = self.config.scale_window;
        if window <= 0.0 {
            let (energy, enthalpy) = self.enthalpy(structure)?;
            return Ok((structure.clone(), energy, enthalpy));
        }

        let ratio = (5f64.sqrt() - 1.0) / 2.0;
        let (mut low, mut high) = (1.0 - window, 1.0 + window);
        let mut x1 = high - ratio * (high - low);
        let mut x2 = low + ratio * (high - low);
        let mut f1 = self.enthalpy(&Self::scaled(structure, x1))?.1;
        let mut f2 = self.enthalpy(&Self::scaled(structure, x2))?.1;
        for _ in 0..RELAX_ITERATIONS {
            if f1 < f2 {
                high = x2;
                x2 = x1;
                f2 = f1;
                x1 = high - ratio * (high - low);
                f1 = self.enthalpy(&Self::scaled(structure, x1))?.1;
            } else {
                low = x1;
                x1 = x2;
                f1 = f2;
                x2 = low + ratio * (high - low);
                f2 = self.enthalpy(&Self::scaled(structure, x2))?.1;
            }
        }

        let relaxed = Self::scaled(structure, 0.5 * (low + high));
        let (energy, enthalpy) = self.enthalpy(&relaxed)?;
        Ok((relaxed, energy, enthalpy))
    }
}

impl JobBackend for PairPotentialBackend {
    fn id(&self) -> &'static str {
        BACKEND_ID
    }

    fn submit(&self, entity: &StructureEntity) -> Result<JobHandle, BackendError> {
        let structure = entity.snapshot();
        let (state, output) = match self.relax(&structure) {
            Ok((relaxed, energy, enthalpy)) if enthalpy.is_finite() => {
                debug!(tag = %structure.tag(), energy, enthalpy, "Pair potential job finished.");
                let listing = Listing {
                    energy: Some(energy),
                    enthalpy: Some(enthalpy),
                    ..Listing::from_structure(&relaxed)
                };
                (JobState::Finished, listing.to_text())
            }
            Ok((_, _, enthalpy)) => {
                warn!(tag = %structure.tag(), enthalpy, "Pair potential job diverged.");
                (JobState::Failed(format!("non-finite enthalpy {enthalpy}")), String::new())
            }
            Err(e) => {
                warn!(tag = %structure.tag(), error = %e, "Pair potential job failed.");
                (JobState::Failed(e.to_string()), String::new())
            }
        };
        Ok(self.jobs.record(entity, state, output))
    }

    fn status(&self, handle: &JobHandle) -> Result<JobState, BackendError> {
        self.jobs.state(handle)
    }

    fn fetch(&self, entity: &StructureEntity, handle: &JobHandle) -> Result<bool, BackendError> {
        self.jobs.fetch(entity, handle)
    }

    fn discard(&self, handle: &JobHandle) {
        self.jobs.discard(handle)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::models::lattice::Lattice;
    use nalgebra::Vector3;

    const TOLERANCE: f64 = 1e-6;

    pub(crate) fn config() -> PairPotentialConfig {
        let params = VdwParams {
            r_min: 2.0,
            well_depth: 0.1,
        };
        PairPotentialConfig {
            pressure: 0.0,
            cutoff: 6.0,
            form: PairForm::LennardJones,
            scale_window: 0.3,
            elements: [("A".to_string(), params), ("B".to_string(), params)].into(),
        }
    }

    fn simple_cubic(edge: f64) -> StructureEntity {
        let mut s = Structure::new(Lattice::cubic(edge));
        s.add_atom("A", Vector3::zeros());
        StructureEntity::new(s)
    }

    #[test]
    fn relaxation_lowers_enthalpy() {
        let backend = PairPotentialBackend::new(config());
        let start = simple_cubic(2.6).snapshot();
        let (_, initial) = backend.enthalpy(&start).unwrap();
        let (relaxed, _, enthalpy) = backend.relax(&start).unwrap();
        assert!(enthalpy < initial);
        assert!((relaxed.lattice.alpha - 90.0).abs() < TOLERANCE);
    }

    #[test]
    fn pressure_adds_pv_term() {
        let mut cfg = config();
        cfg.scale_window = 0.0;
        let free = PairPotentialBackend::new(cfg.clone());
        cfg.pressure = 10.0;
        let squeezed = PairPotentialBackend::new(cfg);

        let s = simple_cubic(3.0).snapshot();
        let (_, energy, h0) = free.relax(&s).unwrap();
        let (_, _, h1) = squeezed.relax(&s).unwrap();
        assert!((h0 - energy).abs() < TOLERANCE);
        assert!((h1 - h0 - 10.0 * GPA_TO_EV_PER_A3 * 27.0).abs() < TOLERANCE);
    }

    #[test]
    fn submitted_job_finishes_and_updates_entity() {
        let backend = PairPotentialBackend::new(config());
        let entity = simple_cubic(2.6);
        let handle = backend.submit(&entity).unwrap();
        assert_eq!(backend.status(&handle).unwrap(), JobState::Finished);
        assert!(backend.fetch(&entity, &handle).unwrap());

        let s = entity.read();
        let enthalpy = s.enthalpy.unwrap();
        assert!(enthalpy < 0.0);
        // Neighbours at 2.6 attract, so the cell contracts.
        assert!(s.volume() < 2.6f64.powi(3));
    }

    #[test]
    fn unknown_element_fails_the_job() {
        let backend = PairPotentialBackend::new(config());
        let mut s = Structure::new(Lattice::cubic(4.0));
        s.add_atom("Xe", Vector3::zeros());
        let entity = StructureEntity::new(s);

        let handle = backend.submit(&entity).unwrap();
        assert!(matches!(backend.status(&handle).unwrap(), JobState::Failed(_)));
        assert!(matches!(
            backend.fetch(&entity, &handle),
            Err(BackendError::JobFailed(_))
        ));
    }

    #[test]
    fn config_reads_from_toml() {
        let text = r#"
            pressure = 5.0
            form = { form = "buckingham", gamma = 12.0 }
            [elements]
            Ti = { r-min = 3.0, well-depth = 0.05 }
        "#;
        let cfg: PairPotentialConfig = toml::from_str(text).unwrap();
        assert_eq!(cfg.pressure, 5.0);
        assert_eq!(cfg.cutoff, 8.0);
        assert_eq!(cfg.form, PairForm::Buckingham { gamma: 12.0 });
        assert_eq!(cfg.elements["Ti"].r_min, 3.0);
    }
}
