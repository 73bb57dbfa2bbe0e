use super::potentials::{PairForm, VdwParams};
use crate::core::models::structure::Structure;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum LatticeSumError {
    #[error("No van der Waals parameters for element '{0}'")]
    MissingElement(String),
    #[error("Cell is degenerate (volume {0})")]
    DegenerateCell(f64),
}

/// Per-element parameters plus the pair form and real-space cutoff used to
/// sum interactions over periodic images.
#[derive(Debug, Clone, PartialEq)]
pub struct PairTable {
    pub form: PairForm,
    pub cutoff: f64,
    elements: HashMap<String, VdwParams>,
}

impl PairTable {
    pub fn new(form: PairForm, cutoff: f64) -> Self {
        Self {
            form,
            cutoff,
            elements: HashMap::new(),
        }
    }

    pub fn with_element(mut self, element: &str, params: VdwParams) -> Self {
        self.elements.insert(element.to_string(), params);
        self
    }

    pub fn insert(&mut self, element: &str, params: VdwParams) {
        self.elements.insert(element.to_string(), params);
    }

    fn pair(&self, first: &str, second: &str) -> Result<VdwParams, LatticeSumError> {
        let a = self
            .elements
            .get(first)
            .ok_or_else(|| LatticeSumError::MissingElement(first.to_string()))?;
        let b = self
            .elements
            .get(second)
            .ok_or_else(|| LatticeSumError::MissingElement(second.to_string()))?;
        Ok(a.mix(b))
    }
}

/// Lattice energy per cell: half the sum of pair energies over every atom
/// pair and every periodic image within the cutoff.
pub fn lattice_energy(structure: &Structure, table: &PairTable) -> Result<f64, LatticeSumError> {
    let cell = structure.lattice.matrix();
    let volume = cell.determinant().abs();
    if !volume.is_finite() || volume < 1e-8 {
        return Err(LatticeSumError::DegenerateCell(volume));
    }

    // Number of images needed along each axis: cutoff over the spacing of
    // the lattice planes spanned by the other two vectors.
    let columns = [
        cell.column(0).into_owned(),
        cell.column(1).into_owned(),
        cell.column(2).into_owned(),
    ];
    let mut reach = [0i32; 3];
    for (axis, r) in reach.iter_mut().enumerate() {
        let cross = columns[(axis + 1) % 3].cross(&columns[(axis + 2) % 3]);
        let spacing = volume / cross.norm();
        *r = (table.cutoff / spacing).ceil() as i32;
    }

    let positions = structure.cartesian_positions();
    let mut total = 0.0;
    for (i, first) in structure.atoms.iter().enumerate() {
        for (j, second) in structure.atoms.iter().enumerate() {
            let params = table.pair(&first.element, &second.element)?;
            let base = positions[j] - positions[i];
            for n0 in -reach[0]..=reach[0] {
                for n1 in -reach[1]..=reach[1] {
                    for n2 in -reach[2]..=reach[2] {
                        if i == j && n0 == 0 && n1 == 0 && n2 == 0 {
                            continue;
                        }
                        let shift = columns[0] * n0 as f64
                            + columns[1] * n1 as f64
                            + columns[2] * n2 as f64;
                        let dist = (base + shift).norm();
                        if dist <= table.cutoff {
                            total += table.form.energy(dist, &params);
                        }
                    }
                }
            }
        }
    }
    Ok(0.5 * total)
}
