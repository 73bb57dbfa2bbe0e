use crate::core::models::lattice::Lattice;
use crate::core::models::structure::{Atom, Structure};
use nalgebra::Vector3;
use std::io::{self, BufRead, Write};
use thiserror::Error;

/// Plain-text structure listing exchanged with job backends.
///
/// ```text
/// # comment
/// cell 4.0 4.5 5.0 90.0 90.0 90.0
/// atom Ti 0.0 0.0 0.0
/// atom O 0.3 0.3 0.0
/// energy -12.5
/// enthalpy -12.1
/// ```
///
/// Lines with other keywords are ignored so that job output can be passed
/// through unfiltered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Listing {
    pub lattice: Option<Lattice>,
    pub atoms: Vec<Atom>,
    pub energy: Option<f64>,
    pub enthalpy: Option<f64>,
}

#[derive(Debug, Error)]
pub enum ListingError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Parse error on line {line}: {kind}")]
    Parse { line: usize, kind: ListingErrorKind },
}

#[derive(Debug, Error, PartialEq)]
pub enum ListingErrorKind {
    #[error("'{keyword}' expects {expected} fields, found {found}")]
    FieldCount {
        keyword: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("Invalid number '{0}'")]
    InvalidFloat(String),
}

fn parse_floats<const N: usize>(
    keyword: &'static str,
    fields: &[&str],
    line: usize,
) -> Result<[f64; N], ListingError> {
    if fields.len() != N {
        return Err(ListingError::Parse {
            line,
            kind: ListingErrorKind::FieldCount {
                keyword,
                expected: N,
                found: fields.len(),
            },
        });
    }
    let mut values = [0.0; N];
    for (value, field) in values.iter_mut().zip(fields) {
        *value = field.parse().map_err(|_| ListingError::Parse {
            line,
            kind: ListingErrorKind::InvalidFloat(field.to_string()),
        })?;
    }
    Ok(values)
}

impl Listing {
    pub fn from_structure(structure: &Structure) -> Self {
        Self {
            lattice: Some(structure.lattice),
            atoms: structure.atoms.clone(),
            energy: structure.energy,
            enthalpy: structure.enthalpy,
        }
    }

    pub fn read_from(reader: &mut impl BufRead) -> Result<Self, ListingError> {
        let mut listing = Listing::default();
        for (line_num, line_res) in reader.lines().enumerate() {
            let line = line_res?;
            let line_num = line_num + 1;
            let mut fields = line.split_whitespace();
            let Some(keyword) = fields.next() else {
                continue;
            };
            let fields: Vec<&str> = fields.collect();
            match keyword {
                "cell" => {
                    let [a, b, c, alpha, beta, gamma] = parse_floats("cell", &fields, line_num)?;
                    listing.lattice = Some(Lattice::new(a, b, c, alpha, beta, gamma));
                }
                "atom" => {
                    let Some((element, coords)) = fields.split_first() else {
                        return Err(ListingError::Parse {
                            line: line_num,
                            kind: ListingErrorKind::FieldCount {
                                keyword: "atom",
                                expected: 4,
                                found: 0,
                            },
                        });
                    };
                    let [x, y, z] = parse_floats("atom", coords, line_num)?;
                    listing.atoms.push(Atom::new(element, Vector3::new(x, y, z)));
                }
                "energy" => {
                    let [value] = parse_floats("energy", &fields, line_num)?;
                    listing.energy = Some(value);
                }
                "enthalpy" => {
                    let [value] = parse_floats("enthalpy", &fields, line_num)?;
                    listing.enthalpy = Some(value);
                }
                _ => {}
            }
        }
        Ok(listing)
    }

    pub fn parse(text: &str) -> Result<Self, ListingError> {
        Self::read_from(&mut text.as_bytes())
    }

    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        if let Some(l) = &self.lattice {
            writeln!(
                writer,
                "cell {:.10} {:.10} {:.10} {:.10} {:.10} {:.10}",
                l.a, l.b, l.c, l.alpha, l.beta, l.gamma
            )?;
        }
        for atom in &self.atoms {
            writeln!(
                writer,
                "atom {} {:.10} {:.10} {:.10}",
                atom.element, atom.frac.x, atom.frac.y, atom.frac.z
            )?;
        }
        if let Some(energy) = self.energy {
            writeln!(writer, "energy {energy:.10}")?;
        }
        if let Some(enthalpy) = self.enthalpy {
            writeln!(writer, "enthalpy {enthalpy:.10}")?;
        }
        Ok(())
    }

    pub fn to_text(&self) -> String {
        let mut buffer = Vec::new();
        // Writing into memory cannot fail.
        let _ = self.write_to(&mut buffer);
        String::from_utf8_lossy(&buffer).into_owned()
    }

    /// Whether the listing holds a usable geometry.
    pub fn has_geometry(&self) -> bool {
        self.lattice.is_some() && !self.atoms.is_empty()
    }

    /// Copies whatever the listing holds into `structure`. Geometry is only
    /// replaced when the listing carries a full one. A missing enthalpy falls
    /// back to the energy.
    pub fn apply_to(&self, structure: &mut Structure) {
        if let (Some(lattice), false) = (self.lattice, self.atoms.is_empty()) {
            structure.lattice = lattice;
            structure.atoms.clear();
            for atom in &self.atoms {
                structure.add_atom(&atom.element, atom.frac);
            }
        }
        if self.energy.is_some() {
            structure.energy = self.energy;
        }
        if let Some(enthalpy) = self.enthalpy.or(self.energy) {
            structure.enthalpy = Some(enthalpy);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-9;

    #[test]
    fn parses_geometry_and_results_ignoring_noise() {
        let text = "\
# produced by some job
cell 4.0 4.5 5.0 90.0 90.0 120.0
atom Ti 0.0 0.0 0.0
atom O 0.25 0.5 0.75

SCF converged in 12 cycles
energy -12.5
enthalpy -12.1
";
        let listing = Listing::parse(text).unwrap();
        let lattice = listing.lattice.unwrap();
        assert!((lattice.gamma - 120.0).abs() < TOLERANCE);
        assert_eq!(listing.atoms.len(), 2);
        assert_eq!(listing.atoms[1].element, "O");
        assert!((listing.atoms[1].frac.z - 0.75).abs() < TOLERANCE);
        assert_eq!(listing.energy, Some(-12.5));
        assert_eq!(listing.enthalpy, Some(-12.1));
        assert!(listing.has_geometry());
    }

    #[test]
    fn reports_line_of_malformed_record() {
        let err = Listing::parse("energy -1.0\natom Ti 0.0 zero 0.0\n").unwrap_err();
        match err {
            ListingError::Parse { line, kind } => {
                assert_eq!(line, 2);
                assert_eq!(kind, ListingErrorKind::InvalidFloat("zero".into()));
            }
            other => panic!("unexpected error {other:?}"),
        }

        let err = Listing::parse("cell 1 2 3\n").unwrap_err();
        assert!(matches!(
            err,
            ListingError::Parse {
                line: 1,
                kind: ListingErrorKind::FieldCount { keyword: "cell", expected: 6, found: 3 }
            }
        ));
    }

    #[test]
    fn written_listing_parses_back_to_the_structure() {
        let mut s = Structure::new(Lattice::new(4.0, 5.0, 6.0, 80.0, 95.0, 100.0));
        s.add_atom("A", Vector3::new(0.1, 0.2, 0.3));
        s.add_atom("B", Vector3::new(0.6, 0.7, 0.8));
        s.enthalpy = Some(-3.25);

        let listing = Listing::parse(&Listing::from_structure(&s).to_text()).unwrap();
        let mut copy = Structure::new(Lattice::cubic(1.0));
        listing.apply_to(&mut copy);
        assert!((copy.volume() - s.volume()).abs() < 1e-6);
        assert_eq!(copy.composition(), s.composition());
        assert_eq!(copy.enthalpy, Some(-3.25));
        assert_eq!(copy.energy, None);
    }

    #[test]
    fn results_without_geometry_keep_existing_atoms() {
        let mut s = Structure::new(Lattice::cubic(4.0));
        s.add_atom("A", Vector3::zeros());
        Listing::parse("energy -7.0\n").unwrap().apply_to(&mut s);
        assert_eq!(s.atoms.len(), 1);
        assert_eq!(s.energy, Some(-7.0));
        assert_eq!(s.enthalpy, Some(-7.0));
    }
}
