use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The stoichiometry of a unit cell: element symbol to atom count.
///
/// Backed by a `BTreeMap` so that iteration (and therefore atom placement
/// order) is deterministic and alphabetical by symbol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Composition(BTreeMap<String, u32>);

impl Composition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, element: &str, count: u32) -> Self {
        self.insert(element, count);
        self
    }

    pub fn insert(&mut self, element: &str, count: u32) {
        if count == 0 {
            self.0.remove(element);
        } else {
            self.0.insert(element.to_string(), count);
        }
    }

    pub fn count(&self, element: &str) -> u32 {
        self.0.get(element).copied().unwrap_or(0)
    }

    pub fn total_atoms(&self) -> u32 {
        self.0.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn elements(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Counts the atoms of each element in a list of element symbols.
    pub fn from_elements<'a>(elements: impl IntoIterator<Item = &'a str>) -> Self {
        let mut map = BTreeMap::new();
        for element in elements {
            *map.entry(element.to_string()).or_insert(0) += 1;
        }
        Self(map)
    }
}

impl FromIterator<(String, u32)> for Composition {
    fn from_iter<I: IntoIterator<Item = (String, u32)>>(iter: I) -> Self {
        let mut composition = Self::new();
        for (element, count) in iter {
            composition.insert(&element, count);
        }
        composition
    }
}
