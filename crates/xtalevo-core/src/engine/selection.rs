use thiserror::Error;

/// Enthalpy spread below which all candidates are treated as equally fit.
const FLAT_SPREAD: f64 = 1e-5;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("Cannot build a selection distribution over an empty population")]
    EmptyPopulation,
    #[error("Population is not ranked by ascending enthalpy")]
    Unranked,
}

/// Cumulative selection probabilities over a population ranked from most to
/// least fit.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityTable {
    cumulative: Vec<f64>,
}

impl ProbabilityTable {
    /// Builds the distribution from enthalpies sorted ascending (most fit
    /// first).
    ///
    /// Each candidate gets the weight `1 - (H - best) / (worst - best + unit)`
    /// where `unit` is the mean enthalpy step between neighbouring ranks, so
    /// the best candidate weighs 1 and the worst stays strictly positive.
    pub fn from_enthalpies(enthalpies: &[f64]) -> Result<Self, SelectionError> {
        let (best, worst) = ranked_bounds(enthalpies)?;
        let n = enthalpies.len();
        if n == 1 {
            return Ok(Self {
                cumulative: vec![1.0],
            });
        }

        let spread = worst - best;
        let weights: Vec<f64> = if spread <= FLAT_SPREAD {
            vec![1.0; n]
        } else {
            let unit = spread / (n - 1) as f64;
            enthalpies
                .iter()
                .map(|h| 1.0 - (h - best) / (spread + unit))
                .collect()
        };
        Ok(Self::normalized(&weights))
    }

    /// Builds the distribution over `enthalpies` with the worst end of the
    /// range pinned to `reference`, the enthalpy of the first structure
    /// outside the pool. Weights are `1 - (H - best) / (reference - best)`,
    /// so the reference itself would weigh 0 and is never a candidate.
    pub fn with_reference(enthalpies: &[f64], reference: f64) -> Result<Self, SelectionError> {
        let (best, worst) = ranked_bounds(enthalpies)?;
        if !reference.is_finite() || reference < worst {
            return Err(SelectionError::Unranked);
        }

        let spread = reference - best;
        let weights: Vec<f64> = if spread <= FLAT_SPREAD {
            vec![1.0; enthalpies.len()]
        } else {
            enthalpies.iter().map(|h| 1.0 - (h - best) / spread).collect()
        };
        Ok(Self::normalized(&weights))
    }

    fn normalized(weights: &[f64]) -> Self {
        let total: f64 = weights.iter().sum();
        let mut running = 0.0;
        let mut cumulative: Vec<f64> = weights
            .iter()
            .map(|w| {
                running += w / total;
                running
            })
            .collect();
        if let Some(last) = cumulative.last_mut() {
            *last = 1.0;
        }
        Self { cumulative }
    }

    pub fn len(&self) -> usize {
        self.cumulative.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cumulative.is_empty()
    }

    pub fn cumulative(&self) -> &[f64] {
        &self.cumulative
    }

    /// Probability of picking index `i`.
    pub fn probability(&self, i: usize) -> f64 {
        match i {
            0 => self.cumulative[0],
            _ => self.cumulative[i] - self.cumulative[i - 1],
        }
    }

    /// Index of the first entry whose cumulative probability exceeds `draw`
    /// (a uniform value in `[0, 1)`). Always returns a valid index.
    pub fn sample(&self, draw: f64) -> usize {
        self.cumulative
            .iter()
            .position(|&c| draw < c)
            .unwrap_or(self.cumulative.len() - 1)
    }
}

/// First and last of an ascending, finite enthalpy list.
fn ranked_bounds(enthalpies: &[f64]) -> Result<(f64, f64), SelectionError> {
    let (Some(&best), Some(&worst)) = (enthalpies.first(), enthalpies.last()) else {
        return Err(SelectionError::EmptyPopulation);
    };
    if enthalpies.iter().any(|h| !h.is_finite()) || enthalpies.windows(2).any(|w| w[0] > w[1]) {
        return Err(SelectionError::Unranked);
    }
    Ok((best, worst))
}
