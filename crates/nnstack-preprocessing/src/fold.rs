use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SplitError {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Invalid split configuration: {0}")]
    InvalidArgument(String),
}

/// Where a sample ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Fold(usize),
    Validation,
}

/// Seeded K-fold partition with an optional validation carve-out.
#[derive(Debug, Clone, PartialEq)]
pub struct FoldSplitter {
    pub n_folds: usize,
    pub validation_fraction: Option<f64>,
    pub seed: u64,
}

impl FoldSplitter {
    pub fn new(n_folds: usize) -> Self {
        FoldSplitter {
            n_folds,
            validation_fraction: None,
            seed: 0,
        }
    }

    pub fn with_validation(mut self, fraction: f64) -> Self {
        self.validation_fraction = Some(fraction);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Assign each of `n_samples` indices to a fold or to the validation set.
    ///
    /// The validation subset holds `round(fraction * n)` samples (at least one).
    /// The remaining samples are dealt into `n_folds` contiguous chunks of a
    /// shuffled order; the first `n_fit % n_folds` folds receive one extra sample.
    pub fn split(&self, n_samples: usize) -> Result<FoldAssignment, SplitError> {
        if self.n_folds < 2 {
            return Err(SplitError::InvalidArgument(format!(
                "n_folds must be at least 2, got {}",
                self.n_folds
            )));
        }

        let n_validation = validation_size(n_samples, self.validation_fraction)?;
        let n_fit = n_samples - n_validation;
        if n_fit < self.n_folds {
            return Err(SplitError::InsufficientData(format!(
                "{} fitting samples cannot fill {} folds",
                n_fit, self.n_folds
            )));
        }

        let order = permutation(n_samples, Some(self.seed));
        let mut slots = vec![Slot::Validation; n_samples];
        let base = n_fit / self.n_folds;
        let remainder = n_fit % self.n_folds;
        let mut current = n_validation;
        for fold in 0..self.n_folds {
            let size = if fold < remainder { base + 1 } else { base };
            for &idx in &order[current..current + size] {
                slots[idx] = Slot::Fold(fold);
            }
            current += size;
        }

        Ok(FoldAssignment {
            slots,
            n_folds: self.n_folds,
        })
    }
}

/// Number of validation samples for `fraction` of `n_samples`, leaving at least one to fit.
fn validation_size(n_samples: usize, fraction: Option<f64>) -> Result<usize, SplitError> {
    let n_validation = match fraction {
        None => 0,
        Some(v) if v > 0.0 && v < 1.0 => ((v * n_samples as f64).round() as usize).max(1),
        Some(v) => {
            return Err(SplitError::InvalidArgument(format!(
                "validation fraction must lie in (0, 1), got {v}"
            )))
        }
    };
    if n_validation >= n_samples {
        return Err(SplitError::InsufficientData(format!(
            "{n_samples} samples leave nothing for fitting after a validation subset of {n_validation}"
        )));
    }
    Ok(n_validation)
}

/// Shuffled `0..n`. `None` draws from entropy.
pub(crate) fn permutation(n: usize, seed: Option<u64>) -> Vec<usize> {
    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
    order.shuffle(&mut rng);
    order
}

/// Carve a seeded validation subset without folds.
///
/// Returns `(fitting, validation)` index lists, both ascending. Uses the same
/// permutation as [`FoldSplitter::split`], so for equal seeds the validation
/// subset is identical.
pub fn validation_split(
    n_samples: usize,
    fraction: f64,
    seed: u64,
) -> Result<(Vec<usize>, Vec<usize>), SplitError> {
    let n_validation = validation_size(n_samples, Some(fraction))?;
    let order = permutation(n_samples, Some(seed));
    let mut validation = order[..n_validation].to_vec();
    let mut fitting = order[n_validation..].to_vec();
    validation.sort_unstable();
    fitting.sort_unstable();
    Ok((fitting, validation))
}

/// Result of [`FoldSplitter::split`]. All index lists are ascending.
#[derive(Debug, Clone, PartialEq)]
pub struct FoldAssignment {
    slots: Vec<Slot>,
    n_folds: usize,
}

impl FoldAssignment {
    pub fn n_folds(&self) -> usize {
        self.n_folds
    }

    pub fn n_samples(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, index: usize) -> Option<Slot> {
        self.slots.get(index).copied()
    }

    fn indices_where(&self, pred: impl Fn(Slot) -> bool) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|&(_, &s)| pred(s))
            .map(|(i, _)| i)
            .collect()
    }

    /// Samples held out in fold `k`.
    pub fn fold_indices(&self, k: usize) -> Vec<usize> {
        self.indices_where(|s| s == Slot::Fold(k))
    }

    /// Fitting samples outside fold `k`.
    pub fn complement_indices(&self, k: usize) -> Vec<usize> {
        self.indices_where(|s| matches!(s, Slot::Fold(f) if f != k))
    }

    /// Every non-validation sample.
    pub fn fitting_indices(&self) -> Vec<usize> {
        self.indices_where(|s| matches!(s, Slot::Fold(_)))
    }

    pub fn validation_indices(&self) -> Vec<usize> {
        self.indices_where(|s| s == Slot::Validation)
    }
}
