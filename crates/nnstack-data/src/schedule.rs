use serde::{Deserialize, Serialize};

/// Minibatch size that grows with the epoch number:
/// `min(max_size, initial + round(multiplier * epoch^exponent))`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatchSchedule {
    pub initial: usize,
    pub multiplier: f64,
    pub exponent: f64,
    pub max_size: usize,
}

impl Default for BatchSchedule {
    fn default() -> Self {
        BatchSchedule {
            initial: 300,
            multiplier: 1.4,
            exponent: 2.0,
            max_size: 1000,
        }
    }
}

impl BatchSchedule {
    /// A schedule that always returns `size`.
    pub fn fixed(size: usize) -> Self {
        BatchSchedule {
            initial: size,
            multiplier: 0.0,
            exponent: 1.0,
            max_size: size,
        }
    }

    pub fn batch_size(&self, epoch: usize) -> usize {
        let growth = (self.multiplier * (epoch as f64).powf(self.exponent)).round();
        let growth = if growth.is_finite() && growth > 0.0 { growth as usize } else { 0 };
        self.initial.saturating_add(growth).min(self.max_size).max(1)
    }
}
