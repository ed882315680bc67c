use std::sync::Arc;

use nnstack_core::Tensor;

use crate::config::{NeuralConfig, StackingConfig};
use crate::device::DeviceContext;
use crate::error::StackingResult;
use crate::stacking::StackingRegressor;
use crate::trainer::TrainingReport;

/// Plain neural regressor: the combiner network with a scalar head and no base estimators.
pub struct NeuralRegressor {
    inner: StackingRegressor,
}

impl NeuralRegressor {
    pub fn new(config: NeuralConfig) -> Self {
        let config = StackingConfig::default().with_training(config.training);
        NeuralRegressor {
            inner: StackingRegressor::new(config, Vec::new()),
        }
    }

    pub fn with_device(mut self, device: Arc<DeviceContext>) -> Self {
        self.inner = self.inner.with_device(device);
        self
    }

    pub fn fit(&mut self, x: &Tensor<f64>, y: &Tensor<f64>) -> StackingResult<()> {
        self.inner.fit(x, y)
    }

    pub fn predict(&self, x: &Tensor<f64>) -> StackingResult<Tensor<f64>> {
        self.inner.predict(x)
    }

    /// Negative mean squared error.
    pub fn score(&self, x: &Tensor<f64>, y: &Tensor<f64>) -> StackingResult<f64> {
        self.inner.score(x, y)
    }

    pub fn is_fitted(&self) -> bool {
        self.inner.is_fitted()
    }

    pub fn training_report(&self) -> Option<&TrainingReport> {
        self.inner.training_report()
    }
}
