use nnstack_core::{Regressor, Tensor, TensorError, TensorResult};

use crate::regression::check_xy;

/// Predicts the training-target mean for every row.
#[derive(Debug, Clone, Default)]
pub struct MeanRegressor {
    mean: Option<f64>,
}

impl MeanRegressor {
    pub fn new() -> Self {
        MeanRegressor { mean: None }
    }

    pub fn mean(&self) -> Option<f64> {
        self.mean
    }
}

impl Regressor for MeanRegressor {
    fn fit(&mut self, x: &Tensor<f64>, y: &Tensor<f64>) -> TensorResult<()> {
        check_xy(x, y)?;
        self.mean = Some(y.mean_all());
        Ok(())
    }

    fn predict(&self, x: &Tensor<f64>) -> TensorResult<Tensor<f64>> {
        let mean = self
            .mean
            .ok_or_else(|| TensorError::InvalidOperation("Model not fitted".into()))?;
        Ok(Tensor::full(vec![x.nrows()?], mean))
    }

    fn clone_unfitted(&self) -> Box<dyn Regressor> {
        Box::new(MeanRegressor::new())
    }

    fn name(&self) -> String {
        "MeanRegressor".into()
    }
}
