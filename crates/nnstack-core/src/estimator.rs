use crate::error::TensorResult;
use crate::tensor::Tensor;

/// Capability every base regressor exposes to the stacking ensemble.
///
/// `x` is `[n_samples, n_features]`, `y` is `[n_samples]`. `predict` returns
/// either `[n_samples]` or `[n_samples, n_outputs]`; how extra output columns
/// are treated is decided by the caller.
pub trait Regressor: Send + Sync {
    fn fit(&mut self, x: &Tensor<f64>, y: &Tensor<f64>) -> TensorResult<()>;

    fn predict(&self, x: &Tensor<f64>) -> TensorResult<Tensor<f64>>;

    /// A fresh, unfitted copy carrying the same hyperparameters.
    fn clone_unfitted(&self) -> Box<dyn Regressor>;

    /// Short human-readable label used in logs and errors.
    fn name(&self) -> String;
}
