use nnstack_core::{Float, Tensor, TensorError, TensorResult};

/// Per-column standardisation learned from a `[samples, features]` matrix.
///
/// Constant columns get a scale of one, so they are centred and nothing more.
#[derive(Debug, Clone, Default)]
pub struct StandardScaler<T: Float> {
    fitted: Option<(Tensor<T>, Tensor<T>)>,
}

impl<T: Float> StandardScaler<T> {
    pub fn new() -> Self {
        StandardScaler { fitted: None }
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    pub fn fit(&mut self, x: &Tensor<T>) -> TensorResult<()> {
        let n = match x.shape().dims() {
            &[n, _] => n,
            _ => {
                return Err(TensorError::InvalidOperation(format!(
                    "scaler expects [samples, features], got shape {}",
                    x.shape()
                )))
            }
        };
        if n == 0 {
            return Err(TensorError::EmptyTensor);
        }
        let mean = x.mean_axis(0)?.unsqueeze(0)?;
        let scale = x
            .std_axis(0)?
            .apply(|s| if s.abs() < T::EPSILON { T::ONE } else { s })
            .unsqueeze(0)?;
        self.fitted = Some((mean, scale));
        Ok(())
    }

    /// `(x - mean) / scale`, row-broadcast.
    pub fn transform(&self, x: &Tensor<T>) -> TensorResult<Tensor<T>> {
        let (mean, scale) = self
            .fitted
            .as_ref()
            .ok_or_else(|| TensorError::InvalidOperation("scaler used before fit".into()))?;
        let features = x.shape().dim(1)?;
        if features != mean.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: vec![mean.numel()],
                got: vec![features],
            });
        }
        x.sub(mean)?.div(scale)
    }
}
