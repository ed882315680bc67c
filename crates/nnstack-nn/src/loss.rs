use nnstack_autodiff::Variable;
use nnstack_core::{TensorError, TensorResult};

/// Mean Squared Error loss: L = mean((pred - target)²).
///
/// `pred` and `target` must have identical shapes; broadcasting a `[n, 1]`
/// prediction against a `[n]` target would silently build an `[n, n]` matrix.
pub fn mse_loss(pred: &Variable, target: &Variable) -> TensorResult<Variable> {
    if pred.shape_vec() != target.shape_vec() {
        return Err(TensorError::ShapeMismatch {
            expected: target.shape_vec(),
            got: pred.shape_vec(),
        });
    }
    let diff = pred.sub(target)?;
    Ok(diff.mul(&diff)?.mean())
}
