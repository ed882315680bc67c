use crate::fold::permutation;
use nnstack_core::{Float, Tensor, TensorError, TensorResult};

/// Shuffle samples and hold out `round(test_ratio * n)` of them.
///
/// Returns `(x_train, x_test, y_train, y_test)`. Rows keep their targets.
pub fn train_test_split<T: Float>(
    x: &Tensor<T>,
    y: &Tensor<T>,
    test_ratio: f64,
    seed: Option<u64>,
) -> TensorResult<(Tensor<T>, Tensor<T>, Tensor<T>, Tensor<T>)> {
    if !(0.0..=1.0).contains(&test_ratio) {
        return Err(TensorError::InvalidOperation(format!(
            "test_ratio must lie in [0, 1], got {test_ratio}"
        )));
    }
    let n = x.nrows()?;
    if y.nrows()? != n {
        return Err(TensorError::ShapeMismatch {
            expected: vec![n],
            got: y.shape_vec(),
        });
    }

    let order = permutation(n, seed);
    let n_test = ((n as f64 * test_ratio).round() as usize).min(n);
    let (train, test) = order.split_at(n - n_test);

    Ok((
        x.select_rows(train)?,
        x.select_rows(test)?,
        y.select_rows(train)?,
        y.select_rows(test)?,
    ))
}
