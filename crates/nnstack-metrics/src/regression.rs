use nnstack_core::{Float, Tensor, TensorError, TensorResult};

fn paired<'a, T: Float>(
    y_true: &'a Tensor<T>,
    y_pred: &'a Tensor<T>,
) -> TensorResult<impl Iterator<Item = (f64, f64)> + 'a> {
    if y_true.numel() != y_pred.numel() {
        return Err(TensorError::DimensionMismatch(format!(
            "y_true has {} elements, y_pred has {}",
            y_true.numel(),
            y_pred.numel()
        )));
    }
    if y_true.numel() == 0 {
        return Err(TensorError::EmptyTensor);
    }
    Ok(y_true
        .data()
        .iter()
        .zip(y_pred.data().iter())
        .map(|(&t, &p)| (t.to_f64(), p.to_f64())))
}

/// Mean Squared Error.
pub fn mse<T: Float>(y_true: &Tensor<T>, y_pred: &Tensor<T>) -> TensorResult<f64> {
    let n = y_true.numel() as f64;
    let sum: f64 = paired(y_true, y_pred)?.map(|(t, p)| (t - p) * (t - p)).sum();
    Ok(sum / n)
}

/// Root Mean Squared Error.
pub fn rmse<T: Float>(y_true: &Tensor<T>, y_pred: &Tensor<T>) -> TensorResult<f64> {
    Ok(mse(y_true, y_pred)?.sqrt())
}

/// Mean Absolute Error.
pub fn mae<T: Float>(y_true: &Tensor<T>, y_pred: &Tensor<T>) -> TensorResult<f64> {
    let n = y_true.numel() as f64;
    let sum: f64 = paired(y_true, y_pred)?.map(|(t, p)| (t - p).abs()).sum();
    Ok(sum / n)
}

/// R² (coefficient of determination). A constant target scores 0.
pub fn r2_score<T: Float>(y_true: &Tensor<T>, y_pred: &Tensor<T>) -> TensorResult<f64> {
    let n = y_true.numel() as f64;
    let ss_res: f64 = paired(y_true, y_pred)?.map(|(t, p)| (t - p) * (t - p)).sum();
    let mean_true: f64 = y_true.data().iter().map(|v| v.to_f64()).sum::<f64>() / n;
    let ss_tot: f64 = y_true
        .data()
        .iter()
        .map(|&t| {
            let d = t.to_f64() - mean_true;
            d * d
        })
        .sum();

    if ss_tot < 1e-15 {
        return Ok(0.0);
    }
    Ok(1.0 - ss_res / ss_tot)
}
