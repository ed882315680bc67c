use nnstack_core::{Tensor, TensorError, TensorResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn rng_from(seed: Option<u64>) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    }
}

/// Standard normal draw via Box-Muller.
fn gaussian(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen::<f64>().max(1e-10);
    let u2: f64 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Generate synthetic regression data: y = Xw + noise.
///
/// Features are uniform on [-1, 1), true weights uniform on [-5, 5), noise
/// is Gaussian with standard deviation `noise`.
pub fn make_regression(
    n_samples: usize,
    n_features: usize,
    noise: f64,
    seed: Option<u64>,
) -> TensorResult<(Tensor<f64>, Tensor<f64>)> {
    let mut rng = rng_from(seed);

    let true_weights: Vec<f64> = (0..n_features)
        .map(|_| rng.gen::<f64>() * 10.0 - 5.0)
        .collect();

    let mut features = Vec::with_capacity(n_samples * n_features);
    let mut labels = Vec::with_capacity(n_samples);

    for _ in 0..n_samples {
        let mut y = 0.0;
        for w in &true_weights {
            let x: f64 = rng.gen::<f64>() * 2.0 - 1.0;
            features.push(x);
            y += x * w;
        }
        labels.push(y + gaussian(&mut rng) * noise);
    }

    Ok((
        Tensor::new(features, vec![n_samples, n_features])?,
        Tensor::new(labels, vec![n_samples])?,
    ))
}

/// Piecewise target whose best predictor depends on the region of input space:
/// `y = x₁` where `x₀ > 0` and `y = -x₁` elsewhere, plus Gaussian noise.
///
/// Features are uniform on [-1, 1); `n_features` must be at least 2 and any
/// features past the second are pure distractors.
pub fn make_regime_switch(
    n_samples: usize,
    n_features: usize,
    noise: f64,
    seed: Option<u64>,
) -> TensorResult<(Tensor<f64>, Tensor<f64>)> {
    if n_features < 2 {
        return Err(TensorError::InvalidOperation(format!(
            "make_regime_switch needs at least 2 features, got {n_features}"
        )));
    }
    let mut rng = rng_from(seed);

    let mut features = Vec::with_capacity(n_samples * n_features);
    let mut labels = Vec::with_capacity(n_samples);
    for _ in 0..n_samples {
        let row: Vec<f64> = (0..n_features).map(|_| rng.gen::<f64>() * 2.0 - 1.0).collect();
        let signal = if row[0] > 0.0 { row[1] } else { -row[1] };
        features.extend_from_slice(&row);
        labels.push(signal + gaussian(&mut rng) * noise);
    }

    Ok((
        Tensor::new(features, vec![n_samples, n_features])?,
        Tensor::new(labels, vec![n_samples])?,
    ))
}
