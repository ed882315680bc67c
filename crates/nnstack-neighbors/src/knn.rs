use std::cmp::Ordering;

use nnstack_core::{Regressor, Tensor, TensorError, TensorResult};

/// Distance metric for KNN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMetric {
    Euclidean,
    Manhattan,
}

impl DistanceMetric {
    fn distance(self, a: &[f64], b: &[f64]) -> f64 {
        match self {
            DistanceMetric::Euclidean => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f64>()
                .sqrt(),
            DistanceMetric::Manhattan => a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum(),
        }
    }
}

/// K-Nearest Neighbors Regressor: mean target of the `k` closest training rows.
///
/// Ties in distance are broken by training-row order.
#[derive(Debug, Clone)]
pub struct KNNRegressor {
    pub k: usize,
    pub metric: DistanceMetric,
    x_train: Option<Tensor<f64>>,
    y_train: Option<Tensor<f64>>,
}

impl KNNRegressor {
    pub fn new(k: usize, metric: DistanceMetric) -> Self {
        KNNRegressor {
            k,
            metric,
            x_train: None,
            y_train: None,
        }
    }
}

impl Regressor for KNNRegressor {
    fn fit(&mut self, x: &Tensor<f64>, y: &Tensor<f64>) -> TensorResult<()> {
        if self.k == 0 {
            return Err(TensorError::InvalidOperation("KNN requires k >= 1".into()));
        }
        if x.ndim() != 2 {
            return Err(TensorError::InvalidOperation(
                "KNN expects a 2D feature matrix".into(),
            ));
        }
        let n = x.nrows()?;
        if n == 0 {
            return Err(TensorError::EmptyTensor);
        }
        if y.numel() != n {
            return Err(TensorError::DimensionMismatch(format!(
                "X has {} rows but y has {} elements",
                n,
                y.numel()
            )));
        }
        self.x_train = Some(x.clone());
        self.y_train = Some(y.flatten());
        Ok(())
    }

    fn predict(&self, x: &Tensor<f64>) -> TensorResult<Tensor<f64>> {
        let (x_train, y_train) = match (&self.x_train, &self.y_train) {
            (Some(x), Some(y)) => (x, y),
            _ => return Err(TensorError::InvalidOperation("Model not fitted".into())),
        };
        let d = x_train.shape().dim(1)?;
        if x.ndim() != 2 || x.shape().dim(1)? != d {
            return Err(TensorError::DimensionMismatch(format!(
                "model fitted on {} features, got shape {:?}",
                d,
                x.shape_vec()
            )));
        }
        let n_test = x.nrows()?;
        let n_train = x_train.nrows()?;
        let k = self.k.min(n_train);
        let train = x_train.data();
        let targets = y_train.data();

        let mut predictions = Vec::with_capacity(n_test);
        for row in x.data().chunks(d.max(1)).take(n_test) {
            let mut dists: Vec<(f64, usize)> = (0..n_train)
                .map(|j| (self.metric.distance(row, &train[j * d..(j + 1) * d]), j))
                .collect();
            dists.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal).then(a.1.cmp(&b.1)));

            let sum: f64 = dists[..k].iter().map(|&(_, j)| targets[j]).sum();
            predictions.push(sum / k as f64);
        }

        Tensor::new(predictions, vec![n_test])
    }

    fn clone_unfitted(&self) -> Box<dyn Regressor> {
        Box::new(KNNRegressor::new(self.k, self.metric))
    }

    fn name(&self) -> String {
        format!("KNNRegressor(k={})", self.k)
    }
}
