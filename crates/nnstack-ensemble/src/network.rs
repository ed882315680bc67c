use nnstack_autodiff::{softmax_rows, sum_rows, Variable};
use nnstack_core::{Tensor, TensorError, TensorResult};
use nnstack_nn::Sequential;
use nnstack_preprocessing::StandardScaler;

use crate::config::{EnsembleMethod, TrainingConfig};
use crate::error::{StackingError, StackingResult};

/// What the network's output layer produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Head {
    /// A single scalar prediction.
    Direct,
    /// One mixture coefficient per base estimator, plus an offset when `addition` is set.
    Stacking {
        method: EnsembleMethod,
        n_estimators: usize,
        addition: bool,
    },
}

impl Head {
    fn width(self) -> usize {
        match self {
            Head::Direct => 1,
            Head::Stacking {
                n_estimators,
                addition,
                ..
            } => n_estimators + usize::from(addition),
        }
    }
}

/// Feed-forward trunk plus a direct or stacking head.
///
/// Inputs are the feature row, optionally joined with the base-prediction row,
/// standardized with statistics taken from the training rows.
pub struct CombinerNetwork {
    model: Sequential,
    head: Head,
    scaler: Option<StandardScaler<f64>>,
    predictions_as_input: bool,
    // [k+1, k] and [k+1, 1] 0/1 matrices splitting the raw head into weights and offset
    selectors: Option<(Tensor<f64>, Tensor<f64>)>,
}

impl CombinerNetwork {
    /// Build the network for training rows `x` (and their base predictions in
    /// stacking mode). The scaler, if enabled, is fitted here.
    pub fn new(
        config: &TrainingConfig,
        head: Head,
        x: &Tensor<f64>,
        predictions: Option<&Tensor<f64>>,
        predictions_as_input: bool,
    ) -> StackingResult<Self> {
        if config.num_layers > 0 && config.hidden_size == 0 {
            return Err(StackingError::InvalidConfiguration(
                "hidden_size must be positive when the network has hidden layers".into(),
            ));
        }
        if let Head::Stacking { n_estimators: 0, .. } = head {
            return Err(StackingError::InvalidConfiguration(
                "stacking head needs at least one base estimator".into(),
            ));
        }

        let composed = compose(x, predictions, head, predictions_as_input)?;
        let scaler = if config.scale_inputs {
            let mut scaler = StandardScaler::new();
            scaler.fit(&composed)?;
            Some(scaler)
        } else {
            None
        };

        let model = Sequential::mlp(
            composed.shape().dim(1)?,
            config.hidden_size,
            config.num_layers,
            head.width(),
            config.activation,
            config.seed,
        );

        let selectors = match head {
            Head::Stacking {
                n_estimators: k,
                addition: true,
                ..
            } => {
                let mut weights = Tensor::zeros(vec![k + 1, k]);
                for j in 0..k {
                    weights.set(&[j, j], 1.0)?;
                }
                let mut offset = Tensor::zeros(vec![k + 1, 1]);
                offset.set(&[k, 0], 1.0)?;
                Some((weights, offset))
            }
            _ => None,
        };

        Ok(CombinerNetwork {
            model,
            head,
            scaler,
            predictions_as_input,
            selectors,
        })
    }

    pub fn head(&self) -> Head {
        self.head
    }

    pub fn model(&self) -> &Sequential {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut Sequential {
        &mut self.model
    }

    /// Compose and standardize the network input for rows `x`.
    pub fn prepare_inputs(
        &self,
        x: &Tensor<f64>,
        predictions: Option<&Tensor<f64>>,
    ) -> TensorResult<Tensor<f64>> {
        let composed = compose(x, predictions, self.head, self.predictions_as_input)?;
        match &self.scaler {
            Some(scaler) => scaler.transform(&composed),
            None => Ok(composed),
        }
    }

    /// Graph-building forward pass. Returns `[n, 1]` predictions.
    pub fn forward(
        &self,
        inputs: &Variable,
        predictions: Option<&Variable>,
        params: &[Variable],
    ) -> TensorResult<Variable> {
        let raw = self.model.forward(inputs, params)?;
        let (method, predictions) = match self.head {
            Head::Direct => return Ok(raw),
            Head::Stacking { method, .. } => (method, require(predictions)?),
        };

        let (logits, offset) = match &self.selectors {
            Some((w, o)) => (
                raw.matmul(&Variable::input(w.clone()))?,
                Some(raw.matmul(&Variable::input(o.clone()))?),
            ),
            None => (raw, None),
        };
        let weights = match method {
            EnsembleMethod::Constrained => logits.softmax_rows()?,
            EnsembleMethod::Unconstrained => logits,
        };
        let combined = weights.mul(predictions)?.sum_rows()?;
        match offset {
            Some(offset) => combined.add(&offset),
            None => Ok(combined),
        }
    }

    /// Forward pass on prepared inputs without a graph. Returns `[n, 1]`.
    pub fn infer(
        &self,
        inputs: &Tensor<f64>,
        predictions: Option<&Tensor<f64>>,
    ) -> TensorResult<Tensor<f64>> {
        if self.head == Head::Direct {
            return self.model.infer(inputs);
        }
        let predictions = require(predictions)?;
        let (weights, offset) = self.mixture(inputs)?;
        let combined = sum_rows(&weights.mul(predictions)?)?;
        match offset {
            Some(offset) => combined.add(&offset),
            None => Ok(combined),
        }
    }

    /// Per-instance mixture weights `[n, k]` and, with an offset head, offsets `[n, 1]`.
    pub fn mixture(&self, inputs: &Tensor<f64>) -> TensorResult<(Tensor<f64>, Option<Tensor<f64>>)> {
        let method = match self.head {
            Head::Direct => {
                return Err(TensorError::InvalidOperation(
                    "a direct head has no mixture weights".into(),
                ))
            }
            Head::Stacking { method, .. } => method,
        };
        let raw = self.model.infer(inputs)?;
        let (logits, offset) = match &self.selectors {
            Some((w, o)) => (raw.matmul(w)?, Some(raw.matmul(o)?)),
            None => (raw, None),
        };
        let weights = match method {
            EnsembleMethod::Constrained => softmax_rows(&logits)?,
            EnsembleMethod::Unconstrained => logits,
        };
        Ok((weights, offset))
    }
}

fn require<T>(predictions: Option<T>) -> TensorResult<T> {
    predictions.ok_or_else(|| {
        TensorError::InvalidOperation("stacking head requires base predictions".into())
    })
}

fn compose(
    x: &Tensor<f64>,
    predictions: Option<&Tensor<f64>>,
    head: Head,
    predictions_as_input: bool,
) -> TensorResult<Tensor<f64>> {
    if let Head::Stacking { n_estimators, .. } = head {
        let p = require(predictions)?;
        if p.shape_vec() != [x.nrows()?, n_estimators] {
            return Err(TensorError::ShapeMismatch {
                expected: vec![x.nrows()?, n_estimators],
                got: p.shape_vec(),
            });
        }
        if predictions_as_input {
            return Tensor::concatenate(&[x, p], 1);
        }
    }
    Ok(x.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nnstack_autodiff::reset_graph;

    fn config() -> TrainingConfig {
        TrainingConfig {
            hidden_size: 6,
            num_layers: 2,
            seed: 4,
            ..TrainingConfig::default()
        }
    }

    fn data() -> (Tensor<f64>, Tensor<f64>) {
        let x = Tensor::new(
            vec![0.5, -1.0, 1.5, 2.0, -0.5, 0.0, 1.0, 1.0, -2.0, 0.3, 0.7, -0.1],
            vec![4, 3],
        )
        .unwrap();
        let p = Tensor::new(vec![1.0, 2.0, -1.0, 0.5, 3.0, 3.0, 0.0, -2.0], vec![4, 2]).unwrap();
        (x, p)
    }

    fn stacking(method: EnsembleMethod, addition: bool) -> Head {
        Head::Stacking {
            method,
            n_estimators: 2,
            addition,
        }
    }

    #[test]
    fn test_constrained_weights_lie_on_simplex() {
        let (x, p) = data();
        let net = CombinerNetwork::new(
            &config(),
            stacking(EnsembleMethod::Constrained, false),
            &x,
            Some(&p),
            false,
        )
        .unwrap();
        let inputs = net.prepare_inputs(&x, Some(&p)).unwrap();
        let (w, offset) = net.mixture(&inputs).unwrap();
        assert_eq!(w.shape_vec(), vec![4, 2]);
        assert!(offset.is_none());
        for i in 0..4 {
            let row = w.row(i).unwrap();
            assert!(row.data().iter().all(|&v| v >= 0.0));
            assert_abs_diff_eq!(row.sum_all(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_forward_matches_infer_for_every_head() {
        let (x, p) = data();
        let heads = [
            Head::Direct,
            stacking(EnsembleMethod::Constrained, false),
            stacking(EnsembleMethod::Unconstrained, false),
            stacking(EnsembleMethod::Constrained, true),
        ];
        for head in heads {
            reset_graph();
            let preds = (head != Head::Direct).then_some(&p);
            let net = CombinerNetwork::new(&config(), head, &x, preds, true).unwrap();
            let inputs = net.prepare_inputs(&x, preds).unwrap();
            let params = net.model().bind();
            let pv = preds.map(|p| Variable::input(p.clone()));
            let out = net
                .forward(&Variable::input(inputs.clone()), pv.as_ref(), &params)
                .unwrap();
            let plain = net.infer(&inputs, preds).unwrap();
            assert_eq!(out.shape_vec(), vec![4, 1]);
            for (a, b) in out.data.data().iter().zip(plain.data()) {
                assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_offset_head_is_added_to_weighted_sum() {
        let (x, p) = data();
        let net = CombinerNetwork::new(
            &config(),
            stacking(EnsembleMethod::Unconstrained, true),
            &x,
            Some(&p),
            false,
        )
        .unwrap();
        let inputs = net.prepare_inputs(&x, Some(&p)).unwrap();
        let (w, offset) = net.mixture(&inputs).unwrap();
        let offset = offset.unwrap();
        assert_eq!(w.shape_vec(), vec![4, 2]);
        assert_eq!(offset.shape_vec(), vec![4, 1]);

        let pred = net.infer(&inputs, Some(&p)).unwrap();
        for i in 0..4 {
            let mut expected = offset.get(&[i, 0]).unwrap();
            for j in 0..2 {
                expected += w.get(&[i, j]).unwrap() * p.get(&[i, j]).unwrap();
            }
            assert_abs_diff_eq!(pred.get(&[i, 0]).unwrap(), expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_predictions_as_input_widens_the_trunk() {
        let (x, p) = data();
        let head = stacking(EnsembleMethod::Constrained, false);
        let narrow = CombinerNetwork::new(&config(), head, &x, Some(&p), false).unwrap();
        let wide = CombinerNetwork::new(&config(), head, &x, Some(&p), true).unwrap();
        assert_eq!(narrow.model().parameters()[0].shape_vec(), vec![3, 6]);
        assert_eq!(wide.model().parameters()[0].shape_vec(), vec![5, 6]);
    }

    #[test]
    fn test_scaler_standardizes_training_inputs() {
        let (x, _) = data();
        let net = CombinerNetwork::new(&config(), Head::Direct, &x, None, false).unwrap();
        let inputs = net.prepare_inputs(&x, None).unwrap();
        let means = inputs.mean_axis(0).unwrap();
        for m in means.data() {
            assert_abs_diff_eq!(*m, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_direct_head_has_no_weights() {
        let (x, p) = data();
        let net = CombinerNetwork::new(&config(), Head::Direct, &x, None, false).unwrap();
        assert!(net.mixture(&x).is_err());
        let stacked = CombinerNetwork::new(
            &config(),
            stacking(EnsembleMethod::Constrained, false),
            &x,
            Some(&p),
            false,
        )
        .unwrap();
        assert!(stacked.infer(&x, None).is_err());
        assert!(CombinerNetwork::new(
            &config(),
            stacking(EnsembleMethod::Constrained, false),
            &x,
            None,
            false
        )
        .is_err());
    }
}
