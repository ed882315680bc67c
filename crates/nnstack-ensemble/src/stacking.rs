use std::sync::Arc;

use nnstack_core::{Regressor, Tensor};
use nnstack_preprocessing::{validation_split, FoldSplitter};
use tracing::info;

use crate::config::StackingConfig;
use crate::device::DeviceContext;
use crate::error::{not_fitted, StackingError, StackingResult};
use crate::network::{CombinerNetwork, Head};
use crate::pool::{BaseEstimatorPool, FittedEstimators};
use crate::trainer::{Trainer, TrainingData, TrainingReport};

/// Everything a successful fit produces. Replaced as a whole, never patched.
struct FittedState {
    estimators: Option<Arc<FittedEstimators>>,
    network: CombinerNetwork,
    n_features: usize,
    report: TrainingReport,
}

/// Neural stacking ensemble.
///
/// Base estimators are fitted out-of-fold, then a combiner network learns
/// per-instance mixture weights over their predictions. With no base
/// estimators the network regresses the target directly.
pub struct StackingRegressor {
    config: StackingConfig,
    estimators: Vec<Box<dyn Regressor>>,
    supplied: Option<Arc<FittedEstimators>>,
    device: Arc<DeviceContext>,
    fitted: Option<FittedState>,
}

impl StackingRegressor {
    pub fn new(config: StackingConfig, estimators: Vec<Box<dyn Regressor>>) -> Self {
        let device = Arc::new(DeviceContext::from_request(config.training.gpu));
        StackingRegressor {
            config,
            estimators,
            supplied: None,
            device,
            fitted: None,
        }
    }

    /// Reuse base estimators fitted by another ensemble. Call
    /// [`fit_with_predictions`](Self::fit_with_predictions) to train the combiner.
    pub fn with_fitted_estimators(config: StackingConfig, estimators: Arc<FittedEstimators>) -> Self {
        let mut model = Self::new(config, Vec::new());
        model.supplied = Some(estimators);
        model
    }

    /// Run on a shared device; fits and predictions of every model holding it serialize.
    pub fn with_device(mut self, device: Arc<DeviceContext>) -> Self {
        self.device = device;
        self
    }

    pub fn config(&self) -> &StackingConfig {
        &self.config
    }

    pub fn device(&self) -> &Arc<DeviceContext> {
        &self.device
    }

    pub fn is_stacking(&self) -> bool {
        !self.estimators.is_empty() || self.supplied.is_some()
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    /// Fit base estimators out-of-fold (stacking mode), then train the combiner network.
    pub fn fit(&mut self, x: &Tensor<f64>, y: &Tensor<f64>) -> StackingResult<()> {
        self.fitted = None;
        self.config.validate()?;
        let n = check_features(x)?;
        let y = check_targets(y, n)?;
        let device = Arc::clone(&self.device);
        let _guard = device.acquire();
        let cfg = &self.config.training;

        if !self.is_stacking() {
            let (fitting, validation) = if cfg.es {
                validation_split(n, cfg.es_validation_fraction, cfg.seed)?
            } else {
                ((0..n).collect(), Vec::new())
            };
            let state = self.train_combiner(x, &y, None, &fitting, &validation, None)?;
            self.fitted = Some(state);
            return Ok(());
        }

        if self.estimators.is_empty() {
            return Err(StackingError::InvalidConfiguration(
                "supplied estimators are already fitted; use fit_with_predictions".into(),
            ));
        }
        let templates = &self.estimators[..];

        let mut splitter = FoldSplitter::new(self.config.n_folds).with_seed(cfg.seed);
        if cfg.es {
            splitter = splitter.with_validation(cfg.es_validation_fraction);
        }
        let assignment = splitter.split(n)?;
        if cfg.verbose >= 1 {
            info!(
                samples = n,
                estimators = templates.len(),
                folds = self.config.n_folds,
                validation = assignment.validation_indices().len(),
                nworkers = self.config.nworkers,
                "fitting base estimators out-of-fold"
            );
        }
        let fitted = BaseEstimatorPool::new(templates)
            .with_nworkers(self.config.nworkers)
            .with_multi_output(self.config.multi_output)
            .fit(x, &y, assignment)?;

        let fitting = fitted.assignment().fitting_indices();
        let validation = fitted.assignment().validation_indices();
        let predictions = fitted.predictions().clone();
        let state = self.train_combiner(
            x,
            &y,
            Some(&predictions),
            &fitting,
            &validation,
            Some(Arc::new(fitted)),
        )?;
        self.fitted = Some(state);
        Ok(())
    }

    /// Train the combiner on caller-supplied base predictions `[n, k]`, using
    /// the already fitted estimators for later predictions. The estimators come
    /// from [`with_fitted_estimators`](Self::with_fitted_estimators) or a previous fit.
    pub fn fit_with_predictions(
        &mut self,
        x: &Tensor<f64>,
        y: &Tensor<f64>,
        predictions: &Tensor<f64>,
    ) -> StackingResult<()> {
        let estimators = match (&self.supplied, &self.fitted) {
            (Some(e), _) => Arc::clone(e),
            (None, Some(FittedState { estimators: Some(e), .. })) => Arc::clone(e),
            _ => {
                return Err(StackingError::InvalidConfiguration(
                    "fit_with_predictions needs fitted base estimators".into(),
                ))
            }
        };
        self.fitted = None;
        self.config.validate()?;
        let n = check_features(x)?;
        let y = check_targets(y, n)?;
        let k = estimators.len();
        if predictions.shape_vec() != [n, k] {
            return Err(StackingError::InvalidConfiguration(format!(
                "base predictions must be [{n}, {k}], got {:?}",
                predictions.shape_vec()
            )));
        }
        if !predictions.all_finite() {
            return Err(StackingError::InvalidConfiguration(
                "base predictions contain non-finite values".into(),
            ));
        }

        let device = Arc::clone(&self.device);
        let _guard = device.acquire();
        let cfg = &self.config.training;
        let (fitting, validation) = if cfg.es {
            validation_split(n, cfg.es_validation_fraction, cfg.seed)?
        } else {
            ((0..n).collect(), Vec::new())
        };
        let state = self.train_combiner(
            x,
            &y,
            Some(predictions),
            &fitting,
            &validation,
            Some(estimators),
        )?;
        self.fitted = Some(state);
        Ok(())
    }

    fn train_combiner(
        &self,
        x: &Tensor<f64>,
        y: &Tensor<f64>,
        predictions: Option<&Tensor<f64>>,
        fitting: &[usize],
        validation: &[usize],
        estimators: Option<Arc<FittedEstimators>>,
    ) -> StackingResult<FittedState> {
        let cfg = &self.config.training;
        let head = match &estimators {
            None => Head::Direct,
            Some(e) => Head::Stacking {
                method: self.config.ensemble_method,
                n_estimators: e.len(),
                addition: self.config.ensemble_addition,
            },
        };

        let subset = |rows: &[usize]| -> StackingResult<Subset> {
            Ok(Subset {
                x: x.select_rows(rows)?,
                y: y.select_rows(rows)?,
                predictions: predictions.map(|p| p.select_rows(rows)).transpose()?,
            })
        };
        let train = subset(fitting)?;
        let mut network = CombinerNetwork::new(
            cfg,
            head,
            &train.x,
            train.predictions.as_ref(),
            self.config.predictions_as_input,
        )?;
        let train_inputs = network.prepare_inputs(&train.x, train.predictions.as_ref())?;

        let val = if validation.is_empty() {
            None
        } else {
            let val = subset(validation)?;
            let inputs = network.prepare_inputs(&val.x, val.predictions.as_ref())?;
            Some((val, inputs))
        };

        let report = Trainer::new(cfg, self.device.device()).train(
            &mut network,
            TrainingData {
                inputs: &train_inputs,
                predictions: train.predictions.as_ref(),
                targets: &train.y,
            },
            val.as_ref().map(|(v, inputs)| TrainingData {
                inputs,
                predictions: v.predictions.as_ref(),
                targets: &v.y,
            }),
        )?;

        Ok(FittedState {
            estimators,
            network,
            n_features: x.shape().dim(1)?,
            report,
        })
    }

    fn state(&self) -> StackingResult<&FittedState> {
        self.fitted.as_ref().ok_or_else(not_fitted)
    }

    fn check_input(&self, x: &Tensor<f64>) -> StackingResult<&FittedState> {
        let state = self.state()?;
        check_features(x)?;
        let d = x.shape().dim(1)?;
        if d != state.n_features {
            return Err(StackingError::InvalidConfiguration(format!(
                "model was fitted on {} features, got {}",
                state.n_features, d
            )));
        }
        Ok(state)
    }

    fn stacking_state(&self) -> StackingResult<(&FittedState, &Arc<FittedEstimators>)> {
        if !self.is_stacking() {
            return Err(StackingError::InvalidConfiguration(
                "direct mode has no base estimators or mixture weights".into(),
            ));
        }
        let state = self.state()?;
        match &state.estimators {
            Some(e) => Ok((state, e)),
            None => Err(not_fitted()),
        }
    }

    /// `[n]` predictions.
    pub fn predict(&self, x: &Tensor<f64>) -> StackingResult<Tensor<f64>> {
        let state = self.check_input(x)?;
        let _guard = self.device.acquire();
        let base = match &state.estimators {
            Some(e) => Some(e.predict(x)?),
            None => None,
        };
        let inputs = state.network.prepare_inputs(x, base.as_ref())?;
        let out = state.network.infer(&inputs, base.as_ref())?;
        Ok(out.flatten())
    }

    /// Negative mean squared error, so higher is better.
    pub fn score(&self, x: &Tensor<f64>, y: &Tensor<f64>) -> StackingResult<f64> {
        let pred = self.predict(x)?;
        let y = check_targets(y, pred.numel())?;
        Ok(-nnstack_metrics::mse(&y, &pred)?)
    }

    /// `[n, k]` mixture weights. With the offset head disabled,
    /// `Σ_j w_ij · p_ij` reproduces [`predict`](Self::predict).
    pub fn get_weights(&self, x: &Tensor<f64>) -> StackingResult<Tensor<f64>> {
        let (state, estimators) = self.stacking_state()?;
        self.check_input(x)?;
        let _guard = self.device.acquire();
        let base = estimators.predict(x)?;
        let inputs = state.network.prepare_inputs(x, Some(&base))?;
        Ok(state.network.mixture(&inputs)?.0)
    }

    /// `[n]` learned offsets added to the weighted sum; requires `ensemble_addition`.
    pub fn get_offsets(&self, x: &Tensor<f64>) -> StackingResult<Tensor<f64>> {
        let (state, estimators) = self.stacking_state()?;
        if !self.config.ensemble_addition {
            return Err(StackingError::InvalidConfiguration(
                "offsets exist only with ensemble_addition".into(),
            ));
        }
        self.check_input(x)?;
        let _guard = self.device.acquire();
        let base = estimators.predict(x)?;
        let inputs = state.network.prepare_inputs(x, Some(&base))?;
        match state.network.mixture(&inputs)?.1 {
            Some(offsets) => Ok(offsets.flatten()),
            None => Err(not_fitted()),
        }
    }

    /// `[n, k]` predictions of the production base estimators.
    pub fn base_predictions(&self, x: &Tensor<f64>) -> StackingResult<Tensor<f64>> {
        let (_, estimators) = self.stacking_state()?;
        self.check_input(x)?;
        estimators.predict(x)
    }

    /// Test-set MSE of every production base estimator, by name.
    pub fn estimator_risks(&self, x: &Tensor<f64>, y: &Tensor<f64>) -> StackingResult<Vec<(String, f64)>> {
        let (_, estimators) = self.stacking_state()?;
        let base = self.base_predictions(x)?;
        let y = check_targets(y, base.nrows()?)?;
        estimators
            .names()
            .into_iter()
            .enumerate()
            .map(|(j, name)| -> StackingResult<(String, f64)> {
                Ok((name, nnstack_metrics::mse(&y, &base.col(j)?)?))
            })
            .collect()
    }

    /// Fitted base estimators, shareable with another ensemble.
    pub fn fitted_estimators(&self) -> Option<Arc<FittedEstimators>> {
        self.fitted
            .as_ref()
            .and_then(|s| s.estimators.clone())
            .or_else(|| self.supplied.clone())
    }

    pub fn training_report(&self) -> Option<&TrainingReport> {
        self.fitted.as_ref().map(|s| &s.report)
    }
}

struct Subset {
    x: Tensor<f64>,
    y: Tensor<f64>,
    predictions: Option<Tensor<f64>>,
}

/// Require a non-empty, finite `[n, d]` matrix; returns `n`.
fn check_features(x: &Tensor<f64>) -> StackingResult<usize> {
    if x.ndim() != 2 {
        return Err(StackingError::InvalidConfiguration(format!(
            "X must be [n_samples, n_features], got {:?}",
            x.shape_vec()
        )));
    }
    let n = x.nrows()?;
    if n == 0 || x.shape().dim(1)? == 0 {
        return Err(StackingError::InsufficientData(format!(
            "X has shape {:?}",
            x.shape_vec()
        )));
    }
    if !x.all_finite() {
        return Err(StackingError::InvalidConfiguration("X contains non-finite values".into()));
    }
    Ok(n)
}

/// Accept `[n]` or `[n, 1]` finite targets, returned as `[n]`.
fn check_targets(y: &Tensor<f64>, n: usize) -> StackingResult<Tensor<f64>> {
    let shape = y.shape_vec();
    if shape != [n] && shape != [n, 1] {
        return Err(StackingError::InvalidConfiguration(format!(
            "y must have {n} entries as [n] or [n, 1], got {shape:?}"
        )));
    }
    if !y.all_finite() {
        return Err(StackingError::InvalidConfiguration("y contains non-finite values".into()));
    }
    Ok(y.flatten())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnsembleMethod;
    use approx::assert_abs_diff_eq;
    use nnstack_core::TensorResult;
    use nnstack_data::BatchSchedule;

    /// Predicts `scale * x0`.
    struct Scaled(f64);

    impl Regressor for Scaled {
        fn fit(&mut self, _x: &Tensor<f64>, _y: &Tensor<f64>) -> TensorResult<()> {
            Ok(())
        }
        fn predict(&self, x: &Tensor<f64>) -> TensorResult<Tensor<f64>> {
            Ok(x.col(0)?.mul_scalar(self.0))
        }
        fn clone_unfitted(&self) -> Box<dyn Regressor> {
            Box::new(Scaled(self.0))
        }
        fn name(&self) -> String {
            format!("Scaled({})", self.0)
        }
    }

    fn data(n: usize) -> (Tensor<f64>, Tensor<f64>) {
        let x = Tensor::rand(vec![n, 2], Some(5)).add_scalar(-0.5);
        let y = x.col(0).unwrap();
        (x, y)
    }

    fn small() -> StackingConfig {
        StackingConfig::default()
            .with_hidden_size(4)
            .with_num_layers(1)
            .with_max_epochs(5)
            .with_batch_schedule(BatchSchedule::fixed(16))
            .with_n_folds(3)
            .with_early_stopping(3, 0.2)
    }

    fn estimators() -> Vec<Box<dyn Regressor>> {
        vec![Box::new(Scaled(1.0)), Box::new(Scaled(-1.0))]
    }

    #[test]
    fn test_queries_before_fit_fail() {
        let (x, y) = data(10);
        let model = StackingRegressor::new(small(), estimators());
        assert!(!model.is_fitted());
        for err in [
            model.predict(&x).unwrap_err(),
            model.score(&x, &y).unwrap_err(),
            model.get_weights(&x).unwrap_err(),
            model.base_predictions(&x).unwrap_err(),
        ] {
            assert!(matches!(err, StackingError::InvalidConfiguration(_)));
        }
        assert!(model.training_report().is_none());
        assert!(model.fitted_estimators().is_none());
    }

    #[test]
    fn test_fit_predict_shapes() {
        let (x, y) = data(60);
        let mut model = StackingRegressor::new(small(), estimators());
        model.fit(&x, &y).unwrap();
        assert_eq!(model.predict(&x).unwrap().shape_vec(), vec![60]);
        assert_eq!(model.get_weights(&x).unwrap().shape_vec(), vec![60, 2]);
        assert_eq!(model.base_predictions(&x).unwrap().shape_vec(), vec![60, 2]);
        let risks = model.estimator_risks(&x, &y).unwrap();
        assert_eq!(risks[0].0, "Scaled(1)");
        assert_abs_diff_eq!(risks[0].1, 0.0, epsilon = 1e-12);
        assert!(model.score(&x, &y).unwrap() <= 0.0);
        assert!(model.training_report().unwrap().epochs_run <= 5);
    }

    #[test]
    fn test_input_validation() {
        let (x, y) = data(30);
        let mut model = StackingRegressor::new(small(), estimators());
        let mut bad = x.clone();
        bad.set(&[3, 1], f64::NAN).unwrap();
        assert!(matches!(model.fit(&bad, &y), Err(StackingError::InvalidConfiguration(_))));
        assert!(model.fit(&x, &Tensor::zeros(vec![29])).is_err());
        assert!(model.fit(&x.flatten(), &y).is_err());

        model.fit(&x, &y).unwrap();
        let wide = Tensor::zeros(vec![4, 3]);
        assert!(matches!(model.predict(&wide), Err(StackingError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_failed_fit_leaves_model_unfitted() {
        let (x, y) = data(40);
        let mut model = StackingRegressor::new(small(), estimators());
        model.fit(&x, &y).unwrap();
        assert!(model.is_fitted());
        // Too few rows for three folds once validation is carved out
        let (xs, ys) = (x.slice_rows(0, 3).unwrap(), Tensor::from_slice(&y.data()[..3]));
        assert!(model.fit(&xs, &ys).is_err());
        assert!(!model.is_fitted());
        assert!(model.predict(&x).is_err());
    }

    #[test]
    fn test_offsets_require_addition() {
        let (x, y) = data(40);
        let mut plain = StackingRegressor::new(small(), estimators());
        plain.fit(&x, &y).unwrap();
        assert!(plain.get_offsets(&x).is_err());

        let mut with_offset = StackingRegressor::new(
            small()
                .with_ensemble_addition(true)
                .with_ensemble_method(EnsembleMethod::Unconstrained),
            estimators(),
        );
        with_offset.fit(&x, &y).unwrap();
        assert_eq!(with_offset.get_offsets(&x).unwrap().shape_vec(), vec![40]);
    }

    #[test]
    fn test_fit_with_predictions_needs_estimators() {
        let (x, y) = data(40);
        let p = Tensor::zeros(vec![40, 2]);
        let mut model = StackingRegressor::new(small(), estimators());
        assert!(matches!(
            model.fit_with_predictions(&x, &y, &p),
            Err(StackingError::InvalidConfiguration(_))
        ));
        model.fit(&x, &y).unwrap();
        // Refit the combiner only, on the out-of-fold matrix of the first fit
        let oof = model.fitted_estimators().unwrap().predictions().clone();
        model.fit_with_predictions(&x, &y, &oof).unwrap();
        assert!(model.fit_with_predictions(&x, &y, &Tensor::zeros(vec![40, 3])).is_err());
    }

    #[test]
    fn test_supplied_estimators_cannot_be_refit() {
        let (x, y) = data(40);
        let mut first = StackingRegressor::new(small(), estimators());
        first.fit(&x, &y).unwrap();
        let shared = first.fitted_estimators().unwrap();
        let mut second = StackingRegressor::with_fitted_estimators(small(), Arc::clone(&shared));
        assert!(second.is_stacking());
        assert!(second.fit(&x, &y).is_err());
        second.fit_with_predictions(&x, &y, shared.predictions()).unwrap();
        assert!(Arc::ptr_eq(&second.fitted_estimators().unwrap(), &shared));
    }

    #[test]
    fn test_check_targets_accepts_column() {
        let col = Tensor::new(vec![1.0, 2.0], vec![2, 1]).unwrap();
        assert_eq!(check_targets(&col, 2).unwrap().shape_vec(), vec![2]);
        assert!(check_targets(&col, 3).is_err());
    }
}
