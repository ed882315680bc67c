use std::sync::Arc;

use approx::assert_abs_diff_eq;
use nnstack_core::{Regressor, Tensor, TensorError, TensorResult};
use nnstack_data::BatchSchedule;
use nnstack_datasets::{make_regime_switch, make_regression};
use nnstack_ensemble::{
    BaseEstimatorPool, DeviceContext, EnsembleMethod, NeuralConfig, NeuralRegressor,
    StackingConfig, StackingError, StackingRegressor,
};
use nnstack_linear::{LinearRegression, MeanRegressor, Ridge};
use nnstack_metrics::mse;
use nnstack_neighbors::{DistanceMetric, KNNRegressor};
use nnstack_preprocessing::{train_test_split, FoldSplitter};

/// Predicts `sign * x1`, ignoring its training data.
struct SignedSecond(f64);

impl Regressor for SignedSecond {
    fn fit(&mut self, _x: &Tensor<f64>, _y: &Tensor<f64>) -> TensorResult<()> {
        Ok(())
    }
    fn predict(&self, x: &Tensor<f64>) -> TensorResult<Tensor<f64>> {
        Ok(x.col(1)?.mul_scalar(self.0))
    }
    fn clone_unfitted(&self) -> Box<dyn Regressor> {
        Box::new(SignedSecond(self.0))
    }
    fn name(&self) -> String {
        format!("SignedSecond({})", self.0)
    }
}

/// Always fails to fit.
struct Broken;

impl Regressor for Broken {
    fn fit(&mut self, _x: &Tensor<f64>, _y: &Tensor<f64>) -> TensorResult<()> {
        Err(TensorError::SingularMatrix)
    }
    fn predict(&self, _x: &Tensor<f64>) -> TensorResult<Tensor<f64>> {
        Err(TensorError::InvalidOperation("Model not fitted".into()))
    }
    fn clone_unfitted(&self) -> Box<dyn Regressor> {
        Box::new(Broken)
    }
    fn name(&self) -> String {
        "Broken".into()
    }
}

fn small_config() -> StackingConfig {
    StackingConfig::default()
        .with_hidden_size(16)
        .with_num_layers(2)
        .with_learning_rate(0.01)
        .with_batch_schedule(BatchSchedule::fixed(100))
        .with_max_epochs(80)
        .with_early_stopping(30, 0.1)
        .with_seed(3)
}

fn linear_bases() -> Vec<Box<dyn Regressor>> {
    vec![Box::new(LinearRegression::new(true)), Box::new(MeanRegressor::new())]
}

#[test]
fn stacking_beats_both_bases_on_a_linear_target() {
    let (x, y) = make_regression(1000, 3, 1.0, Some(42)).unwrap();
    let (x_train, x_test, y_train, y_test) = train_test_split(&x, &y, 0.2, Some(0)).unwrap();

    let mut model = StackingRegressor::new(small_config(), linear_bases());
    model.fit(&x_train, &y_train).unwrap();

    let risks = model.estimator_risks(&x_test, &y_test).unwrap();
    assert_eq!(risks[0].0, "LinearRegression");
    let (ols, mean) = (risks[0].1, risks[1].1);
    let stacked = -model.score(&x_test, &y_test).unwrap();

    assert!(ols < mean, "OLS {ols} vs mean {mean}");
    assert!(stacked < mean, "stacking {stacked} vs mean {mean}");
    assert!(stacked < ols, "stacking {stacked} vs OLS {ols}");
}

#[test]
fn stacking_beats_every_base_on_a_regime_switch() {
    let (x, y) = make_regime_switch(1200, 2, 0.1, Some(7)).unwrap();
    let (x_train, x_test, y_train, y_test) = train_test_split(&x, &y, 0.25, Some(1)).unwrap();
    let bases: Vec<Box<dyn Regressor>> = vec![Box::new(SignedSecond(1.0)), Box::new(SignedSecond(-1.0))];

    let config = small_config()
        .with_batch_schedule(BatchSchedule::fixed(64))
        .with_max_epochs(100);
    let mut model = StackingRegressor::new(config, bases);
    model.fit(&x_train, &y_train).unwrap();

    let best_base = model
        .estimator_risks(&x_test, &y_test)
        .unwrap()
        .into_iter()
        .map(|(_, risk)| risk)
        .fold(f64::INFINITY, f64::min);
    let stacked = -model.score(&x_test, &y_test).unwrap();
    assert!(stacked < 0.75 * best_base, "stacking {stacked} vs best base {best_base}");

    // The weight on `+x1` should follow the sign of x0
    let weights = model.get_weights(&x_test).unwrap();
    let mut agree = 0;
    for i in 0..x_test.nrows().unwrap() {
        let x0 = x_test.get(&[i, 0]).unwrap();
        let w0 = weights.get(&[i, 0]).unwrap();
        if (x0 > 0.0) == (w0 > 0.5) {
            agree += 1;
        }
    }
    assert!(agree as f64 > 0.7 * x_test.nrows().unwrap() as f64);
}

#[test]
fn weights_reproduce_predictions() {
    let (x, y) = make_regression(200, 2, 0.5, Some(9)).unwrap();
    for method in [EnsembleMethod::Constrained, EnsembleMethod::Unconstrained] {
        let config = small_config().with_max_epochs(10).with_ensemble_method(method);
        let mut model = StackingRegressor::new(config, linear_bases());
        model.fit(&x, &y).unwrap();

        let weights = model.get_weights(&x).unwrap();
        let base = model.base_predictions(&x).unwrap();
        let pred = model.predict(&x).unwrap();
        assert_eq!(weights.shape_vec(), vec![200, 2]);
        let recombined = weights.mul(&base).unwrap().sum_axis(1).unwrap();
        for (a, b) in recombined.data().iter().zip(pred.data()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-10);
        }
        if method == EnsembleMethod::Constrained {
            assert!(weights.data().iter().all(|&w| (0.0..=1.0).contains(&w)));
        }
    }
}

#[test]
fn offsets_complete_the_weighted_sum() {
    let (x, y) = make_regression(200, 2, 0.5, Some(9)).unwrap();
    let config = small_config().with_max_epochs(10).with_ensemble_addition(true);
    let mut model = StackingRegressor::new(config, linear_bases());
    model.fit(&x, &y).unwrap();

    let weights = model.get_weights(&x).unwrap();
    let offsets = model.get_offsets(&x).unwrap();
    let base = model.base_predictions(&x).unwrap();
    let pred = model.predict(&x).unwrap();
    let recombined = weights.mul(&base).unwrap().sum_axis(1).unwrap().add(&offsets).unwrap();
    for (a, b) in recombined.data().iter().zip(pred.data()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-10);
    }
}

#[test]
fn direct_mode_has_no_weights() {
    let (x, y) = make_regression(120, 2, 0.5, Some(4)).unwrap();
    let mut model = StackingRegressor::new(small_config().with_max_epochs(5), Vec::new());
    assert!(!model.is_stacking());
    model.fit(&x, &y).unwrap();
    assert_eq!(model.predict(&x).unwrap().shape_vec(), vec![120]);
    assert!(matches!(model.get_weights(&x), Err(StackingError::InvalidConfiguration(_))));
    assert!(matches!(model.base_predictions(&x), Err(StackingError::InvalidConfiguration(_))));
    assert!(model.fitted_estimators().is_none());
}

#[test]
fn neural_regressor_fits_directly() {
    let (x, y) = make_regression(300, 3, 0.1, Some(5)).unwrap();
    let config = NeuralConfig::default()
        .with_hidden_size(16)
        .with_num_layers(1)
        .with_learning_rate(0.01)
        .with_batch_schedule(BatchSchedule::fixed(50))
        .with_max_epochs(60);
    let mut model = NeuralRegressor::new(config);
    model.fit(&x, &y).unwrap();
    let constant = mse(&y, &Tensor::full(vec![300], y.mean_all())).unwrap();
    assert!(-model.score(&x, &y).unwrap() < constant);
}

#[test]
fn out_of_fold_matrix_is_independent_of_worker_count() {
    let (x, y) = make_regression(150, 3, 0.5, Some(11)).unwrap();
    let bases: Vec<Box<dyn Regressor>> = vec![
        Box::new(LinearRegression::new(true)),
        Box::new(Ridge::new(1.0, true)),
        Box::new(KNNRegressor::new(3, DistanceMetric::Euclidean)),
        Box::new(MeanRegressor::new()),
    ];
    let splitter = FoldSplitter::new(5).with_validation(0.1).with_seed(2);

    let serial = BaseEstimatorPool::new(&bases)
        .with_nworkers(1)
        .fit(&x, &y, splitter.split(150).unwrap())
        .unwrap();
    let parallel = BaseEstimatorPool::new(&bases)
        .with_nworkers(4)
        .fit(&x, &y, splitter.split(150).unwrap())
        .unwrap();
    assert_eq!(serial.predictions(), parallel.predictions());
    assert_eq!(serial.predict(&x).unwrap(), parallel.predict(&x).unwrap());
}

#[test]
fn out_of_fold_predictions_do_not_leak_labels() {
    // A 1-NN fitted on a row would reproduce its label exactly
    let (x, y) = make_regression(100, 2, 1.0, Some(12)).unwrap();
    let bases: Vec<Box<dyn Regressor>> = vec![Box::new(KNNRegressor::new(1, DistanceMetric::Euclidean))];
    let assignment = FoldSplitter::new(4).with_validation(0.2).split(100).unwrap();
    let fitted = BaseEstimatorPool::new(&bases).fit(&x, &y, assignment).unwrap();

    let oof = fitted.predictions();
    for i in 0..100 {
        assert_ne!(oof.get(&[i, 0]).unwrap(), y.data()[i], "row {i} saw its own label");
    }
    // In-sample, the production copy does reproduce fitting labels
    let production = fitted.predict(&x).unwrap();
    for &i in &fitted.assignment().fitting_indices() {
        assert_eq!(production.get(&[i, 0]).unwrap(), y.data()[i]);
    }
}

#[test]
fn failing_estimator_is_named() {
    let (x, y) = make_regression(60, 2, 0.5, Some(1)).unwrap();
    let bases: Vec<Box<dyn Regressor>> = vec![Box::new(MeanRegressor::new()), Box::new(Broken)];
    let mut model = StackingRegressor::new(small_config(), bases);
    match model.fit(&x, &y) {
        Err(StackingError::BaseEstimatorFit { index, name, .. }) => {
            assert_eq!(index, 1);
            assert_eq!(name, "Broken");
        }
        other => panic!("expected BaseEstimatorFit, got {other:?}"),
    }
    assert!(!model.is_fitted());
}

#[test]
fn insufficient_data_is_reported() {
    let (x, y) = make_regression(4, 2, 0.5, Some(1)).unwrap();
    let mut model = StackingRegressor::new(small_config(), linear_bases());
    assert!(matches!(model.fit(&x, &y), Err(StackingError::InsufficientData(_))));
}

#[test]
fn fitted_estimators_are_shared_without_refitting() {
    let (x, y) = make_regression(200, 2, 0.5, Some(6)).unwrap();
    let mut first = StackingRegressor::new(small_config().with_max_epochs(10), linear_bases());
    first.fit(&x, &y).unwrap();
    let shared = first.fitted_estimators().unwrap();

    let config = small_config()
        .with_max_epochs(10)
        .with_ensemble_method(EnsembleMethod::Unconstrained);
    let mut second = StackingRegressor::with_fitted_estimators(config, Arc::clone(&shared));
    second.fit_with_predictions(&x, &y, shared.predictions()).unwrap();

    assert_eq!(first.base_predictions(&x).unwrap(), second.base_predictions(&x).unwrap());
    assert!(Arc::ptr_eq(&second.fitted_estimators().unwrap(), &shared));
    assert_eq!(second.predict(&x).unwrap().shape_vec(), vec![200]);
}

#[test]
fn fits_are_deterministic_for_a_seed() {
    let (x, y) = make_regression(150, 2, 0.5, Some(8)).unwrap();
    let fit = || {
        let mut model = StackingRegressor::new(small_config().with_max_epochs(8), linear_bases());
        model.fit(&x, &y).unwrap();
        model.predict(&x).unwrap()
    };
    assert_eq!(fit(), fit());
}

#[test]
fn models_sharing_a_device_fit_concurrently() {
    let (x, y) = make_regression(150, 2, 0.5, Some(10)).unwrap();
    let device = Arc::new(DeviceContext::cpu());
    std::thread::scope(|s| {
        let handles: Vec<_> = (0..2)
            .map(|seed| {
                let device = Arc::clone(&device);
                let (x, y) = (&x, &y);
                s.spawn(move || {
                    let config = small_config().with_max_epochs(5).with_seed(seed);
                    let mut model = StackingRegressor::new(config, linear_bases()).with_device(device);
                    model.fit(x, y).map(|_| model.predict(x))
                })
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap().unwrap().is_ok());
        }
    });
}

#[test]
fn parallel_loading_and_replicas_still_train() {
    let (x, y) = make_regression(300, 2, 0.5, Some(13)).unwrap();
    let config = small_config()
        .with_dataloader_workers(3)
        .with_nworkers(2)
        .with_max_epochs(30);
    let mut model = StackingRegressor::new(config, linear_bases())
        .with_device(Arc::new(DeviceContext::accelerated(2)));
    model.fit(&x, &y).unwrap();
    let report = model.training_report().unwrap();
    assert_eq!(report.device.replicas(), 2);
    assert!(report.best_validation_loss.unwrap().is_finite());
}
