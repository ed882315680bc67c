//! Compare test-set risk of the base regressors, the stacking variants and a
//! plain neural regressor on a synthetic problem.
//!
//! `cargo run -p nnstack --example risk_comparison --release`
//! (set `RUST_LOG=nnstack_ensemble=debug` for per-epoch logs)

use std::error::Error;
use std::sync::Arc;

use nnstack::data::BatchSchedule;
use nnstack::datasets::make_regime_switch;
use nnstack::ensemble::EnsembleMethod;
use nnstack::linear::{Lasso, LinearRegression, MeanRegressor, Ridge};
use nnstack::metrics::{mae, mse, r2_score, rmse};
use nnstack::neighbors::{DistanceMetric, KNNRegressor};
use nnstack::preprocessing::train_test_split;
use nnstack::{NeuralConfig, NeuralRegressor, Regressor, StackingConfig, StackingRegressor, Tensor};

fn report(label: &str, y: &Tensor<f64>, pred: &Tensor<f64>) -> Result<(), Box<dyn Error>> {
    println!(
        "{label:<28} {:>10.4} {:>10.4} {:>10.4} {:>8.3}",
        mse(y, pred)?,
        rmse(y, pred)?,
        mae(y, pred)?,
        r2_score(y, pred)?
    );
    Ok(())
}

/// Column indices of `preds` ordered by ascending test MSE.
fn ranked_by_risk(y: &Tensor<f64>, preds: &Tensor<f64>) -> Result<Vec<usize>, Box<dyn Error>> {
    let mut risks = (0..preds.shape().dim(1)?)
        .map(|j| Ok((j, mse(y, &preds.col(j)?)?)))
        .collect::<Result<Vec<_>, Box<dyn Error>>>()?;
    risks.sort_by(|a, b| a.1.total_cmp(&b.1));
    Ok(risks.into_iter().map(|(j, _)| j).collect())
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nnstack_ensemble=info".into()),
        )
        .init();

    let (x, y) = make_regime_switch(2000, 4, 0.1, Some(0))?;
    let (x_train, x_test, y_train, y_test) = train_test_split(&x, &y, 0.25, Some(1))?;

    let estimators: Vec<Box<dyn Regressor>> = vec![
        Box::new(LinearRegression::new(true)),
        Box::new(Ridge::new(1.0, true)),
        Box::new(Lasso::new(0.05, 1000)),
        Box::new(KNNRegressor::new(10, DistanceMetric::Euclidean)),
        Box::new(MeanRegressor::new()),
    ];

    let base = StackingConfig::default()
        .with_hidden_size(32)
        .with_num_layers(3)
        .with_learning_rate(0.003)
        .with_max_epochs(150)
        .with_batch_schedule(BatchSchedule { initial: 64, multiplier: 0.5, exponent: 1.5, max_size: 512 })
        .with_early_stopping(20, 0.1)
        .with_nworkers(4)
        .with_verbose(1);

    // Constrained stacking fits the base estimators; the other variants reuse them
    let mut cnns = StackingRegressor::new(base.clone(), estimators);
    cnns.fit(&x_train, &y_train)?;
    let shared = cnns
        .fitted_estimators()
        .ok_or("stacking fit produced no base estimators")?;

    println!("{:<28} {:>10} {:>10} {:>10} {:>8}", "model", "MSE", "RMSE", "MAE", "R2");
    let base_preds = cnns.base_predictions(&x_test)?;
    let names = shared.names();
    for j in ranked_by_risk(&y_test, &base_preds)? {
        report(&names[j], &y_test, &base_preds.col(j)?)?;
    }
    report("stacking (constrained)", &y_test, &cnns.predict(&x_test)?)?;

    let variants = [
        ("stacking (unconstrained)", base.clone().with_ensemble_method(EnsembleMethod::Unconstrained)),
        ("stacking (+ offset)", base.clone().with_ensemble_addition(true)),
    ];
    for (label, config) in variants {
        let mut model = StackingRegressor::with_fitted_estimators(config, Arc::clone(&shared));
        model.fit_with_predictions(&x_train, &y_train, shared.predictions())?;
        report(label, &y_test, &model.predict(&x_test)?)?;
    }

    let mut direct = NeuralRegressor::new(NeuralConfig::default().with_training(base.training));
    direct.fit(&x_train, &y_train)?;
    report("neural network (direct)", &y_test, &direct.predict(&x_test)?)?;

    Ok(())
}
