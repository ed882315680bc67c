use std::sync::Arc;

use nnstack_core::{Regressor, Tensor, TensorError};
use nnstack_preprocessing::FoldAssignment;
use rayon::prelude::*;
use tracing::debug;

use crate::config::MultiOutputPolicy;
use crate::error::{StackingError, StackingResult};

/// Immutable handle to a fitted base estimator.
pub type EstimatorHandle = Arc<dyn Regressor>;

/// Product of [`BaseEstimatorPool::fit`]: every fitted copy plus the training
/// base-prediction matrix. Shared between ensembles through `Arc`.
pub struct FittedEstimators {
    production: Vec<EstimatorHandle>,
    per_fold: Vec<Vec<EstimatorHandle>>,
    assignment: FoldAssignment,
    predictions: Tensor<f64>,
    multi_output: MultiOutputPolicy,
}

impl FittedEstimators {
    pub fn len(&self) -> usize {
        self.production.len()
    }

    pub fn is_empty(&self) -> bool {
        self.production.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.production.iter().map(|e| e.name()).collect()
    }

    /// Copies fitted on every fitting row (validation rows excluded).
    pub fn production(&self) -> &[EstimatorHandle] {
        &self.production
    }

    /// Copies fitted without fold `k`, indexed by estimator.
    pub fn fold_estimators(&self, k: usize) -> Option<&[EstimatorHandle]> {
        self.per_fold.get(k).map(Vec::as_slice)
    }

    pub fn assignment(&self) -> &FoldAssignment {
        &self.assignment
    }

    /// `[n, k]` base predictions for the training rows: out-of-fold for fitting
    /// rows, production-copy predictions for validation rows.
    pub fn predictions(&self) -> &Tensor<f64> {
        &self.predictions
    }

    /// `[n, k]` production-estimator predictions for `x`.
    pub fn predict(&self, x: &Tensor<f64>) -> StackingResult<Tensor<f64>> {
        let n = x.nrows()?;
        let columns = self
            .production
            .iter()
            .enumerate()
            .map(|(j, est)| predict_column(j, est.as_ref(), x, n, self.multi_output))
            .collect::<StackingResult<Vec<_>>>()?;
        Ok(assemble(n, columns.iter().map(|c| (0..n).zip(c.iter().copied())))?)
    }
}

impl std::fmt::Debug for FittedEstimators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FittedEstimators")
            .field("estimators", &self.names())
            .field("n_folds", &self.per_fold.len())
            .field("n_samples", &self.assignment.n_samples())
            .finish()
    }
}

/// Fits every base estimator once per fold and once on all fitting rows.
pub struct BaseEstimatorPool<'a> {
    estimators: &'a [Box<dyn Regressor>],
    nworkers: usize,
    multi_output: MultiOutputPolicy,
}

/// One unit of pool work: estimator `estimator` fitted without `fold`
/// (`None` for the production copy).
#[derive(Debug, Clone, Copy)]
struct Job {
    fold: Option<usize>,
    estimator: usize,
}

impl<'a> BaseEstimatorPool<'a> {
    pub fn new(estimators: &'a [Box<dyn Regressor>]) -> Self {
        BaseEstimatorPool {
            estimators,
            nworkers: 1,
            multi_output: MultiOutputPolicy::Reject,
        }
    }

    pub fn with_nworkers(mut self, nworkers: usize) -> Self {
        self.nworkers = nworkers.max(1);
        self
    }

    pub fn with_multi_output(mut self, policy: MultiOutputPolicy) -> Self {
        self.multi_output = policy;
        self
    }

    /// Fit all (fold, estimator) copies on a bounded pool and gather the
    /// out-of-fold matrix. Results are merged in job order, so the output does
    /// not depend on `nworkers`.
    pub fn fit(
        &self,
        x: &Tensor<f64>,
        y: &Tensor<f64>,
        assignment: FoldAssignment,
    ) -> StackingResult<FittedEstimators> {
        let n = x.nrows()?;
        if assignment.n_samples() != n || y.numel() != n {
            return Err(StackingError::InvalidConfiguration(format!(
                "fold assignment covers {} samples but X has {} rows and y has {}",
                assignment.n_samples(),
                n,
                y.numel()
            )));
        }
        let k = self.estimators.len();
        let n_folds = assignment.n_folds();

        let jobs: Vec<Job> = (0..n_folds)
            .map(Some)
            .chain(std::iter::once(None))
            .flat_map(|fold| (0..k).map(move |estimator| Job { fold, estimator }))
            .collect();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.nworkers)
            .build()
            .map_err(|e| {
                StackingError::InvalidConfiguration(format!("cannot build estimator pool: {e}"))
            })?;

        debug!(jobs = jobs.len(), nworkers = self.nworkers, "fitting base estimators");
        let results: Vec<StackingResult<(EstimatorHandle, Vec<usize>, Vec<f64>)>> =
            pool.install(|| {
                jobs.par_iter()
                    .map(|job| self.run_job(*job, x, y, &assignment))
                    .collect()
            });

        let mut per_fold: Vec<Vec<EstimatorHandle>> = vec![Vec::with_capacity(k); n_folds];
        let mut production = Vec::with_capacity(k);
        let mut columns: Vec<Vec<(usize, f64)>> = vec![Vec::with_capacity(n); k];
        for (job, result) in jobs.iter().zip(results) {
            let (handle, rows, values) = result?;
            columns[job.estimator].extend(rows.into_iter().zip(values));
            match job.fold {
                Some(fold) => per_fold[fold].push(handle),
                None => production.push(handle),
            }
        }

        let predictions = assemble(n, columns.into_iter())?;
        Ok(FittedEstimators {
            production,
            per_fold,
            assignment,
            predictions,
            multi_output: self.multi_output,
        })
    }

    fn run_job(
        &self,
        job: Job,
        x: &Tensor<f64>,
        y: &Tensor<f64>,
        assignment: &FoldAssignment,
    ) -> StackingResult<(EstimatorHandle, Vec<usize>, Vec<f64>)> {
        let (fit_rows, predict_rows) = match job.fold {
            Some(fold) => (assignment.complement_indices(fold), assignment.fold_indices(fold)),
            None => (assignment.fitting_indices(), assignment.validation_indices()),
        };

        let template = &self.estimators[job.estimator];
        let wrap = |source: TensorError| StackingError::BaseEstimatorFit {
            index: job.estimator,
            name: template.name(),
            source,
        };

        let mut model = template.clone_unfitted();
        model
            .fit(&x.select_rows(&fit_rows)?, &y.select_rows(&fit_rows)?)
            .map_err(wrap)?;

        let values = if predict_rows.is_empty() {
            Vec::new()
        } else {
            let held_out = x.select_rows(&predict_rows)?;
            predict_column(job.estimator, model.as_ref(), &held_out, predict_rows.len(), self.multi_output)?
        };
        Ok((Arc::from(model), predict_rows, values))
    }
}

/// Predict with one estimator and reduce the output to a single finite column.
fn predict_column(
    index: usize,
    estimator: &dyn Regressor,
    x: &Tensor<f64>,
    n: usize,
    policy: MultiOutputPolicy,
) -> StackingResult<Vec<f64>> {
    let wrap = |source: TensorError| StackingError::BaseEstimatorFit {
        index,
        name: estimator.name(),
        source,
    };
    let pred = estimator.predict(x).map_err(wrap)?;
    to_column(&pred, n, policy).map_err(wrap)
}

fn to_column(
    pred: &Tensor<f64>,
    n: usize,
    policy: MultiOutputPolicy,
) -> Result<Vec<f64>, TensorError> {
    let shape = pred.shape_vec();
    let column = match shape.as_slice() {
        [rows] if *rows == n => pred.data().to_vec(),
        [rows, 1] if *rows == n => pred.data().to_vec(),
        [rows, cols] if *rows == n && *cols > 1 => match policy {
            MultiOutputPolicy::FirstColumn => pred.col(0)?.into_data(),
            MultiOutputPolicy::Reject => {
                return Err(TensorError::InvalidOperation(format!(
                    "prediction has {cols} output columns; only single-output estimators are accepted"
                )))
            }
        },
        _ => {
            return Err(TensorError::ShapeMismatch {
                expected: vec![n],
                got: shape,
            })
        }
    };
    if column.iter().any(|v| !v.is_finite()) {
        return Err(TensorError::InvalidOperation("prediction contains non-finite values".into()));
    }
    Ok(column)
}

/// Build an `[n, k]` matrix from one `(row, value)` stream per column.
fn assemble<C, I>(n: usize, columns: C) -> Result<Tensor<f64>, TensorError>
where
    C: ExactSizeIterator<Item = I>,
    I: IntoIterator<Item = (usize, f64)>,
{
    let k = columns.len();
    let mut data = vec![0.0; n * k];
    for (j, column) in columns.enumerate() {
        for (row, value) in column {
            data[row * k + j] = value;
        }
    }
    Tensor::new(data, vec![n, k])
}
