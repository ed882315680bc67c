use nnstack_core::TensorError;
use nnstack_preprocessing::SplitError;
use thiserror::Error;

/// Errors raised while fitting or querying a stacking ensemble.
#[derive(Debug, Error)]
pub enum StackingError {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Base estimator {index} ({name}) failed: {source}")]
    BaseEstimatorFit {
        index: usize,
        name: String,
        source: TensorError,
    },

    #[error("Optimization diverged at epoch {epoch}: loss {loss}")]
    OptimizationDiverged { epoch: usize, loss: f64 },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error(transparent)]
    Tensor(#[from] TensorError),
}

pub type StackingResult<T> = Result<T, StackingError>;

impl From<SplitError> for StackingError {
    fn from(e: SplitError) -> Self {
        match e {
            SplitError::InsufficientData(msg) => StackingError::InsufficientData(msg),
            SplitError::InvalidArgument(msg) => StackingError::InvalidConfiguration(msg),
        }
    }
}

pub(crate) fn not_fitted() -> StackingError {
    StackingError::InvalidConfiguration("model is not fitted".into())
}
