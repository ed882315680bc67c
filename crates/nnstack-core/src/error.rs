use thiserror::Error;

/// Failure raised by tensor arithmetic, linear algebra or a base regressor.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TensorError {
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },

    #[error("index {index} out of bounds for axis {axis} of size {size}")]
    IndexOutOfBounds { index: usize, axis: usize, size: usize },

    #[error("axis {axis} does not exist on a {ndim}-d tensor")]
    InvalidAxis { axis: usize, ndim: usize },

    #[error("shapes {a:?} and {b:?} do not broadcast")]
    BroadcastError { a: Vec<usize>, b: Vec<usize> },

    #[error("{0}")]
    InvalidOperation(String),

    /// Raised by LU when a pivot vanishes.
    #[error("matrix is singular")]
    SingularMatrix,

    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("tensor is empty")]
    EmptyTensor,
}

pub type TensorResult<T> = Result<T, TensorError>;
