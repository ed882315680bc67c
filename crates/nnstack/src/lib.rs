//! # NNStack
//!
//! Neural stacking for regression: heterogeneous base regressors are fitted
//! out-of-fold and a feed-forward network learns how to mix their predictions
//! for every instance.
//!
//! ## Modules
//!
//! - **core**: Tensor engine and the `Regressor` capability
//! - **linalg**: LU decomposition and linear solves
//! - **autodiff**: Reverse-mode automatic differentiation
//! - **nn**: Linear layer, ReLU/Sigmoid/Tanh, Sequential MLP, MSE loss
//! - **optim**: Adam with weight decay
//! - **data**: Dataset trait, worker-backed DataLoader, batch schedules
//! - **preprocessing**: StandardScaler, train/test split, fold splitting
//! - **metrics**: MSE, RMSE, MAE, R²
//! - **linear**: OLS, Ridge, Lasso, constant-mean regressors
//! - **neighbors**: k-NN regressor
//! - **datasets**: Synthetic regression generators
//! - **ensemble**: Stacking ensemble and direct neural regressor

/// Core tensor engine.
pub use nnstack_core as core;

/// Linear algebra operations.
pub use nnstack_linalg as linalg;

/// Automatic differentiation.
pub use nnstack_autodiff as autodiff;

/// Neural network layers.
pub use nnstack_nn as nn;

/// Optimizers.
pub use nnstack_optim as optim;

/// Data loading utilities.
pub use nnstack_data as data;

/// Data preprocessing.
pub use nnstack_preprocessing as preprocessing;

/// Evaluation metrics.
pub use nnstack_metrics as metrics;

/// Linear models.
pub use nnstack_linear as linear;

/// Nearest neighbors.
pub use nnstack_neighbors as neighbors;

/// Synthetic datasets.
pub use nnstack_datasets as datasets;

/// Stacking ensembles.
pub use nnstack_ensemble as ensemble;

pub use nnstack_core::{Regressor, Tensor};
pub use nnstack_ensemble::{NeuralConfig, NeuralRegressor, StackingConfig, StackingRegressor};
