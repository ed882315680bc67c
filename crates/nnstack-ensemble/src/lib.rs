//! Neural stacking: base regressors fitted out-of-fold, combined per instance
//! by a feed-forward network.

pub mod config;
pub mod device;
pub mod direct;
pub mod error;
pub mod network;
pub mod pool;
pub mod stacking;
pub mod trainer;

pub use config::{EnsembleMethod, MultiOutputPolicy, NeuralConfig, StackingConfig, TrainingConfig};
pub use device::{Device, DeviceContext};
pub use direct::NeuralRegressor;
pub use error::{StackingError, StackingResult};
pub use network::{CombinerNetwork, Head};
pub use pool::{BaseEstimatorPool, EstimatorHandle, FittedEstimators};
pub use stacking::StackingRegressor;
pub use trainer::{Trainer, TrainingData, TrainingReport};
