use nnstack_data::BatchSchedule;
use nnstack_nn::Activation;
use serde::{Deserialize, Serialize};

use crate::error::{StackingError, StackingResult};

/// How the combiner turns its head outputs into mixture weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EnsembleMethod {
    /// Softmax weights: non-negative, summing to one per instance.
    #[default]
    Constrained,
    /// Raw head outputs used as real-valued weights.
    Unconstrained,
}

/// What to do when a base estimator predicts more than one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MultiOutputPolicy {
    #[default]
    Reject,
    FirstColumn,
}

/// Network architecture and optimization settings shared by stacking and direct mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub hidden_size: usize,
    pub num_layers: usize,
    pub activation: Activation,
    /// L2 penalty added to every parameter gradient.
    pub nn_weight_decay: f64,
    pub optim_lr: f64,
    pub max_epochs: usize,
    pub batch_schedule: BatchSchedule,
    /// Early stopping on a held-out validation subset.
    pub es: bool,
    pub es_patience: usize,
    pub es_validation_fraction: f64,
    /// Request the accelerated (data-parallel) device.
    pub gpu: bool,
    pub dataloader_workers: usize,
    /// Standardize network inputs with statistics from the training rows.
    pub scale_inputs: bool,
    pub seed: u64,
    /// 0 silent, 1 stage-level events, 2 per-epoch events.
    pub verbose: u8,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            hidden_size: 100,
            num_layers: 10,
            activation: Activation::Relu,
            nn_weight_decay: 0.0,
            optim_lr: 1e-3,
            max_epochs: 500,
            batch_schedule: BatchSchedule::default(),
            es: true,
            es_patience: 50,
            es_validation_fraction: 0.1,
            gpu: false,
            dataloader_workers: 1,
            scale_inputs: true,
            seed: 0,
            verbose: 0,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> StackingResult<()> {
        let invalid = |msg: String| Err(StackingError::InvalidConfiguration(msg));
        if self.num_layers > 0 && self.hidden_size == 0 {
            return invalid(format!(
                "hidden_size must be positive when num_layers = {}",
                self.num_layers
            ));
        }
        if !(self.optim_lr.is_finite() && self.optim_lr > 0.0) {
            return invalid(format!("optim_lr must be positive, got {}", self.optim_lr));
        }
        if !(self.nn_weight_decay.is_finite() && self.nn_weight_decay >= 0.0) {
            return invalid(format!(
                "nn_weight_decay must be non-negative, got {}",
                self.nn_weight_decay
            ));
        }
        if self.max_epochs == 0 {
            return invalid("max_epochs must be at least 1".into());
        }
        if self.batch_schedule.initial == 0 || self.batch_schedule.max_size == 0 {
            return invalid("batch sizes must be positive".into());
        }
        if self.es {
            if self.es_patience == 0 {
                return invalid("es_patience must be at least 1".into());
            }
            let v = self.es_validation_fraction;
            if !(v > 0.0 && v < 1.0) {
                return invalid(format!("es_validation_fraction must lie in (0, 1), got {v}"));
            }
        }
        if self.dataloader_workers == 0 {
            return invalid("dataloader_workers must be at least 1".into());
        }
        Ok(())
    }
}

/// Configuration for [`crate::StackingRegressor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackingConfig {
    #[serde(flatten)]
    pub training: TrainingConfig,
    pub ensemble_method: EnsembleMethod,
    /// Add a learned per-instance offset to the weighted sum.
    pub ensemble_addition: bool,
    pub n_folds: usize,
    /// Threads used to fit base estimators.
    pub nworkers: usize,
    pub multi_output: MultiOutputPolicy,
    /// Feed base predictions to the network alongside the features.
    pub predictions_as_input: bool,
}

impl Default for StackingConfig {
    fn default() -> Self {
        Self {
            training: TrainingConfig::default(),
            ensemble_method: EnsembleMethod::Constrained,
            ensemble_addition: false,
            n_folds: 5,
            nworkers: 1,
            multi_output: MultiOutputPolicy::Reject,
            predictions_as_input: false,
        }
    }
}

impl StackingConfig {
    pub fn validate(&self) -> StackingResult<()> {
        self.training.validate()?;
        if self.n_folds < 2 {
            return Err(StackingError::InvalidConfiguration(format!(
                "n_folds must be at least 2, got {}",
                self.n_folds
            )));
        }
        if self.nworkers == 0 {
            return Err(StackingError::InvalidConfiguration(
                "nworkers must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn with_ensemble_method(mut self, method: EnsembleMethod) -> Self {
        self.ensemble_method = method;
        self
    }

    pub fn with_ensemble_addition(mut self, enabled: bool) -> Self {
        self.ensemble_addition = enabled;
        self
    }

    pub fn with_n_folds(mut self, n_folds: usize) -> Self {
        self.n_folds = n_folds;
        self
    }

    pub fn with_nworkers(mut self, nworkers: usize) -> Self {
        self.nworkers = nworkers;
        self
    }

    pub fn with_multi_output(mut self, policy: MultiOutputPolicy) -> Self {
        self.multi_output = policy;
        self
    }

    pub fn with_predictions_as_input(mut self, enabled: bool) -> Self {
        self.predictions_as_input = enabled;
        self
    }

    pub fn with_training(mut self, training: TrainingConfig) -> Self {
        self.training = training;
        self
    }
}

/// Configuration for [`crate::NeuralRegressor`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NeuralConfig {
    #[serde(flatten)]
    pub training: TrainingConfig,
}

impl NeuralConfig {
    pub fn validate(&self) -> StackingResult<()> {
        self.training.validate()
    }

    pub fn with_training(mut self, training: TrainingConfig) -> Self {
        self.training = training;
        self
    }
}

macro_rules! training_builders {
    ($($ty:ty),*) => {$(
        impl $ty {
            pub fn with_hidden_size(mut self, hidden_size: usize) -> Self {
                self.training.hidden_size = hidden_size;
                self
            }

            pub fn with_num_layers(mut self, num_layers: usize) -> Self {
                self.training.num_layers = num_layers;
                self
            }

            pub fn with_activation(mut self, activation: Activation) -> Self {
                self.training.activation = activation;
                self
            }

            pub fn with_weight_decay(mut self, weight_decay: f64) -> Self {
                self.training.nn_weight_decay = weight_decay;
                self
            }

            pub fn with_learning_rate(mut self, lr: f64) -> Self {
                self.training.optim_lr = lr;
                self
            }

            pub fn with_max_epochs(mut self, max_epochs: usize) -> Self {
                self.training.max_epochs = max_epochs;
                self
            }

            pub fn with_batch_schedule(mut self, schedule: BatchSchedule) -> Self {
                self.training.batch_schedule = schedule;
                self
            }

            pub fn with_early_stopping(mut self, patience: usize, validation_fraction: f64) -> Self {
                self.training.es = true;
                self.training.es_patience = patience;
                self.training.es_validation_fraction = validation_fraction;
                self
            }

            pub fn without_early_stopping(mut self) -> Self {
                self.training.es = false;
                self
            }

            pub fn with_gpu(mut self, gpu: bool) -> Self {
                self.training.gpu = gpu;
                self
            }

            pub fn with_dataloader_workers(mut self, workers: usize) -> Self {
                self.training.dataloader_workers = workers;
                self
            }

            pub fn with_scale_inputs(mut self, enabled: bool) -> Self {
                self.training.scale_inputs = enabled;
                self
            }

            pub fn with_seed(mut self, seed: u64) -> Self {
                self.training.seed = seed;
                self
            }

            pub fn with_verbose(mut self, verbose: u8) -> Self {
                self.training.verbose = verbose;
                self
            }
        }
    )*};
}

training_builders!(StackingConfig, NeuralConfig);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        StackingConfig::default().validate().unwrap();
        NeuralConfig::default().validate().unwrap();
        assert_eq!(StackingConfig::default().training.hidden_size, 100);
        assert_eq!(StackingConfig::default().training.num_layers, 10);
    }

    #[test]
    fn test_zero_width_hidden_layers_rejected() {
        let cfg = StackingConfig::default().with_hidden_size(0).with_num_layers(2);
        assert!(matches!(cfg.validate(), Err(StackingError::InvalidConfiguration(_))));

        // No hidden layers: width is irrelevant
        let cfg = StackingConfig::default().with_hidden_size(0).with_num_layers(0);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_bad_values_rejected() {
        assert!(StackingConfig::default().with_n_folds(1).validate().is_err());
        assert!(StackingConfig::default().with_nworkers(0).validate().is_err());
        assert!(StackingConfig::default().with_learning_rate(0.0).validate().is_err());
        assert!(StackingConfig::default().with_weight_decay(-1.0).validate().is_err());
        assert!(StackingConfig::default().with_early_stopping(5, 1.5).validate().is_err());
        // The validation fraction is ignored without early stopping
        StackingConfig::default()
            .with_early_stopping(5, 1.5)
            .without_early_stopping()
            .validate()
            .unwrap();
    }

    #[test]
    fn test_serde_round_trip_with_partial_input() {
        let cfg = StackingConfig::default()
            .with_ensemble_method(EnsembleMethod::Unconstrained)
            .with_hidden_size(8);
        let json = serde_json::to_string(&cfg).unwrap();
        let back: StackingConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);

        // Missing keys fall back to defaults; training keys sit at the top level
        let partial: StackingConfig =
            serde_json::from_str(r#"{"hidden_size": 4, "ensemble_addition": true}"#).unwrap();
        assert_eq!(partial.training.hidden_size, 4);
        assert!(partial.ensemble_addition);
        assert_eq!(partial.n_folds, 5);
    }
}
