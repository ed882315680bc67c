use nnstack_autodiff::Variable;
use nnstack_core::{Tensor, TensorError, TensorResult};
use serde::{Deserialize, Serialize};

/// Trait for a neural network layer.
///
/// Layers own their parameter tensors. Training binds them into the current
/// autodiff graph (see [`crate::Sequential::bind`]) and passes the bound
/// variables back to `forward`, in the order `parameters()` returns them.
pub trait Layer: Send + Sync {
    /// Forward pass through the autodiff graph.
    fn forward(&self, input: &Variable, params: &[Variable]) -> TensorResult<Variable>;
    /// Forward pass on plain tensors using the stored parameters.
    fn infer(&self, input: &Tensor<f64>) -> TensorResult<Tensor<f64>>;
    /// Trainable parameters.
    fn parameters(&self) -> Vec<&Tensor<f64>>;
    fn parameters_mut(&mut self) -> Vec<&mut Tensor<f64>>;
}

/// Fully connected (dense) layer: y = xW + b.
pub struct Linear {
    pub weight: Tensor<f64>,
    pub bias: Tensor<f64>,
    pub in_features: usize,
    pub out_features: usize,
}

impl Linear {
    /// Create a new linear layer with Xavier-uniform initialization.
    pub fn new(in_features: usize, out_features: usize, seed: u64) -> Self {
        let scale = (6.0 / (in_features + out_features) as f64).sqrt();
        let weight = Tensor::rand(vec![in_features, out_features], Some(seed))
            .mul_scalar(2.0 * scale)
            .add_scalar(-scale);

        Linear {
            weight,
            bias: Tensor::zeros(vec![1, out_features]),
            in_features,
            out_features,
        }
    }

    fn check_input(&self, shape: &[usize]) -> TensorResult<()> {
        if shape.len() != 2 || shape[1] != self.in_features {
            return Err(TensorError::ShapeMismatch {
                expected: vec![shape.first().copied().unwrap_or(0), self.in_features],
                got: shape.to_vec(),
            });
        }
        Ok(())
    }
}

impl Layer for Linear {
    fn forward(&self, input: &Variable, params: &[Variable]) -> TensorResult<Variable> {
        self.check_input(&input.shape_vec())?;
        let [weight, bias] = params else {
            return Err(TensorError::InvalidOperation(format!(
                "Linear expects 2 bound parameters, got {}",
                params.len()
            )));
        };
        input.matmul(weight)?.add(bias)
    }

    fn infer(&self, input: &Tensor<f64>) -> TensorResult<Tensor<f64>> {
        self.check_input(&input.shape_vec())?;
        input.matmul(&self.weight)?.add(&self.bias)
    }

    fn parameters(&self) -> Vec<&Tensor<f64>> {
        vec![&self.weight, &self.bias]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor<f64>> {
        vec![&mut self.weight, &mut self.bias]
    }
}

/// ReLU activation layer.
pub struct ReLULayer;

impl Layer for ReLULayer {
    fn forward(&self, input: &Variable, _params: &[Variable]) -> TensorResult<Variable> {
        Ok(input.relu())
    }
    fn infer(&self, input: &Tensor<f64>) -> TensorResult<Tensor<f64>> { Ok(input.relu()) }
    fn parameters(&self) -> Vec<&Tensor<f64>> { vec![] }
    fn parameters_mut(&mut self) -> Vec<&mut Tensor<f64>> { vec![] }
}

/// Sigmoid activation layer.
pub struct SigmoidLayer;

impl Layer for SigmoidLayer {
    fn forward(&self, input: &Variable, _params: &[Variable]) -> TensorResult<Variable> {
        Ok(input.sigmoid())
    }
    fn infer(&self, input: &Tensor<f64>) -> TensorResult<Tensor<f64>> { Ok(input.sigmoid()) }
    fn parameters(&self) -> Vec<&Tensor<f64>> { vec![] }
    fn parameters_mut(&mut self) -> Vec<&mut Tensor<f64>> { vec![] }
}

/// Tanh activation layer.
pub struct TanhLayer;

impl Layer for TanhLayer {
    fn forward(&self, input: &Variable, _params: &[Variable]) -> TensorResult<Variable> {
        Ok(input.tanh_act())
    }
    fn infer(&self, input: &Tensor<f64>) -> TensorResult<Tensor<f64>> { Ok(input.tanh_elem()) }
    fn parameters(&self) -> Vec<&Tensor<f64>> { vec![] }
    fn parameters_mut(&mut self) -> Vec<&mut Tensor<f64>> { vec![] }
}

/// Hidden-layer activation choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Activation {
    #[default]
    Relu,
    Tanh,
    Sigmoid,
}

impl Activation {
    pub fn layer(self) -> Box<dyn Layer> {
        match self {
            Activation::Relu => Box::new(ReLULayer),
            Activation::Tanh => Box::new(TanhLayer),
            Activation::Sigmoid => Box::new(SigmoidLayer),
        }
    }
}
