use crate::layers::{Activation, Layer, Linear};
use nnstack_autodiff::Variable;
use nnstack_core::{Tensor, TensorError, TensorResult};

/// Sequential model: chains layers in order.
pub struct Sequential {
    layers: Vec<Box<dyn Layer>>,
}

impl Sequential {
    pub fn new() -> Self {
        Sequential { layers: Vec::new() }
    }

    /// Multi-layer perceptron: `num_layers` hidden layers of width `hidden_size`,
    /// each followed by `activation`, then a linear output of width `out_features`.
    ///
    /// Layer `i` is initialized from `seed + i`.
    pub fn mlp(
        in_features: usize,
        hidden_size: usize,
        num_layers: usize,
        out_features: usize,
        activation: Activation,
        seed: u64,
    ) -> Self {
        let mut model = Sequential::new();
        let mut width = in_features;
        for i in 0..num_layers {
            model = model
                .add(Box::new(Linear::new(width, hidden_size, seed.wrapping_add(i as u64))))
                .add(activation.layer());
            width = hidden_size;
        }
        model.add(Box::new(Linear::new(
            width,
            out_features,
            seed.wrapping_add(num_layers as u64),
        )))
    }

    /// Add a layer to the model.
    pub fn add(mut self, layer: Box<dyn Layer>) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Register every parameter as a leaf in the current thread's graph.
    pub fn bind(&self) -> Vec<Variable> {
        self.parameters()
            .into_iter()
            .map(|p| Variable::param(p.clone()))
            .collect()
    }

    /// Forward pass through all layers using parameters returned by [`bind`](Self::bind).
    pub fn forward(&self, input: &Variable, params: &[Variable]) -> TensorResult<Variable> {
        if params.len() != self.num_parameters() {
            return Err(TensorError::InvalidOperation(format!(
                "expected {} bound parameters, got {}",
                self.num_parameters(),
                params.len()
            )));
        }
        let mut x = input.clone();
        let mut offset = 0;
        for layer in &self.layers {
            let n = layer.parameters().len();
            x = layer.forward(&x, &params[offset..offset + n])?;
            offset += n;
        }
        Ok(x)
    }

    /// Forward pass without building a graph.
    pub fn infer(&self, input: &Tensor<f64>) -> TensorResult<Tensor<f64>> {
        let mut x = input.clone();
        for layer in &self.layers {
            x = layer.infer(&x)?;
        }
        Ok(x)
    }

    /// All trainable parameters, layer by layer.
    pub fn parameters(&self) -> Vec<&Tensor<f64>> {
        self.layers.iter().flat_map(|l| l.parameters()).collect()
    }

    pub fn parameters_mut(&mut self) -> Vec<&mut Tensor<f64>> {
        self.layers.iter_mut().flat_map(|l| l.parameters_mut()).collect()
    }

    pub fn num_parameters(&self) -> usize {
        self.layers.iter().map(|l| l.parameters().len()).sum()
    }

    /// Owned copy of the current parameters.
    pub fn snapshot(&self) -> Vec<Tensor<f64>> {
        self.parameters().into_iter().cloned().collect()
    }

    /// Overwrite the parameters with `values`, which must match in count and shape.
    pub fn load(&mut self, values: &[Tensor<f64>]) -> TensorResult<()> {
        let mut params = self.parameters_mut();
        if params.len() != values.len() {
            return Err(TensorError::InvalidOperation(format!(
                "expected {} parameter tensors, got {}",
                params.len(),
                values.len()
            )));
        }
        for (p, v) in params.iter_mut().zip(values) {
            if p.shape_vec() != v.shape_vec() {
                return Err(TensorError::ShapeMismatch {
                    expected: p.shape_vec(),
                    got: v.shape_vec(),
                });
            }
            **p = v.clone();
        }
        Ok(())
    }
}

impl Default for Sequential {
    fn default() -> Self {
        Self::new()
    }
}
