use nnstack_core::{Tensor, TensorResult};
use crate::graph::{with_graph, NodeId, Op};

/// A variable in the computation graph: a tensor plus the node that produced it.
#[derive(Debug, Clone)]
pub struct Variable {
    pub node_id: NodeId,
    pub data: Tensor<f64>,
}

impl Variable {
    /// Create a new leaf variable.
    pub fn new(data: Tensor<f64>, requires_grad: bool) -> Self {
        let node_id = with_graph(|g| g.add_node(Op::Leaf, data.clone(), requires_grad));
        Variable { node_id, data }
    }

    /// Create a parameter (requires grad).
    pub fn param(data: Tensor<f64>) -> Self {
        Self::new(data, true)
    }

    /// Create an input (no grad).
    pub fn input(data: Tensor<f64>) -> Self {
        Self::new(data, false)
    }

    fn record(op: Op, data: Tensor<f64>) -> Variable {
        let node_id = with_graph(|g| g.add_node(op, data.clone(), true));
        Variable { node_id, data }
    }

    pub fn shape_vec(&self) -> Vec<usize> {
        self.data.shape_vec()
    }

    pub fn numel(&self) -> usize {
        self.data.numel()
    }

    /// Element-wise addition (broadcasting).
    pub fn add(&self, other: &Variable) -> TensorResult<Variable> {
        let result = self.data.add(&other.data)?;
        Ok(Self::record(Op::Add(self.node_id, other.node_id), result))
    }

    /// Element-wise subtraction (broadcasting).
    pub fn sub(&self, other: &Variable) -> TensorResult<Variable> {
        let result = self.data.sub(&other.data)?;
        Ok(Self::record(Op::Sub(self.node_id, other.node_id), result))
    }

    /// Element-wise multiplication (broadcasting).
    pub fn mul(&self, other: &Variable) -> TensorResult<Variable> {
        let result = self.data.mul(&other.data)?;
        Ok(Self::record(Op::Mul(self.node_id, other.node_id), result))
    }

    /// Matrix multiplication.
    pub fn matmul(&self, other: &Variable) -> TensorResult<Variable> {
        let result = self.data.matmul(&other.data)?;
        Ok(Self::record(Op::MatMul(self.node_id, other.node_id), result))
    }

    /// ReLU activation.
    pub fn relu(&self) -> Variable {
        Self::record(Op::Relu(self.node_id), self.data.relu())
    }

    /// Sigmoid activation.
    pub fn sigmoid(&self) -> Variable {
        Self::record(Op::Sigmoid(self.node_id), self.data.sigmoid())
    }

    /// Tanh activation.
    pub fn tanh_act(&self) -> Variable {
        Self::record(Op::Tanh(self.node_id), self.data.tanh_elem())
    }

    /// Softmax across the columns of every row; each output row sums to one.
    pub fn softmax_rows(&self) -> TensorResult<Variable> {
        let result = softmax_rows(&self.data)?;
        Ok(Self::record(Op::SoftmaxRows(self.node_id), result))
    }

    /// Row sums of a `[n, k]` tensor, kept as `[n, 1]`.
    pub fn sum_rows(&self) -> TensorResult<Variable> {
        let result = sum_rows(&self.data)?;
        Ok(Self::record(Op::SumRows(self.node_id), result))
    }

    /// Mean of all elements.
    pub fn mean(&self) -> Variable {
        let result = Tensor::scalar(self.data.mean_all());
        Self::record(Op::MeanAll(self.node_id), result)
    }

    /// Multiply by scalar.
    pub fn mul_scalar(&self, s: f64) -> Variable {
        Self::record(Op::MulScalar(self.node_id, s), self.data.mul_scalar(s))
    }
}

/// Row-wise softmax of a 2-D tensor.
pub fn softmax_rows(x: &Tensor<f64>) -> TensorResult<Tensor<f64>> {
    require_2d(x, "softmax_rows")?;
    x.softmax()
}

/// Row sums of a 2-D tensor, shaped `[n, 1]`.
pub fn sum_rows(x: &Tensor<f64>) -> TensorResult<Tensor<f64>> {
    require_2d(x, "sum_rows")?;
    x.sum_axis(1)?.unsqueeze(1)
}

fn require_2d(x: &Tensor<f64>, op: &str) -> TensorResult<()> {
    if x.ndim() != 2 {
        return Err(nnstack_core::TensorError::InvalidOperation(format!(
            "{op} requires a 2D tensor, got shape {:?}",
            x.shape_vec()
        )));
    }
    Ok(())
}
