use nnstack_core::{Tensor, TensorError, TensorResult};

/// Trait for datasets.
pub trait Dataset: Sync {
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Gather the given rows into one batch, preserving their order.
    fn gather(&self, indices: &[usize]) -> TensorResult<Vec<Tensor<f64>>>;
}

/// Several row-aligned tensors indexed together, e.g. `[inputs, base_predictions, targets]`.
#[derive(Debug, Clone)]
pub struct TensorDataset {
    pub tensors: Vec<Tensor<f64>>,
    len: usize,
}

impl TensorDataset {
    pub fn new(tensors: Vec<Tensor<f64>>) -> TensorResult<Self> {
        let first = tensors.first().ok_or(TensorError::EmptyTensor)?;
        let len = first.nrows()?;
        for t in &tensors[1..] {
            let rows = t.nrows()?;
            if rows != len {
                return Err(TensorError::DimensionMismatch(format!(
                    "dataset tensors must share a row count: {} vs {}",
                    len, rows
                )));
            }
        }
        Ok(TensorDataset { tensors, len })
    }
}

impl Dataset for TensorDataset {
    fn len(&self) -> usize {
        self.len
    }

    fn gather(&self, indices: &[usize]) -> TensorResult<Vec<Tensor<f64>>> {
        self.tensors.iter().map(|t| t.select_rows(indices)).collect()
    }
}
