use crate::error::{TensorError, TensorResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Dimensions of a tensor, outermost first. An empty list is a scalar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    pub fn new(dims: Vec<usize>) -> Self {
        Shape { dims }
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    pub fn dim(&self, axis: usize) -> TensorResult<usize> {
        self.dims.get(axis).copied().ok_or(TensorError::InvalidAxis {
            axis,
            ndim: self.ndim(),
        })
    }

    /// Element count; a scalar holds one.
    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn to_vec(&self) -> Vec<usize> {
        self.dims.clone()
    }

    /// Row-major strides.
    pub fn strides(&self) -> Vec<usize> {
        let mut strides = vec![1; self.dims.len()];
        for i in (1..self.dims.len()).rev() {
            strides[i - 1] = strides[i] * self.dims[i];
        }
        strides
    }

    /// Shape produced by broadcasting `self` against `other`, aligning trailing axes.
    pub fn broadcast_with(&self, other: &Shape) -> TensorResult<Shape> {
        let ndim = self.ndim().max(other.ndim());
        let padded = |s: &Shape, i: usize| {
            let lead = ndim - s.ndim();
            if i < lead { 1 } else { s.dims[i - lead] }
        };
        let mut dims = Vec::with_capacity(ndim);
        for i in 0..ndim {
            let (a, b) = (padded(self, i), padded(other, i));
            dims.push(match (a, b) {
                _ if a == b => a,
                (1, _) => b,
                (_, 1) => a,
                _ => {
                    return Err(TensorError::BroadcastError {
                        a: self.to_vec(),
                        b: other.to_vec(),
                    })
                }
            });
        }
        Ok(Shape::new(dims))
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.dims.iter().map(|d| d.to_string()).collect();
        write!(f, "({})", parts.join(", "))
    }
}
