use crate::dtype::Float;
use crate::error::{TensorError, TensorResult};
use crate::shape::Shape;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;

/// N-dimensional tensor shared by every NNStack crate.
///
/// Data is a flat row-major `Vec<T>`. Samples are rows: a design matrix is
/// `[n_samples, n_features]` and a target vector is `[n_samples]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "T: Float")]
pub struct Tensor<T: Float> {
    data: Vec<T>,
    shape: Shape,
}

fn require_2d<T: Float>(t: &Tensor<T>, op: &str) -> TensorResult<(usize, usize)> {
    match t.shape.dims() {
        &[r, c] => Ok((r, c)),
        _ => Err(TensorError::InvalidOperation(format!(
            "{op} requires a 2-d tensor, got shape {}",
            t.shape
        ))),
    }
}

impl<T: Float> Tensor<T> {
    pub fn new(data: Vec<T>, shape: Vec<usize>) -> TensorResult<Self> {
        let shape = Shape::new(shape);
        if data.len() != shape.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: shape.to_vec(),
                got: vec![data.len()],
            });
        }
        Ok(Tensor { data, shape })
    }

    pub fn full(shape: Vec<usize>, value: T) -> Self {
        let shape = Shape::new(shape);
        Tensor { data: vec![value; shape.numel()], shape }
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        Self::full(shape, T::ZERO)
    }

    pub fn ones(shape: Vec<usize>) -> Self {
        Self::full(shape, T::ONE)
    }

    /// 0-d tensor holding `value`.
    pub fn scalar(value: T) -> Self {
        Tensor { data: vec![value], shape: Shape::new(vec![]) }
    }

    pub fn from_slice(data: &[T]) -> Self {
        Tensor { data: data.to_vec(), shape: Shape::new(vec![data.len()]) }
    }

    /// Matrix from rows of equal length. No rows gives a `[0, 0]` tensor.
    pub fn from_vec2d(rows: &[Vec<T>]) -> TensorResult<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        if let Some(bad) = rows.iter().find(|r| r.len() != cols) {
            return Err(TensorError::ShapeMismatch {
                expected: vec![cols],
                got: vec![bad.len()],
            });
        }
        Tensor::new(rows.concat(), vec![rows.len(), cols])
    }

    pub fn eye(n: usize) -> Self {
        let mut out = Self::zeros(vec![n, n]);
        for i in 0..n {
            out.data[i * n + i] = T::ONE;
        }
        out
    }

    /// Uniform samples in `[0, 1)`. A seed makes the draw reproducible.
    pub fn rand(shape: Vec<usize>, seed: Option<u64>) -> Self {
        let shape = Shape::new(shape);
        let mut rng = seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        let data = (0..shape.numel()).map(|_| T::from_f64(rng.gen::<f64>())).collect();
        Tensor { data, shape }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn shape_vec(&self) -> Vec<usize> {
        self.shape.to_vec()
    }

    pub fn ndim(&self) -> usize {
        self.shape.ndim()
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn into_data(self) -> Vec<T> {
        self.data
    }

    /// The only element of a one-element tensor.
    pub fn item(&self) -> TensorResult<T> {
        match self.data.as_slice() {
            &[v] => Ok(v),
            _ => Err(TensorError::InvalidOperation(format!(
                "item() needs exactly one element, tensor has {}",
                self.data.len()
            ))),
        }
    }

    fn offset(&self, index: &[usize]) -> TensorResult<usize> {
        if index.len() != self.ndim() {
            return Err(TensorError::DimensionMismatch(format!(
                "{} indices for a {}-d tensor",
                index.len(),
                self.ndim()
            )));
        }
        let strides = self.shape.strides();
        let mut offset = 0;
        for (axis, (&i, &size)) in index.iter().zip(self.shape.dims()).enumerate() {
            if i >= size {
                return Err(TensorError::IndexOutOfBounds { index: i, axis, size });
            }
            offset += i * strides[axis];
        }
        Ok(offset)
    }

    pub fn get(&self, index: &[usize]) -> TensorResult<T> {
        Ok(self.data[self.offset(index)?])
    }

    pub fn set(&mut self, index: &[usize], value: T) -> TensorResult<()> {
        let at = self.offset(index)?;
        self.data[at] = value;
        Ok(())
    }

    /// Size of axis 0, i.e. the sample count.
    pub fn nrows(&self) -> TensorResult<usize> {
        self.shape.dim(0)
    }

    /// Row `i` of a matrix as a 1-d tensor.
    pub fn row(&self, i: usize) -> TensorResult<Tensor<T>> {
        let (rows, cols) = require_2d(self, "row")?;
        if i >= rows {
            return Err(TensorError::IndexOutOfBounds { index: i, axis: 0, size: rows });
        }
        Ok(Tensor::from_slice(&self.data[i * cols..(i + 1) * cols]))
    }

    /// Column `j` of a matrix as a 1-d tensor.
    pub fn col(&self, j: usize) -> TensorResult<Tensor<T>> {
        let (_, cols) = require_2d(self, "col")?;
        if j >= cols {
            return Err(TensorError::IndexOutOfBounds { index: j, axis: 1, size: cols });
        }
        let data: Vec<T> = self.data.iter().skip(j).step_by(cols).copied().collect();
        Ok(Tensor::from_slice(&data))
    }

    /// Gather samples in the order given. Works on `[n]` and `[n, d]`.
    pub fn select_rows(&self, indices: &[usize]) -> TensorResult<Tensor<T>> {
        let rows = self.shape.dim(0)?;
        let width = match self.ndim() {
            1 => 1,
            2 => self.shape.dims()[1],
            _ => {
                return Err(TensorError::InvalidOperation(format!(
                    "select_rows expects 1-d or 2-d, got shape {}",
                    self.shape
                )))
            }
        };
        let mut data = Vec::with_capacity(indices.len() * width);
        for &i in indices {
            if i >= rows {
                return Err(TensorError::IndexOutOfBounds { index: i, axis: 0, size: rows });
            }
            data.extend_from_slice(&self.data[i * width..(i + 1) * width]);
        }
        let mut dims = self.shape.to_vec();
        dims[0] = indices.len();
        Tensor::new(data, dims)
    }

    /// Rows `start..end` of a matrix.
    pub fn slice_rows(&self, start: usize, end: usize) -> TensorResult<Tensor<T>> {
        let (rows, cols) = require_2d(self, "slice_rows")?;
        if start >= end || end > rows {
            return Err(TensorError::IndexOutOfBounds { index: end, axis: 0, size: rows });
        }
        Tensor::new(self.data[start * cols..end * cols].to_vec(), vec![end - start, cols])
    }

    /// False if any element is NaN or infinite.
    pub fn all_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    pub fn reshape(&self, shape: Vec<usize>) -> TensorResult<Tensor<T>> {
        let shape = Shape::new(shape);
        if shape.numel() != self.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: shape.to_vec(),
                got: self.shape_vec(),
            });
        }
        Ok(Tensor { data: self.data.clone(), shape })
    }

    pub fn flatten(&self) -> Tensor<T> {
        Tensor::from_slice(&self.data)
    }

    /// Matrix transpose.
    pub fn t(&self) -> TensorResult<Tensor<T>> {
        let (rows, cols) = require_2d(self, "transpose")?;
        let mut data = Vec::with_capacity(self.numel());
        for j in 0..cols {
            data.extend((0..rows).map(|i| self.data[i * cols + j]));
        }
        Tensor::new(data, vec![cols, rows])
    }

    /// Insert a length-1 axis at `axis`.
    pub fn unsqueeze(&self, axis: usize) -> TensorResult<Tensor<T>> {
        if axis > self.ndim() {
            return Err(TensorError::InvalidAxis { axis, ndim: self.ndim() });
        }
        let mut dims = self.shape.to_vec();
        dims.insert(axis, 1);
        Tensor::new(self.data.clone(), dims)
    }

    /// Join tensors whose shapes agree everywhere except `axis`.
    pub fn concatenate(parts: &[&Tensor<T>], axis: usize) -> TensorResult<Tensor<T>> {
        let first = parts.first().ok_or(TensorError::EmptyTensor)?;
        let dims = first.shape.dims();
        if axis >= dims.len() {
            return Err(TensorError::InvalidAxis { axis, ndim: dims.len() });
        }
        for p in &parts[1..] {
            let other = p.shape.dims();
            let agrees = other.len() == dims.len()
                && other.iter().zip(dims).enumerate().all(|(i, (a, b))| i == axis || a == b);
            if !agrees {
                return Err(TensorError::ShapeMismatch {
                    expected: dims.to_vec(),
                    got: other.to_vec(),
                });
            }
        }

        let outer: usize = dims[..axis].iter().product();
        let inner: usize = dims[axis + 1..].iter().product();
        let total: usize = parts.iter().map(|p| p.shape.dims()[axis]).sum();
        let mut data = Vec::with_capacity(outer * total * inner);
        for o in 0..outer {
            for p in parts {
                let chunk = p.shape.dims()[axis] * inner;
                data.extend_from_slice(&p.data[o * chunk..(o + 1) * chunk]);
            }
        }
        let mut out_dims = dims.to_vec();
        out_dims[axis] = total;
        Tensor::new(data, out_dims)
    }

    /// Stack equally shaped tensors along a new axis.
    pub fn stack(parts: &[&Tensor<T>], axis: usize) -> TensorResult<Tensor<T>> {
        let expanded = parts
            .iter()
            .map(|p| p.unsqueeze(axis))
            .collect::<TensorResult<Vec<_>>>()?;
        if let Some(bad) = expanded.iter().find(|e| e.shape != expanded[0].shape) {
            return Err(TensorError::ShapeMismatch {
                expected: expanded[0].shape_vec(),
                got: bad.shape_vec(),
            });
        }
        let refs: Vec<&Tensor<T>> = expanded.iter().collect();
        Tensor::concatenate(&refs, axis)
    }

    pub fn apply<F: Fn(T) -> T>(&self, f: F) -> Tensor<T> {
        Tensor {
            data: self.data.iter().map(|&x| f(x)).collect(),
            shape: self.shape.clone(),
        }
    }

    pub fn sqrt(&self) -> Tensor<T> {
        self.apply(T::sqrt)
    }

    pub fn tanh_elem(&self) -> Tensor<T> {
        self.apply(T::tanh)
    }

    pub fn relu(&self) -> Tensor<T> {
        self.apply(|x| x.max(T::ZERO))
    }

    pub fn sigmoid(&self) -> Tensor<T> {
        self.apply(|x| T::ONE / (T::ONE + (-x).exp()))
    }

    pub fn add_scalar(&self, s: T) -> Tensor<T> {
        self.apply(|x| x + s)
    }

    pub fn mul_scalar(&self, s: T) -> Tensor<T> {
        self.apply(|x| x * s)
    }

    /// Elementwise `op` with trailing-axis broadcasting.
    fn zip_with<F: Fn(T, T) -> T>(&self, other: &Tensor<T>, op: F) -> TensorResult<Tensor<T>> {
        if self.shape == other.shape {
            let data = self.data.iter().zip(&other.data).map(|(&a, &b)| op(a, b)).collect();
            return Ok(Tensor { data, shape: self.shape.clone() });
        }

        let shape = self.shape.broadcast_with(&other.shape)?;
        let ndim = shape.ndim();
        // Stride 0 on broadcast axes so the index stays put along them.
        let aligned = |t: &Tensor<T>| -> Vec<usize> {
            let lead = ndim - t.ndim();
            let strides = t.shape.strides();
            (0..ndim)
                .map(|d| match d.checked_sub(lead) {
                    Some(s) if t.shape.dims()[s] > 1 => strides[s],
                    _ => 0,
                })
                .collect()
        };
        let (sa, sb) = (aligned(self), aligned(other));
        let out_strides = shape.strides();

        let data = (0..shape.numel())
            .map(|flat| {
                let (mut ia, mut ib, mut rest) = (0, 0, flat);
                for d in 0..ndim {
                    let coord = rest / out_strides[d];
                    rest %= out_strides[d];
                    ia += coord * sa[d];
                    ib += coord * sb[d];
                }
                op(self.data[ia], other.data[ib])
            })
            .collect();
        Ok(Tensor { data, shape })
    }

    pub fn add(&self, other: &Tensor<T>) -> TensorResult<Tensor<T>> {
        self.zip_with(other, |a, b| a + b)
    }

    pub fn sub(&self, other: &Tensor<T>) -> TensorResult<Tensor<T>> {
        self.zip_with(other, |a, b| a - b)
    }

    pub fn mul(&self, other: &Tensor<T>) -> TensorResult<Tensor<T>> {
        self.zip_with(other, |a, b| a * b)
    }

    pub fn div(&self, other: &Tensor<T>) -> TensorResult<Tensor<T>> {
        self.zip_with(other, |a, b| a / b)
    }

    pub fn sum_all(&self) -> T {
        self.data.iter().copied().sum()
    }

    pub fn mean_all(&self) -> T {
        self.sum_all() / T::from_usize(self.numel())
    }

    /// Sum over `axis`, dropping it. Reducing a 1-d tensor yields shape `[1]`.
    pub fn sum_axis(&self, axis: usize) -> TensorResult<Tensor<T>> {
        let dims = self.shape.dims();
        let size = self.shape.dim(axis)?;
        let outer: usize = dims[..axis].iter().product();
        let inner: usize = dims[axis + 1..].iter().product();

        let mut out = vec![T::ZERO; outer * inner];
        let block = size * inner;
        if block > 0 {
            for (o, chunk) in self.data.chunks(block).enumerate() {
                for (k, &v) in chunk.iter().enumerate() {
                    out[o * inner + k % inner] += v;
                }
            }
        }

        let mut out_dims = dims.to_vec();
        out_dims.remove(axis);
        if out_dims.is_empty() {
            out_dims.push(1);
        }
        Tensor::new(out, out_dims)
    }

    pub fn mean_axis(&self, axis: usize) -> TensorResult<Tensor<T>> {
        let n = T::from_usize(self.shape.dim(axis)?);
        Ok(self.sum_axis(axis)?.apply(|s| s / n))
    }

    /// Population standard deviation over `axis`.
    pub fn std_axis(&self, axis: usize) -> TensorResult<Tensor<T>> {
        let mean = self.mean_axis(axis)?;
        let mut kept = self.shape_vec();
        kept[axis] = 1;
        let mean = mean.reshape(kept)?;
        let centred = self.sub(&mean)?;
        Ok(centred.mul(&centred)?.mean_axis(axis)?.sqrt())
    }

    /// Matrix product of two 2-d tensors.
    pub fn matmul(&self, other: &Tensor<T>) -> TensorResult<Tensor<T>> {
        let (m, k) = require_2d(self, "matmul")?;
        let (k2, n) = require_2d(other, "matmul")?;
        if k != k2 {
            return Err(TensorError::DimensionMismatch(format!(
                "matmul of {} by {}",
                self.shape, other.shape
            )));
        }
        let mut out = vec![T::ZERO; m * n];
        for i in 0..m {
            let out_row = &mut out[i * n..(i + 1) * n];
            for p in 0..k {
                let a = self.data[i * k + p];
                for (o, &b) in out_row.iter_mut().zip(&other.data[p * n..(p + 1) * n]) {
                    *o += a * b;
                }
            }
        }
        Tensor::new(out, vec![m, n])
    }

    /// Softmax over the last axis, shifted by the row maximum.
    pub fn softmax(&self) -> TensorResult<Tensor<T>> {
        let width = match self.shape.dims().last() {
            Some(&w) if w > 0 => w,
            Some(_) => return Ok(self.clone()),
            None => return Ok(Tensor::scalar(T::ONE)),
        };
        let mut data = self.data.clone();
        for row in data.chunks_mut(width) {
            let peak = row.iter().copied().fold(row[0], T::max);
            for v in row.iter_mut() {
                *v = (*v - peak).exp();
            }
            let total: T = row.iter().copied().sum();
            for v in row.iter_mut() {
                *v /= total;
            }
        }
        Ok(Tensor { data, shape: self.shape.clone() })
    }

    /// Frobenius norm.
    pub fn norm(&self) -> T {
        self.data.iter().map(|&v| v * v).sum::<T>().sqrt()
    }
}

impl<T: Float> fmt::Display for Tensor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const SHOWN: usize = 8;
        let width = match self.shape.dims() {
            [] => return write!(f, "tensor({})", self.data[0]),
            [n] => *n,
            [_, c] => *c,
            _ => return write!(f, "tensor(shape={})", self.shape),
        };
        write!(f, "tensor([")?;
        for (r, row) in self.data.chunks(width.max(1)).take(SHOWN).enumerate() {
            if self.ndim() == 2 {
                write!(f, "{}[", if r == 0 { "" } else { ", " })?;
            }
            let cells: Vec<String> = row.iter().take(SHOWN).map(|v| format!("{v:.4}")).collect();
            write!(f, "{}{}", cells.join(", "), if row.len() > SHOWN { ", ..." } else { "" })?;
            if self.ndim() == 2 {
                write!(f, "]")?;
            }
        }
        write!(f, "], shape={})", self.shape)
    }
}
