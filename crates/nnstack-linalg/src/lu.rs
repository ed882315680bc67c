use nnstack_core::{Float, Tensor, TensorError, TensorResult};

/// Row-pivoted LU factors of a square matrix, packed into one buffer.
///
/// The strict lower triangle holds L (unit diagonal implied) and the upper
/// triangle holds U. Row `i` of the factored matrix is row `perm[i]` of the input.
pub struct LuDecomposition<T: Float> {
    n: usize,
    packed: Vec<T>,
    perm: Vec<usize>,
}

impl<T: Float> LuDecomposition<T> {
    pub fn factor(a: &Tensor<T>) -> TensorResult<Self> {
        let n = match a.shape().dims() {
            &[r, c] if r == c => r,
            _ => {
                return Err(TensorError::InvalidOperation(format!(
                    "LU needs a square matrix, got shape {}",
                    a.shape()
                )))
            }
        };
        let mut m = a.data().to_vec();
        let mut perm: Vec<usize> = (0..n).collect();

        for k in 0..n {
            let pivot_row = (k..n)
                .max_by(|&i, &j| {
                    let (vi, vj) = (m[i * n + k].abs(), m[j * n + k].abs());
                    vi.partial_cmp(&vj).unwrap_or(std::cmp::Ordering::Equal)
                })
                .unwrap_or(k);
            if m[pivot_row * n + k].abs() < T::EPSILON {
                return Err(TensorError::SingularMatrix);
            }
            if pivot_row != k {
                perm.swap(k, pivot_row);
                for j in 0..n {
                    m.swap(k * n + j, pivot_row * n + j);
                }
            }

            let pivot = m[k * n + k];
            for i in k + 1..n {
                let factor = m[i * n + k] / pivot;
                m[i * n + k] = factor;
                for j in k + 1..n {
                    let above = m[k * n + j];
                    m[i * n + j] -= factor * above;
                }
            }
        }

        Ok(LuDecomposition { n, packed: m, perm })
    }

    /// Solve for one right-hand side.
    fn solve_column(&self, b: &[T]) -> Vec<T> {
        let n = self.n;
        let m = &self.packed;
        let mut x: Vec<T> = self.perm.iter().map(|&p| b[p]).collect();
        for i in 0..n {
            for j in 0..i {
                let step = m[i * n + j] * x[j];
                x[i] -= step;
            }
        }
        for i in (0..n).rev() {
            for j in i + 1..n {
                let step = m[i * n + j] * x[j];
                x[i] -= step;
            }
            x[i] /= m[i * n + i];
        }
        x
    }
}

/// Solve `A x = b` for `b` shaped `[n]` or `[n, m]`; the result has `b`'s shape.
pub fn solve<T: Float>(a: &Tensor<T>, b: &Tensor<T>) -> TensorResult<Tensor<T>> {
    let lu = LuDecomposition::factor(a)?;
    let n = lu.n;
    if b.nrows()? != n {
        return Err(TensorError::DimensionMismatch(format!(
            "right-hand side {} against a {n}x{n} system",
            b.shape()
        )));
    }
    match b.ndim() {
        1 => Tensor::new(lu.solve_column(b.data()), vec![n]),
        2 => {
            let cols = b.shape().dims()[1];
            let bt = b.t()?;
            let mut solved = Vec::with_capacity(n * cols);
            for rhs in bt.data().chunks(n.max(1)) {
                solved.extend(lu.solve_column(rhs));
            }
            Tensor::new(solved, vec![cols, n])?.t()
        }
        _ => Err(TensorError::InvalidOperation(format!(
            "right-hand side must be 1-d or 2-d, got shape {}",
            b.shape()
        ))),
    }
}
