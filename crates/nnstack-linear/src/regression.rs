use nnstack_core::{Regressor, Tensor, TensorError, TensorResult};
use nnstack_linalg::solve;

/// Check `x` is `[n, p]` and `y` has `n` elements; returns `(n, p)`.
pub(crate) fn check_xy(x: &Tensor<f64>, y: &Tensor<f64>) -> TensorResult<(usize, usize)> {
    if x.ndim() != 2 {
        return Err(TensorError::InvalidOperation(format!(
            "expected a 2D feature matrix, got shape {:?}",
            x.shape_vec()
        )));
    }
    let n = x.nrows()?;
    if y.numel() != n {
        return Err(TensorError::DimensionMismatch(format!(
            "X has {} rows but y has {} elements",
            n,
            y.numel()
        )));
    }
    if n == 0 {
        return Err(TensorError::EmptyTensor);
    }
    Ok((n, x.shape().dim(1)?))
}

/// Fitted coefficients shared by the linear models.
#[derive(Debug, Clone)]
struct Coefficients {
    weights: Tensor<f64>,
    bias: f64,
}

impl Coefficients {
    /// Split a solved `[p (+1), 1]` column into weights and optional leading intercept.
    fn from_column(w: &Tensor<f64>, fit_intercept: bool) -> TensorResult<Self> {
        let data = w.data();
        let (bias, weights) = if fit_intercept {
            (data[0], data[1..].to_vec())
        } else {
            (0.0, data.to_vec())
        };
        let p = weights.len();
        Ok(Coefficients {
            weights: Tensor::new(weights, vec![p])?,
            bias,
        })
    }

    fn predict(&self, x: &Tensor<f64>) -> TensorResult<Tensor<f64>> {
        let n = x.nrows()?;
        let p = self.weights.numel();
        if x.ndim() != 2 || x.shape().dim(1)? != p {
            return Err(TensorError::DimensionMismatch(format!(
                "model fitted on {} features, got shape {:?}",
                p,
                x.shape_vec()
            )));
        }
        let w_col = self.weights.reshape(vec![p, 1])?;
        x.matmul(&w_col)?.add_scalar(self.bias).reshape(vec![n])
    }
}

fn not_fitted() -> TensorError {
    TensorError::InvalidOperation("Model not fitted".into())
}

/// Solve `(XᵀX + αD) w = Xᵀy`, where `D` is the identity with the intercept
/// entry zeroed so the intercept is never penalized.
fn normal_equation(
    x: &Tensor<f64>,
    y: &Tensor<f64>,
    alpha: f64,
    fit_intercept: bool,
) -> TensorResult<Coefficients> {
    let (n, _) = check_xy(x, y)?;

    // Optionally prepend column of ones for intercept
    let x_aug = if fit_intercept {
        let ones_col = Tensor::ones(vec![n, 1]);
        Tensor::concatenate(&[&ones_col, x], 1)?
    } else {
        x.clone()
    };

    let dim = x_aug.shape().dim(1)?;
    let xt = x_aug.t()?;
    let mut xtx = xt.matmul(&x_aug)?;
    if alpha > 0.0 {
        let mut reg = Tensor::<f64>::eye(dim).mul_scalar(alpha);
        if fit_intercept {
            reg.set(&[0, 0], 0.0)?;
        }
        xtx = xtx.add(&reg)?;
    }
    let xty = xt.matmul(&y.reshape(vec![n, 1])?)?;
    let w = solve(&xtx, &xty)?;
    Coefficients::from_column(&w, fit_intercept)
}

/// Ordinary Least Squares linear regression.
///
/// Fits `y = Xw + b` using the normal equation `XᵀX w = Xᵀy`.
#[derive(Debug, Clone)]
pub struct LinearRegression {
    pub fit_intercept: bool,
    coef: Option<Coefficients>,
}

impl LinearRegression {
    pub fn new(fit_intercept: bool) -> Self {
        LinearRegression {
            fit_intercept,
            coef: None,
        }
    }

    pub fn weights(&self) -> Option<&Tensor<f64>> {
        self.coef.as_ref().map(|c| &c.weights)
    }

    pub fn bias(&self) -> Option<f64> {
        self.coef.as_ref().map(|c| c.bias)
    }
}

impl Regressor for LinearRegression {
    fn fit(&mut self, x: &Tensor<f64>, y: &Tensor<f64>) -> TensorResult<()> {
        self.coef = Some(normal_equation(x, y, 0.0, self.fit_intercept)?);
        Ok(())
    }

    fn predict(&self, x: &Tensor<f64>) -> TensorResult<Tensor<f64>> {
        self.coef.as_ref().ok_or_else(not_fitted)?.predict(x)
    }

    fn clone_unfitted(&self) -> Box<dyn Regressor> {
        Box::new(LinearRegression::new(self.fit_intercept))
    }

    fn name(&self) -> String {
        "LinearRegression".into()
    }
}

/// Ridge regression (L2-regularized): `w = (XᵀX + αI)⁻¹Xᵀy`.
#[derive(Debug, Clone)]
pub struct Ridge {
    pub alpha: f64,
    pub fit_intercept: bool,
    coef: Option<Coefficients>,
}

impl Ridge {
    pub fn new(alpha: f64, fit_intercept: bool) -> Self {
        Ridge {
            alpha,
            fit_intercept,
            coef: None,
        }
    }

    pub fn weights(&self) -> Option<&Tensor<f64>> {
        self.coef.as_ref().map(|c| &c.weights)
    }
}

impl Regressor for Ridge {
    fn fit(&mut self, x: &Tensor<f64>, y: &Tensor<f64>) -> TensorResult<()> {
        if self.alpha < 0.0 {
            return Err(TensorError::InvalidOperation(format!(
                "Ridge alpha must be non-negative, got {}",
                self.alpha
            )));
        }
        self.coef = Some(normal_equation(x, y, self.alpha, self.fit_intercept)?);
        Ok(())
    }

    fn predict(&self, x: &Tensor<f64>) -> TensorResult<Tensor<f64>> {
        self.coef.as_ref().ok_or_else(not_fitted)?.predict(x)
    }

    fn clone_unfitted(&self) -> Box<dyn Regressor> {
        Box::new(Ridge::new(self.alpha, self.fit_intercept))
    }

    fn name(&self) -> String {
        format!("Ridge(alpha={})", self.alpha)
    }
}

/// Lasso regression (L1-regularized) via coordinate descent.
#[derive(Debug, Clone)]
pub struct Lasso {
    pub alpha: f64,
    pub max_iter: usize,
    pub tol: f64,
    coef: Option<Coefficients>,
}

impl Lasso {
    pub fn new(alpha: f64, max_iter: usize) -> Self {
        Lasso {
            alpha,
            max_iter,
            tol: 1e-6,
            coef: None,
        }
    }

    pub fn weights(&self) -> Option<&Tensor<f64>> {
        self.coef.as_ref().map(|c| &c.weights)
    }
}

impl Regressor for Lasso {
    fn fit(&mut self, x: &Tensor<f64>, y: &Tensor<f64>) -> TensorResult<()> {
        let (n, p) = check_xy(x, y)?;
        let xd = x.data();
        let yd = y.data();
        let n_f = n as f64;

        let col_sq: Vec<f64> = (0..p)
            .map(|j| (0..n).map(|i| xd[i * p + j] * xd[i * p + j]).sum::<f64>() / n_f)
            .collect();

        let mut w = vec![0.0; p];
        let mut b = 0.0;
        // residual[i] = y[i] - (b + x_i · w)
        let mut residual: Vec<f64> = yd.to_vec();

        for _iter in 0..self.max_iter {
            let mut max_change: f64 = 0.0;

            // Update intercept
            let shift = residual.iter().sum::<f64>() / n_f;
            b += shift;
            residual.iter_mut().for_each(|r| *r -= shift);

            // Coordinate descent for each feature
            for j in 0..p {
                if col_sq[j] < f64::EPSILON {
                    continue;
                }
                let rho = (0..n)
                    .map(|i| xd[i * p + j] * (residual[i] + xd[i * p + j] * w[j]))
                    .sum::<f64>()
                    / n_f;

                // Soft thresholding
                let new_w = if rho > self.alpha {
                    (rho - self.alpha) / col_sq[j]
                } else if rho < -self.alpha {
                    (rho + self.alpha) / col_sq[j]
                } else {
                    0.0
                };

                let delta = new_w - w[j];
                if delta != 0.0 {
                    for i in 0..n {
                        residual[i] -= xd[i * p + j] * delta;
                    }
                }
                max_change = max_change.max(delta.abs());
                w[j] = new_w;
            }

            if max_change < self.tol {
                break;
            }
        }

        self.coef = Some(Coefficients {
            weights: Tensor::new(w, vec![p])?,
            bias: b,
        });
        Ok(())
    }

    fn predict(&self, x: &Tensor<f64>) -> TensorResult<Tensor<f64>> {
        self.coef.as_ref().ok_or_else(not_fitted)?.predict(x)
    }

    fn clone_unfitted(&self) -> Box<dyn Regressor> {
        let mut fresh = Lasso::new(self.alpha, self.max_iter);
        fresh.tol = self.tol;
        Box::new(fresh)
    }

    fn name(&self) -> String {
        format!("Lasso(alpha={})", self.alpha)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn plane() -> (Tensor<f64>, Tensor<f64>) {
        // y = 2*x1 + 3*x2 + 1
        let x: Tensor<f64> = Tensor::from_vec2d(&[
            vec![1.0, 2.0],
            vec![2.0, 1.0],
            vec![3.0, 4.0],
            vec![4.0, 3.0],
            vec![5.0, 5.0],
        ]).unwrap();
        let y: Tensor<f64> = Tensor::from_slice(&[9.0, 8.0, 19.0, 18.0, 26.0]);
        (x, y)
    }

    #[test]
    fn test_linear_regression() {
        let (x, y) = plane();
        let mut model = LinearRegression::new(true);
        model.fit(&x, &y).unwrap();

        let pred = model.predict(&x).unwrap();
        for i in 0..5 {
            assert_abs_diff_eq!(pred.data()[i], y.data()[i], epsilon = 1e-6);
        }
        assert_abs_diff_eq!(model.bias().unwrap(), 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(model.weights().unwrap().data()[1], 3.0, epsilon = 1e-6);
    }

    #[test]
    fn test_predict_before_fit() {
        let model = LinearRegression::new(true);
        assert!(model.predict(&Tensor::zeros(vec![2, 2])).is_err());
    }

    #[test]
    fn test_collinear_features_are_singular() {
        let x: Tensor<f64> = Tensor::from_vec2d(&[
            vec![1.0, 2.0],
            vec![2.0, 4.0],
            vec![3.0, 6.0],
        ]).unwrap();
        let y: Tensor<f64> = Tensor::from_slice(&[1.0, 2.0, 3.0]);
        assert!(matches!(
            LinearRegression::new(false).fit(&x, &y),
            Err(TensorError::SingularMatrix)
        ));
    }

    #[test]
    fn test_ridge() {
        let x: Tensor<f64> = Tensor::from_vec2d(&[
            vec![1.0, 1.0],
            vec![2.0, 2.0],
            vec![3.0, 3.0],
            vec![4.0, 4.0],
        ]).unwrap();
        let y: Tensor<f64> = Tensor::from_slice(&[6.0, 11.0, 16.0, 21.0]);

        // Collinear columns are fine once regularized
        let mut model = Ridge::new(0.01, true);
        model.fit(&x, &y).unwrap();
        let pred = model.predict(&x).unwrap();
        for i in 0..4 {
            assert!((pred.data()[i] - y.data()[i]).abs() < 0.5);
        }
    }

    #[test]
    fn test_ridge_shrinks_weights() {
        let (x, y) = plane();
        let mut weak = Ridge::new(0.0, true);
        let mut strong = Ridge::new(100.0, true);
        weak.fit(&x, &y).unwrap();
        strong.fit(&x, &y).unwrap();
        assert!(strong.weights().unwrap().norm() < weak.weights().unwrap().norm());
    }

    #[test]
    fn test_lasso() {
        let x: Tensor<f64> = Tensor::from_vec2d(&[
            vec![1.0, 0.0],
            vec![2.0, 0.0],
            vec![3.0, 0.0],
        ]).unwrap();
        let y: Tensor<f64> = Tensor::from_slice(&[2.0, 4.0, 6.0]); // y = 2*x1

        let mut model = Lasso::new(0.001, 1000);
        model.fit(&x, &y).unwrap();

        let w = model.weights().unwrap();
        assert!(w.data()[1].abs() < 0.1);
        assert_abs_diff_eq!(w.data()[0], 2.0, epsilon = 0.05);
    }

    #[test]
    fn test_clone_unfitted_is_fresh() {
        let (x, y) = plane();
        let mut model = Ridge::new(0.5, true);
        model.fit(&x, &y).unwrap();
        let copy = model.clone_unfitted();
        assert!(copy.predict(&x).is_err());
        assert_eq!(copy.name(), "Ridge(alpha=0.5)");
    }
}
