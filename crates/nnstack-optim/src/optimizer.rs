use nnstack_core::{Tensor, TensorError, TensorResult};

/// Trait for optimizers.
///
/// `params` and `grads` are positionally aligned: `grads[i]` is the gradient
/// of the loss with respect to `params[i]`.
pub trait Optimizer {
    /// Perform one optimization step in place.
    fn step(&mut self, params: &mut [&mut Tensor<f64>], grads: &[Tensor<f64>]) -> TensorResult<()>;
}

/// Adam optimizer with optional L2 weight decay.
///
/// grad ← grad + λ·param
/// m = β₁m + (1-β₁)grad,  v = β₂v + (1-β₂)grad²
/// param -= lr · m̂ / (√v̂ + ε)
pub struct Adam {
    pub lr: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    pub weight_decay: f64,
    pub t: usize,
    m: Vec<Tensor<f64>>, // first moment
    v: Vec<Tensor<f64>>, // second moment
}

impl Adam {
    pub fn new(params: &[&Tensor<f64>], lr: f64) -> Self {
        let m = params.iter().map(|p| Tensor::zeros(p.shape_vec())).collect();
        let v = params.iter().map(|p| Tensor::zeros(p.shape_vec())).collect();
        Adam {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            weight_decay: 0.0,
            t: 0,
            m,
            v,
        }
    }

    pub fn with_weight_decay(mut self, wd: f64) -> Self {
        self.weight_decay = wd;
        self
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: &mut [&mut Tensor<f64>], grads: &[Tensor<f64>]) -> TensorResult<()> {
        if params.len() != self.m.len() || grads.len() != self.m.len() {
            return Err(TensorError::InvalidOperation(format!(
                "Adam tracks {} parameters, got {} parameters and {} gradients",
                self.m.len(),
                params.len(),
                grads.len()
            )));
        }

        self.t += 1;
        let bias_correction1 = 1.0 - self.beta1.powi(self.t as i32);
        let bias_correction2 = 1.0 - self.beta2.powi(self.t as i32);

        for (i, (param, grad)) in params.iter_mut().zip(grads).enumerate() {
            let grad = if self.weight_decay > 0.0 {
                grad.add(&param.mul_scalar(self.weight_decay))?
            } else {
                grad.clone()
            };

            self.m[i] = self.m[i]
                .mul_scalar(self.beta1)
                .add(&grad.mul_scalar(1.0 - self.beta1))?;

            let grad_sq = grad.mul(&grad)?;
            self.v[i] = self.v[i]
                .mul_scalar(self.beta2)
                .add(&grad_sq.mul_scalar(1.0 - self.beta2))?;

            let m_hat = self.m[i].mul_scalar(1.0 / bias_correction1);
            let v_hat = self.v[i].mul_scalar(1.0 / bias_correction2);

            let denom = v_hat.sqrt().add_scalar(self.epsilon);
            let update = m_hat.div(&denom)?.mul_scalar(self.lr);
            **param = param.sub(&update)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_adam_first_step_moves_by_lr() {
        // With bias correction, the first update is lr * sign(grad).
        let mut w = Tensor::from_slice(&[1.0, -1.0]);
        let mut adam = Adam::new(&[&w], 0.1);
        let grads = vec![Tensor::from_slice(&[0.5, -2.0])];
        adam.step(&mut [&mut w], &grads).unwrap();
        assert_abs_diff_eq!(w.data()[0], 0.9, epsilon = 1e-6);
        assert_abs_diff_eq!(w.data()[1], -0.9, epsilon = 1e-6);
    }

    #[test]
    fn test_adam_minimizes_quadratic() {
        // f(w) = (w - 3)², grad = 2(w - 3)
        let mut w = Tensor::from_slice(&[0.0]);
        let mut adam = Adam::new(&[&w], 0.1);
        for _ in 0..500 {
            let grad = vec![w.add_scalar(-3.0).mul_scalar(2.0)];
            adam.step(&mut [&mut w], &grad).unwrap();
        }
        assert_abs_diff_eq!(w.data()[0], 3.0, epsilon = 1e-2);
    }

    #[test]
    fn test_weight_decay_shrinks_toward_zero() {
        // Zero data gradient: only the decay term acts.
        let mut plain = Tensor::from_slice(&[2.0]);
        let mut decayed = Tensor::from_slice(&[2.0]);
        let mut a = Adam::new(&[&plain], 0.01);
        let mut b = Adam::new(&[&decayed], 0.01).with_weight_decay(0.1);
        let zero = vec![Tensor::from_slice(&[0.0])];
        for _ in 0..10 {
            a.step(&mut [&mut plain], &zero).unwrap();
            b.step(&mut [&mut decayed], &zero).unwrap();
        }
        assert_eq!(plain.data()[0], 2.0);
        assert!(decayed.data()[0] < 2.0);
    }

    #[test]
    fn test_mismatched_gradient_count_is_rejected() {
        let mut w = Tensor::from_slice(&[1.0]);
        let mut adam = Adam::new(&[&w], 0.1);
        assert!(adam.step(&mut [&mut w], &[]).is_err());
    }
}
