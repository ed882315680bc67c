use std::collections::HashMap;
use nnstack_core::{Tensor, TensorResult};
use crate::graph::{with_graph, NodeId, Op};
use crate::variable::Variable;

/// Gradients keyed by the node they belong to.
pub type Gradients = HashMap<NodeId, Tensor<f64>>;

/// Reverse-mode pass from `loss` over this thread's tape.
///
/// Every reachable node gets an entry except leaves created with
/// [`Variable::input`], which are treated as constants.
pub fn backward(loss: &Variable) -> TensorResult<Gradients> {
    with_graph(|graph| {
        let mut grads: Gradients = HashMap::new();

        // Seed: gradient of loss w.r.t. itself is 1
        let loss_shape = graph.get(loss.node_id).shape.clone();
        let seed = if loss_shape.is_empty() || (loss_shape.len() == 1 && loss_shape[0] == 1) {
            Tensor::scalar(1.0)
        } else {
            Tensor::ones(loss_shape)
        };
        grads.insert(loss.node_id, seed);

        // Nodes are appended in forward order, so reverse index order is topological.
        for idx in (0..=loss.node_id.0).rev() {
            let node_id = NodeId(idx);
            let grad = match grads.get(&node_id) {
                Some(g) => g.clone(),
                None => continue,
            };

            let node = graph.get(node_id);
            match node.op {
                Op::Leaf => {
                    if !node.requires_grad {
                        grads.remove(&node_id);
                    }
                }
                Op::Add(a, b) => {
                    accumulate_grad(&mut grads, a, &grad, &graph.get(a).shape)?;
                    accumulate_grad(&mut grads, b, &grad, &graph.get(b).shape)?;
                }
                Op::Sub(a, b) => {
                    accumulate_grad(&mut grads, a, &grad, &graph.get(a).shape)?;
                    let neg_grad = grad.mul_scalar(-1.0);
                    accumulate_grad(&mut grads, b, &neg_grad, &graph.get(b).shape)?;
                }
                Op::Mul(a, b) => {
                    let ga = grad.mul(&graph.get(b).value)?;
                    accumulate_grad(&mut grads, a, &ga, &graph.get(a).shape)?;
                    let gb = grad.mul(&graph.get(a).value)?;
                    accumulate_grad(&mut grads, b, &gb, &graph.get(b).shape)?;
                }
                Op::MatMul(a, b) => {
                    // d/dA (A @ B) = grad @ Bᵀ
                    let ga = grad.matmul(&graph.get(b).value.t()?)?;
                    accumulate_grad(&mut grads, a, &ga, &graph.get(a).shape)?;
                    // d/dB (A @ B) = Aᵀ @ grad
                    let gb = graph.get(a).value.t()?.matmul(&grad)?;
                    accumulate_grad(&mut grads, b, &gb, &graph.get(b).shape)?;
                }
                Op::Relu(a) => {
                    let mask = graph.get(a).value.apply(|x| if x > 0.0 { 1.0 } else { 0.0 });
                    let ga = mask.mul(&grad)?;
                    accumulate_grad(&mut grads, a, &ga, &graph.get(a).shape)?;
                }
                Op::Sigmoid(a) => {
                    // σ(a) * (1 - σ(a)) * grad
                    let sig = &node.value;
                    let ga = sig.mul(&sig.apply(|x| 1.0 - x))?.mul(&grad)?;
                    accumulate_grad(&mut grads, a, &ga, &graph.get(a).shape)?;
                }
                Op::Tanh(a) => {
                    // (1 - tanh²(a)) * grad
                    let ga = node.value.apply(|x| 1.0 - x * x).mul(&grad)?;
                    accumulate_grad(&mut grads, a, &ga, &graph.get(a).shape)?;
                }
                Op::SoftmaxRows(a) => {
                    // s * (grad - Σ_j grad_j s_j), row by row
                    let s = &node.value;
                    let gs = grad.mul(s)?;
                    let row_dot = gs.sum_axis(1)?.unsqueeze(1)?;
                    let ga = s.mul(&grad.sub(&row_dot)?)?;
                    accumulate_grad(&mut grads, a, &ga, &graph.get(a).shape)?;
                }
                Op::SumRows(a) => {
                    let ga = Tensor::ones(graph.get(a).shape.clone()).mul(&grad)?;
                    accumulate_grad(&mut grads, a, &ga, &graph.get(a).shape)?;
                }
                Op::MeanAll(a) => {
                    let scale = grad.sum_all() / graph.get(a).value.numel() as f64;
                    let ga = Tensor::full(graph.get(a).shape.clone(), scale);
                    accumulate_grad(&mut grads, a, &ga, &graph.get(a).shape)?;
                }
                Op::MulScalar(a, s) => {
                    let ga = grad.mul_scalar(s);
                    accumulate_grad(&mut grads, a, &ga, &graph.get(a).shape)?;
                }
            }
        }

        Ok(grads)
    })
}

/// Accumulate gradient into the map, handling broadcasting reduction.
fn accumulate_grad(
    grads: &mut Gradients,
    node_id: NodeId,
    incoming_grad: &Tensor<f64>,
    target_shape: &[usize],
) -> TensorResult<()> {
    let grad = reduce_broadcast(incoming_grad, target_shape)?;
    match grads.get_mut(&node_id) {
        Some(existing) => *existing = existing.add(&grad)?,
        None => {
            grads.insert(node_id, grad);
        }
    }
    Ok(())
}

/// Reduce a gradient tensor to match the target shape (undo broadcasting).
fn reduce_broadcast(grad: &Tensor<f64>, target_shape: &[usize]) -> TensorResult<Tensor<f64>> {
    let grad_shape = grad.shape_vec();
    if grad_shape == target_shape {
        return Ok(grad.clone());
    }

    if target_shape.is_empty() || (target_shape.len() == 1 && target_shape[0] == 1) {
        return Ok(Tensor::scalar(grad.sum_all()).reshape(target_shape.to_vec())?);
    }

    let mut result = grad.clone();

    // Sum over leading dimensions that were broadcast
    let extra = grad_shape.len().saturating_sub(target_shape.len());
    for _ in 0..extra {
        result = result.sum_axis(0)?;
    }

    // Sum over dimensions that are 1 in target but > 1 in grad
    let result_shape = result.shape_vec();
    for (i, (&gs, &ts)) in result_shape.iter().zip(target_shape.iter()).enumerate() {
        if ts == 1 && gs > 1 {
            result = result.sum_axis(i)?.unsqueeze(i)?;
        }
    }

    if result.shape_vec() != target_shape {
        result = result.reshape(target_shape.to_vec())?;
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::reset_graph;

    #[test]
    fn test_simple_gradient() {
        reset_graph();

        // f(x) = x², df/dx = 2x
        let x = Variable::param(Tensor::scalar(3.0));
        let y = x.mul(&x).unwrap();
        let grads = backward(&y).unwrap();

        let dx = grads.get(&x.node_id).unwrap();
        assert!((dx.item().unwrap() - 6.0).abs() < 1e-10);
    }

    #[test]
    fn test_mse_style_chain() {
        reset_graph();

        // loss = mean((p - t)²), dloss/dp = 2(p - t)/n
        let p = Variable::param(Tensor::from_slice(&[1.0, 3.0]));
        let t = Variable::input(Tensor::from_slice(&[0.0, 0.0]));
        let diff = p.sub(&t).unwrap();
        let loss = diff.mul(&diff).unwrap().mean();
        let grads = backward(&loss).unwrap();

        assert_eq!(grads.get(&p.node_id).unwrap().data(), &[1.0, 3.0]);
        assert!(grads.get(&t.node_id).is_none());
    }

    #[test]
    fn test_matmul_bias_broadcast_gradient() {
        reset_graph();

        let x = Variable::input(Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]).unwrap());
        let w = Variable::param(Tensor::new(vec![0.5, -0.5], vec![2, 1]).unwrap());
        let b = Variable::param(Tensor::zeros(vec![1, 1]));
        let loss = x.matmul(&w).unwrap().add(&b).unwrap().mean();
        let grads = backward(&loss).unwrap();

        // dL/dw = Xᵀ 1 / n = [(1+3)/2, (2+4)/2]
        assert_eq!(grads.get(&w.node_id).unwrap().data(), &[2.0, 3.0]);
        assert_eq!(grads.get(&b.node_id).unwrap().shape_vec(), vec![1, 1]);
        assert!((grads.get(&b.node_id).unwrap().data()[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_relu_gradient() {
        reset_graph();

        let x = Variable::param(Tensor::new(vec![-1.0, 2.0, -3.0, 4.0], vec![2, 2]).unwrap());
        let loss = x.relu().mean().mul_scalar(4.0);
        let grads = backward(&loss).unwrap();

        assert_eq!(grads.get(&x.node_id).unwrap().data(), &[0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_sigmoid_gradient() {
        reset_graph();

        let x = Variable::param(Tensor::scalar(0.0));
        let grads = backward(&x.sigmoid()).unwrap();

        // σ'(0) = 0.25
        let dx = grads.get(&x.node_id).unwrap();
        assert!((dx.item().unwrap() - 0.25).abs() < 1e-10);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        reset_graph();

        let x = Variable::input(Tensor::new(vec![1.0, 2.0, 3.0, -4.0, 0.0, 4.0], vec![2, 3]).unwrap());
        let s = x.softmax_rows().unwrap();
        let sums = s.sum_rows().unwrap();
        assert_eq!(sums.shape_vec(), vec![2, 1]);
        for v in sums.data.data() {
            assert!((v - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_softmax_weighted_sum_gradient_matches_finite_difference() {
        // f(θ) = mean(Σ_j softmax(θ)_j * p_j)
        let theta = vec![0.3, -0.2, 0.1, 0.5, 0.0, -0.7];
        let preds = vec![1.0, 2.0, 4.0, -1.0, 0.5, 3.0];

        let eval = |th: &[f64]| -> f64 {
            reset_graph();
            let t = Variable::param(Tensor::new(th.to_vec(), vec![2, 3]).unwrap());
            let p = Variable::input(Tensor::new(preds.clone(), vec![2, 3]).unwrap());
            let out = t.softmax_rows().unwrap().mul(&p).unwrap().sum_rows().unwrap().mean();
            out.data.item().unwrap()
        };

        reset_graph();
        let t = Variable::param(Tensor::new(theta.clone(), vec![2, 3]).unwrap());
        let p = Variable::input(Tensor::new(preds.clone(), vec![2, 3]).unwrap());
        let out = t.softmax_rows().unwrap().mul(&p).unwrap().sum_rows().unwrap().mean();
        let grads = backward(&out).unwrap();
        let analytic = grads.get(&t.node_id).unwrap().data().to_vec();

        let h = 1e-6;
        for i in 0..theta.len() {
            let mut up = theta.clone();
            up[i] += h;
            let mut down = theta.clone();
            down[i] -= h;
            let numeric = (eval(&up) - eval(&down)) / (2.0 * h);
            assert!(
                (numeric - analytic[i]).abs() < 1e-6,
                "component {i}: numeric {numeric} vs analytic {}",
                analytic[i]
            );
        }
    }
}
