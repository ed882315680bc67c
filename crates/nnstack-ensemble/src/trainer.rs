use nnstack_autodiff::{backward, reset_graph, Variable};
use nnstack_core::{Tensor, TensorResult};
use nnstack_data::{DataLoader, TensorDataset};
use nnstack_nn::mse_loss;
use nnstack_optim::{Adam, Optimizer};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::TrainingConfig;
use crate::device::Device;
use crate::error::{StackingError, StackingResult};
use crate::network::CombinerNetwork;

/// Prepared network inputs, optional base predictions and `[n]` targets for one subset.
#[derive(Debug, Clone, Copy)]
pub struct TrainingData<'a> {
    pub inputs: &'a Tensor<f64>,
    pub predictions: Option<&'a Tensor<f64>>,
    pub targets: &'a Tensor<f64>,
}

impl TrainingData<'_> {
    fn tensors(&self) -> TensorResult<Vec<Tensor<f64>>> {
        let n = self.inputs.nrows()?;
        let mut tensors = vec![self.inputs.clone(), self.targets.reshape(vec![n, 1])?];
        if let Some(p) = self.predictions {
            tensors.push(p.clone());
        }
        Ok(tensors)
    }
}

/// What happened during [`Trainer::train`].
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    pub epochs_run: usize,
    /// Epoch with the lowest validation loss, if validation data was given.
    pub best_epoch: Option<usize>,
    pub best_validation_loss: Option<f64>,
    pub train_losses: Vec<f64>,
    pub validation_losses: Vec<f64>,
    pub stopped_early: bool,
    pub device: Device,
}

/// Minibatch Adam on the combiner network's MSE.
pub struct Trainer<'a> {
    config: &'a TrainingConfig,
    device: Device,
}

impl<'a> Trainer<'a> {
    pub fn new(config: &'a TrainingConfig, device: Device) -> Self {
        Trainer { config, device }
    }

    /// Train `network` in place. With early stopping enabled, `validation` is
    /// required and the best-epoch parameters are restored at the end.
    pub fn train(
        &self,
        network: &mut CombinerNetwork,
        train: TrainingData<'_>,
        validation: Option<TrainingData<'_>>,
    ) -> StackingResult<TrainingReport> {
        let cfg = self.config;
        if cfg.es && validation.is_none() {
            return Err(StackingError::InvalidConfiguration(
                "early stopping needs a validation subset".into(),
            ));
        }

        let dataset = TensorDataset::new(train.tensors()?)?;
        let mut optimizer = Adam::new(&network.model().parameters(), cfg.optim_lr)
            .with_weight_decay(cfg.nn_weight_decay);
        let replicas = worker_pool(self.device.replicas(), "replica")?;
        let loader_pool = worker_pool(cfg.dataloader_workers, "data loader")?;

        if cfg.verbose >= 1 {
            info!(
                rows = dataset.tensors[0].nrows()?,
                parameters = network.model().num_parameters(),
                device = ?self.device,
                max_epochs = cfg.max_epochs,
                "training combiner network"
            );
        }

        let mut report = TrainingReport {
            epochs_run: 0,
            best_epoch: None,
            best_validation_loss: None,
            train_losses: Vec::with_capacity(cfg.max_epochs),
            validation_losses: Vec::new(),
            stopped_early: false,
            device: self.device,
        };
        let mut best_params = None;
        let mut since_best = 0;

        for epoch in 0..cfg.max_epochs {
            let batch_size = cfg.batch_schedule.batch_size(epoch);
            let mut loader =
                DataLoader::new(&dataset, batch_size).shuffled(cfg.seed.wrapping_add(epoch as u64));
            if let Some(pool) = &loader_pool {
                loader = loader.with_pool(pool);
            }

            let mut loss_sum = 0.0;
            let mut rows = 0;
            for batch in loader {
                let batch = batch?;
                let n = batch[0].nrows()?;
                let (loss, grads) = match &replicas {
                    Some(pool) => sharded_gradients(network, &batch, pool, self.device.replicas())?,
                    None => batch_gradients(network, &batch)?,
                };
                if !loss.is_finite() {
                    return Err(StackingError::OptimizationDiverged { epoch, loss });
                }
                optimizer.step(&mut network.model_mut().parameters_mut(), &grads)?;
                loss_sum += loss * n as f64;
                rows += n;
            }
            let train_loss = loss_sum / rows.max(1) as f64;
            report.train_losses.push(train_loss);
            report.epochs_run = epoch + 1;

            let Some(val) = validation else {
                if cfg.verbose >= 2 {
                    debug!(epoch, batch_size, train_loss, "epoch finished");
                }
                continue;
            };

            let val_loss = evaluate(network, val)?;
            if !val_loss.is_finite() {
                return Err(StackingError::OptimizationDiverged {
                    epoch,
                    loss: val_loss,
                });
            }
            report.validation_losses.push(val_loss);
            if cfg.verbose >= 2 {
                debug!(epoch, batch_size, train_loss, val_loss, "epoch finished");
            }

            if report.best_validation_loss.map_or(true, |best| val_loss < best) {
                report.best_validation_loss = Some(val_loss);
                report.best_epoch = Some(epoch);
                since_best = 0;
                if cfg.es {
                    best_params = Some(network.model().snapshot());
                }
            } else {
                since_best += 1;
                if cfg.es && since_best >= cfg.es_patience {
                    report.stopped_early = true;
                    break;
                }
            }
        }

        if let Some(params) = best_params {
            network.model_mut().load(&params)?;
        }

        if cfg.verbose >= 1 {
            info!(
                epochs_run = report.epochs_run,
                best_epoch = ?report.best_epoch,
                best_validation_loss = ?report.best_validation_loss,
                stopped_early = report.stopped_early,
                "combiner network trained"
            );
        }
        Ok(report)
    }
}

/// A pool of `threads` workers, or `None` when one thread is enough.
fn worker_pool(threads: usize, role: &str) -> StackingResult<Option<rayon::ThreadPool>> {
    if threads <= 1 {
        return Ok(None);
    }
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map(Some)
        .map_err(|e| StackingError::InvalidConfiguration(format!("cannot build {role} pool: {e}")))
}

/// MSE of the network on a whole subset.
pub fn evaluate(network: &CombinerNetwork, data: TrainingData<'_>) -> StackingResult<f64> {
    let pred = network.infer(data.inputs, data.predictions)?;
    Ok(nnstack_metrics::mse(data.targets, &pred)?)
}

/// Loss and parameter gradients for one batch `[inputs, targets, predictions?]`
/// on the calling thread's graph.
fn batch_gradients(
    network: &CombinerNetwork,
    batch: &[Tensor<f64>],
) -> TensorResult<(f64, Vec<Tensor<f64>>)> {
    reset_graph();
    let params = network.model().bind();
    let inputs = Variable::input(batch[0].clone());
    let targets = Variable::input(batch[1].clone());
    let predictions = batch.get(2).map(|p| Variable::input(p.clone()));

    let out = network.forward(&inputs, predictions.as_ref(), &params)?;
    let loss = mse_loss(&out, &targets)?;
    let grads = backward(&loss)?;
    let grads = params
        .iter()
        .map(|p| {
            grads
                .get(&p.node_id)
                .cloned()
                .unwrap_or_else(|| Tensor::zeros(p.shape_vec()))
        })
        .collect();
    let value = loss.data.item()?;
    reset_graph();
    Ok((value, grads))
}

/// Split the batch row-wise across the replica pool and average the shard
/// gradients weighted by shard size.
fn sharded_gradients(
    network: &CombinerNetwork,
    batch: &[Tensor<f64>],
    pool: &rayon::ThreadPool,
    replicas: usize,
) -> TensorResult<(f64, Vec<Tensor<f64>>)> {
    let n = batch[0].nrows()?;
    let shard = n.div_ceil(replicas);
    let bounds: Vec<(usize, usize)> = (0..n)
        .step_by(shard.max(1))
        .map(|start| (start, (start + shard).min(n)))
        .collect();
    if bounds.len() < 2 {
        return batch_gradients(network, batch);
    }

    let shards: Vec<TensorResult<(usize, f64, Vec<Tensor<f64>>)>> = pool.install(|| {
        bounds
            .par_iter()
            .map(|&(start, end)| -> TensorResult<(usize, f64, Vec<Tensor<f64>>)> {
                let part = batch
                    .iter()
                    .map(|t| t.slice_rows(start, end))
                    .collect::<TensorResult<Vec<_>>>()?;
                let (loss, grads) = batch_gradients(network, &part)?;
                Ok((end - start, loss, grads))
            })
            .collect()
    });

    let mut loss = 0.0;
    let mut total: Option<Vec<Tensor<f64>>> = None;
    for result in shards {
        let (rows, shard_loss, grads) = result?;
        let share = rows as f64 / n as f64;
        loss += shard_loss * share;
        total = Some(match total {
            None => grads.iter().map(|g| g.mul_scalar(share)).collect(),
            Some(acc) => acc
                .iter()
                .zip(&grads)
                .map(|(a, g)| a.add(&g.mul_scalar(share)))
                .collect::<TensorResult<Vec<_>>>()?,
        });
    }
    Ok((loss, total.unwrap_or_default()))
}
