use std::collections::VecDeque;

use crate::dataset::Dataset;
use nnstack_core::{Tensor, TensorResult};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use rayon::ThreadPool;

/// DataLoader for batching and shuffling datasets.
///
/// With a worker pool attached, a window of upcoming batches (one per pool
/// thread) is gathered in parallel; batches are still yielded in index order,
/// so the sequence is identical for every worker count. The pool is borrowed,
/// so one pool can serve the loaders of every epoch.
pub struct DataLoader<'a, D: Dataset> {
    dataset: &'a D,
    batch_size: usize,
    indices: Vec<usize>,
    current: usize,
    pool: Option<&'a ThreadPool>,
    prefetched: VecDeque<TensorResult<Vec<Tensor<f64>>>>,
}

impl<'a, D: Dataset> DataLoader<'a, D> {
    pub fn new(dataset: &'a D, batch_size: usize) -> Self {
        DataLoader {
            dataset,
            batch_size: batch_size.max(1),
            indices: (0..dataset.len()).collect(),
            current: 0,
            pool: None,
            prefetched: VecDeque::new(),
        }
    }

    /// Shuffle the row order with a seeded RNG.
    pub fn shuffled(mut self, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        self.indices.shuffle(&mut rng);
        self
    }

    /// Gather batches on `pool`. A single-thread pool behaves like no pool.
    pub fn with_pool(mut self, pool: &'a ThreadPool) -> Self {
        self.pool = (pool.current_num_threads() > 1).then_some(pool);
        self
    }

    pub fn num_batches(&self) -> usize {
        self.indices.len().div_ceil(self.batch_size)
    }

    fn batch_bounds(&self, start: usize) -> (usize, usize) {
        (start, (start + self.batch_size).min(self.indices.len()))
    }

    fn fill_window(&mut self, pool: &ThreadPool) {
        let window = pool.current_num_threads();
        let mut bounds = Vec::with_capacity(window);
        while bounds.len() < window && self.current < self.indices.len() {
            let (start, end) = self.batch_bounds(self.current);
            bounds.push((start, end));
            self.current = end;
        }

        let dataset = self.dataset;
        let indices = &self.indices;
        let batches: Vec<TensorResult<Vec<Tensor<f64>>>> = pool.install(|| {
            bounds
                .par_iter()
                .map(|&(s, e)| dataset.gather(&indices[s..e]))
                .collect()
        });
        self.prefetched.extend(batches);
    }
}

impl<'a, D: Dataset> Iterator for DataLoader<'a, D> {
    type Item = TensorResult<Vec<Tensor<f64>>>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(batch) = self.prefetched.pop_front() {
            return Some(batch);
        }
        if self.current >= self.indices.len() {
            return None;
        }

        match self.pool {
            Some(pool) => {
                self.fill_window(pool);
                self.prefetched.pop_front()
            }
            None => {
                let (start, end) = self.batch_bounds(self.current);
                self.current = end;
                Some(self.dataset.gather(&self.indices[start..end]))
            }
        }
    }
}
