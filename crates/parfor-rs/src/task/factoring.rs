//! Factoring scheduler (Hummel, Schonberg, Flynn; SC 1991).
//!
//! Iterations are handed out in batches of `P` equally sized tasks. Each batch covers
//! roughly half of the remaining iterations, so task sizes shrink geometrically and late,
//! small tasks even out the runtime differences of the early, large ones.

use std::iter;

use super::partitioner::{IterationSpace, TaskPartitioner, TaskPartitionerKind, TaskShape};

/// Share of the remaining iterations assigned per batch is `1 / FACTOR`.
const FACTOR: u64 = 2;

#[derive(Debug, Clone)]
pub struct FactoringPartitioner {
    space: IterationSpace,
    workers: usize,
    min_batch: Option<u64>,
}

impl FactoringPartitioner {
    pub fn new(space: IterationSpace, workers: usize) -> Self {
        Self {
            space,
            workers: workers.max(1),
            min_batch: None,
        }
    }

    /// Factoring whose batch size never drops below `min_batch`.
    pub fn constrained(space: IterationSpace, workers: usize, min_batch: u64) -> Self {
        Self {
            min_batch: Some(min_batch),
            ..Self::new(space, workers)
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn min_batch(&self) -> Option<u64> {
        self.min_batch
    }
}

/// Task size of the next batch of `workers` tasks given `remaining` unassigned iterations.
pub(crate) fn next_batch_size(remaining: i64, workers: u64, min_batch: Option<u64>) -> u64 {
    let k = if remaining <= 0 {
        1
    } else {
        (remaining as u64).div_ceil(FACTOR * workers).max(1)
    };
    min_batch.map_or(k, |min| k.max(min))
}

impl TaskPartitioner for FactoringPartitioner {
    fn kind(&self) -> TaskPartitionerKind {
        if self.min_batch.is_some() {
            TaskPartitionerKind::ConstrainedFactoring
        } else {
            TaskPartitionerKind::Factoring
        }
    }

    fn space(&self) -> &IterationSpace {
        &self.space
    }

    fn task_shapes(&self) -> Box<dyn Iterator<Item = TaskShape> + '_> {
        let workers = self.workers as u64;
        let min_batch = self.min_batch;
        let encoding = self.space.encoding();
        let mut remaining = self.space.range().len() as i64;

        let batches = iter::from_fn(move || {
            let k = next_batch_size(remaining, workers, min_batch);
            remaining = remaining.saturating_sub((k * workers) as i64);
            Some(k)
        });
        Box::new(batches.flat_map(move |k| {
            iter::repeat(TaskShape {
                size: k,
                range: encoding.applies(k),
            })
            .take(workers as usize)
        }))
    }
}
