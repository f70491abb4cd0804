use std::fs;
use std::path::Path;

use anyhow::{ensure, Context};
use serde::{Deserialize, Serialize};

use crate::buffer::EvictionPolicy;

/// Knobs of the rule-based rewriter. The thresholds are empirical and kept configurable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Top-level trip count above which remote execution pays off.
    pub prob_size_threshold: f64,
    /// `Nmax >= max_prob_size_factor * prob_size_threshold` also favors remote execution.
    pub max_prob_size_factor: f64,
    /// Scales local/remote parallelism into the maxima used for CP-only plans.
    pub par_k_factor: f64,
    /// Scales local parallelism for plans that also spawn distributed jobs.
    pub par_k_mr_factor: f64,
    /// Fraction of the raw memory that operators may use.
    pub mem_util_factor: f64,
    pub apply_nested_parallelism: bool,
    /// Cell-format results without nonzeros can be merged by copying.
    pub allow_copy_cell_files: bool,
    /// Block edge length used for block-wise partition estimates.
    pub block_size: u64,
    /// Iteration variable introduced for the outer loop of a nested split.
    pub nested_iter_var: String,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            prob_size_threshold: 100.0,
            max_prob_size_factor: 10.0,
            par_k_factor: 1.0,
            par_k_mr_factor: 2.0,
            mem_util_factor: 0.7,
            apply_nested_parallelism: crate::env::nested_parallelism_override().unwrap_or(false),
            allow_copy_cell_files: true,
            block_size: 1000,
            nested_iter_var: "__pixi".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    pub use_range_tasks: bool,
    /// Range encoding is used only for tasks strictly larger than this.
    pub range_task_min_size: u64,
    /// Bound of the local task queue; `None` never blocks the producer.
    pub queue_capacity: Option<usize>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            use_range_tasks: crate::env::range_tasks_override().unwrap_or(true),
            range_task_min_size: 3,
            queue_capacity: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferPoolConfig {
    /// Share of the local max memory reserved for the write buffer.
    pub buffer_fraction: f64,
    pub policy: EvictionPolicy,
    pub page_cache: bool,
    /// Largest single entry the buffer accepts; bigger blocks go straight to storage.
    pub max_entry_bytes: u64,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            buffer_fraction: 0.15,
            policy: crate::env::buffer_policy_override().unwrap_or(EvictionPolicy::Fifo),
            page_cache: true,
            max_entry_bytes: i32::MAX as u64,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParforConfig {
    pub optimizer: OptimizerConfig,
    pub tasks: TaskConfig,
    pub buffer_pool: BufferPoolConfig,
}

impl ParforConfig {
    pub fn from_json_str(src: &str) -> anyhow::Result<Self> {
        let cfg: ParforConfig = serde_json::from_str(src).context("invalid parfor config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_json(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_json_str(&contents).with_context(|| format!("in {}", path.display()))
    }

    fn validate(&self) -> anyhow::Result<()> {
        let fraction = self.buffer_pool.buffer_fraction;
        ensure!(
            (0.0..=1.0).contains(&fraction),
            "buffer_pool.buffer_fraction must be in [0.0, 1.0], got {}",
            fraction
        );
        ensure!(
            self.optimizer.mem_util_factor > 0.0,
            "optimizer.mem_util_factor must be positive, got {}",
            self.optimizer.mem_util_factor
        );
        ensure!(
            self.optimizer.block_size > 0,
            "optimizer.block_size must be positive"
        );
        ensure!(
            self.tasks.queue_capacity != Some(0),
            "tasks.queue_capacity must be positive when set"
        );
        Ok(())
    }
}
