//! Planning and execution support for parallel loop ("ParFor") regions.
//!
//! - [`optimizer`]: rule-based rewriter turning an abstract parallel-loop plan into a concrete
//!   one (execution location, parallelism, task partitioning, result merge, memory budgets).
//! - [`task`]: task partitioners that cut an iteration range into work units, plus the bounded
//!   queue and local worker pool that consume them.
//! - [`buffer`]: byte-budgeted write buffer for serialized matrix blocks backed by local storage.

pub mod buffer;
pub mod config;
mod env;
pub mod error;
pub mod infra;
pub mod optimizer;
pub mod plan;
pub mod task;

pub use buffer::{EvictionPolicy, MatrixBlock, WriteBufferPool};
pub use config::{BufferPoolConfig, OptimizerConfig, ParforConfig, TaskConfig};
pub use error::{ParforError, Result};
pub use infra::{Infrastructure, InfrastructureProbe, StaticInfrastructure};
pub use optimizer::{OptimizeServices, OptimizeSummary, RuleBasedOptimizer};
pub use plan::{ExecType, NodeId, NodeType, OptTree, ParForPlan};
pub use task::{LocalTaskQueue, Task, TaskPartitioner, TaskPartitionerKind, TaskType};

pub(crate) fn to_mb(bytes: f64) -> String {
    format!("{:.0}MB", bytes / (1024.0 * 1024.0))
}
