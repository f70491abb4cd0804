//! Task partitioning: cutting a loop's iteration space into work units and running them.

mod factoring;
mod iteration;
mod partitioner;
mod queue;
mod worker;

pub use factoring::FactoringPartitioner;
pub use iteration::{iteration_count, IterationRange, Task, TaskType};
pub use partitioner::{
    FixedSizePartitioner, IterationSpace, NaivePartitioner, RangeEncoding, StaticPartitioner,
    TaskPartitioner, TaskPartitionerKind, TaskShape, Tasks,
};
pub use queue::LocalTaskQueue;
pub use worker::{execute_local, ExecutionSummary};
