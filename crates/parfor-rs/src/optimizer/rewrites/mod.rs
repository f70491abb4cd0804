//! The nine rewrites of the rule-based optimizer, in application order.

mod colocation;
mod data_partitioner;
mod degree_of_parallelism;
mod exec_strategy;
mod nested_parallelism;
mod recompile_budget;
mod remove_parfor;
mod result_merge;
mod task_partitioner;

pub use colocation::EnableDataColocation;
pub use data_partitioner::SetDataPartitioner;
pub use degree_of_parallelism::SetDegreeOfParallelism;
pub use exec_strategy::SetExecutionStrategy;
pub use nested_parallelism::EnableNestedParallelism;
pub use recompile_budget::SetRecompileMemoryBudget;
pub use remove_parfor::RemoveUnnecessaryParFor;
pub use result_merge::SetResultMerge;
pub use task_partitioner::SetTaskPartitioner;
