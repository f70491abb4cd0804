//! Plan tree, the live program it mirrors, and the services the rewriter consults.

mod cost;
mod mapping;
mod program;
mod tree;
mod vars;

pub use cost::{CostEstimator, HopMemoryEstimator, TestMeasure};
pub use mapping::ParForPlan;
pub use program::{
    BlockId, BlockKind, Bound, DataPartitioner, ExecMode, Hop, HopId, HopInput, LoopBounds,
    ParForParams, PartitionFormat, Program, ProgramBlock, ResultMerge, LEFT_INDEXING_OP,
    RIGHT_INDEXING_OP,
};
pub use tree::{ExecType, NodeId, NodeType, OptNode, OptTree, ParamType};
pub use vars::{LocalVariableMap, MatrixFormat, MatrixMeta};
