use std::collections::HashMap;

use crate::error::{ParforError, Result};
use crate::optimizer::{ParForRewrite, RewriteContext};
use crate::plan::{
    DataPartitioner, ExecType, MatrixMeta, NodeId, NodeType, ParForPlan, ParamType,
    PartitionFormat, RIGHT_INDEXING_OP,
};

/// Rewrite 1: partitions read-only matrices that the loop indexes slice by slice, so the
/// indexing runs in memory on one slice instead of as a distributed job.
#[derive(Default)]
pub struct SetDataPartitioner;

impl SetDataPartitioner {
    const NAME: &'static str = "set data partitioner";
}

impl ParForRewrite for SetDataPartitioner {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, plan: &mut ParForPlan, cx: &mut RewriteContext<'_>) -> Result<()> {
        let root = cx.root;
        let candidates: HashMap<String, PartitionFormat> = plan
            .parfor_params(root)?
            .partition_candidates
            .iter()
            .filter(|(_, format)| *format != PartitionFormat::None)
            .cloned()
            .collect();

        let applied = !candidates.is_empty() && apply_candidates(plan, cx, root, &candidates)?;
        let partitioner = if applied {
            DataPartitioner::RemoteMr
        } else {
            DataPartitioner::None
        };
        plan.set_data_partitioner(root, partitioner)?;

        log::debug!(
            "rule-based optimizer: rewrite '{}' - result={}",
            Self::NAME,
            partitioner
        );
        Ok(())
    }
}

fn apply_candidates(
    plan: &mut ParForPlan,
    cx: &RewriteContext<'_>,
    root: NodeId,
    candidates: &HashMap<String, PartitionFormat>,
) -> Result<bool> {
    let mut applied = false;
    for id in plan.tree().descendants(root) {
        let node = plan.tree().node(id);
        let qualifies = node.is_leaf()
            && node.node_type() == NodeType::Hop
            && node.param(ParamType::OpString) == Some(RIGHT_INDEXING_OP)
            && (node.exec_type() == ExecType::Remote
                || node.param(ParamType::DataPartitionFormat).is_some());
        if !qualifies {
            continue;
        }

        let hop = plan.program().hop(plan.hop_of(id)?)?;
        let matrix = hop.input_name(0).ok_or_else(|| {
            ParforError::ConfigMissing(format!("indexing hop of node {id} has no input matrix"))
        })?;
        let Some(&format) = candidates.get(matrix) else {
            continue;
        };
        let meta = cx.vars.get(matrix).ok_or_else(|| {
            ParforError::ConfigMissing(format!("partition candidate '{matrix}' is not a live matrix"))
        })?;

        let slice = slice_memory(meta, format, cx.config.block_size);
        if slice < cx.lm {
            plan.set_partition_format(id, format, slice)?;
            applied = true;
        }
    }
    Ok(applied)
}

/// Worst-case dense size of one partition of `meta`.
fn slice_memory(meta: &MatrixMeta, format: PartitionFormat, block_size: u64) -> f64 {
    const CELL: f64 = 8.0;
    let (rows, cols, block) = (meta.rows as f64, meta.cols as f64, block_size as f64);
    match format {
        PartitionFormat::ColumnWise => rows * CELL,
        PartitionFormat::RowWise => cols * CELL,
        PartitionFormat::RowBlockWise => block * cols * CELL,
        PartitionFormat::ColumnBlockWise => rows * block * CELL,
        PartitionFormat::None => rows * cols * CELL,
    }
}
