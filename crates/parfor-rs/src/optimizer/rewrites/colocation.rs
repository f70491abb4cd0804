use std::collections::BTreeSet;

use crate::error::{ParforError, Result};
use crate::optimizer::{ParForRewrite, RewriteContext};
use crate::plan::{
    DataPartitioner, ExecType, NodeType, ParForPlan, ParamType, PartitionFormat, RIGHT_INDEXING_OP,
};

/// Rewrite 3: colocates the loop's remote tasks with the partitions of the largest matrix
/// that is sliced directly by the iteration variable.
#[derive(Default)]
pub struct EnableDataColocation;

impl EnableDataColocation {
    const NAME: &'static str = "enable data colocation";
}

impl ParForRewrite for EnableDataColocation {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, plan: &mut ParForPlan, cx: &mut RewriteContext<'_>) -> Result<()> {
        let root = cx.root;
        let params = plan.parfor_params(root)?;
        if params.data_partitioner != DataPartitioner::RemoteMr
            || plan.tree().node(root).exec_type() != ExecType::Remote
        {
            log::debug!("rule-based optimizer: rewrite '{}' - result=false", Self::NAME);
            return Ok(());
        }

        // after a nested split the body is indexed by the inner loop's variable
        let indexing_loop = if cx.nested {
            plan.tree().children(root).first().copied().unwrap_or(root)
        } else {
            root
        };
        let block = plan.program().block(plan.block_of(indexing_loop)?)?;
        let iter_var = block
            .bounds
            .as_ref()
            .map(|bounds| bounds.var.clone())
            .ok_or_else(|| ParforError::ConfigMissing(format!("node {root} has no loop bounds")))?;

        let mut candidates = BTreeSet::new();
        for id in plan.tree().descendants(root) {
            let node = plan.tree().node(id);
            if !node.is_leaf()
                || node.node_type() != NodeType::Hop
                || node.param(ParamType::OpString) != Some(RIGHT_INDEXING_OP)
            {
                continue;
            }
            let Some(format) = node
                .param(ParamType::DataPartitionFormat)
                .and_then(PartitionFormat::parse)
            else {
                continue;
            };
            let index_pos = match format {
                PartitionFormat::RowWise => 1,
                PartitionFormat::ColumnWise => 3,
                _ => continue,
            };
            let hop = plan.program().hop(plan.hop_of(id)?)?;
            let direct = hop
                .inputs
                .get(index_pos)
                .is_some_and(|input| input.is_data && input.name == iter_var);
            if direct {
                if let Some(matrix) = hop.input_name(0) {
                    candidates.insert(matrix.to_string());
                }
            }
        }

        let mut selected: Option<(&str, u64)> = None;
        for name in &candidates {
            let nnz = cx
                .vars
                .get(name)
                .ok_or_else(|| {
                    ParforError::ConfigMissing(format!("colocation candidate '{name}' is not live"))
                })?
                .nnz;
            if selected.map_or(true, |(_, max)| nnz > max) {
                selected = Some((name.as_str(), nnz));
            }
        }

        if let Some((name, _)) = selected {
            let name = name.to_string();
            plan.enable_colocation(root, &name)?;
            log::debug!(
                "rule-based optimizer: rewrite '{}' - result=true ({})",
                Self::NAME,
                name
            );
        } else {
            log::debug!("rule-based optimizer: rewrite '{}' - result=false", Self::NAME);
        }
        Ok(())
    }
}
