use crate::error::Result;
use crate::optimizer::{ParForRewrite, RewriteContext};
use crate::plan::{
    ExecType, LocalVariableMap, MatrixFormat, NodeId, NodeType, ParForPlan, ParamType, ResultMerge,
    LEFT_INDEXING_OP,
};

/// Rewrite 7: merges results with a distributed job when distributed left-indexing writes
/// into a result matrix, unless copying empty cell files suffices.
#[derive(Default)]
pub struct SetResultMerge;

impl SetResultMerge {
    const NAME: &'static str = "set result merge";
}

impl ParForRewrite for SetResultMerge {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, plan: &mut ParForPlan, cx: &mut RewriteContext<'_>) -> Result<()> {
        set_result_merge(plan, cx, cx.root)
    }
}

fn set_result_merge(plan: &mut ParForPlan, cx: &RewriteContext<'_>, id: NodeId) -> Result<()> {
    let result_vars = plan.parfor_params(id)?.result_vars.clone();
    let remote_writes = has_remote_left_indexing(plan, id, &result_vars)?;
    let copy_suffices =
        cx.config.allow_copy_cell_files && all_empty_cell_matrices(&result_vars, cx.vars);

    let merge = if remote_writes && !copy_suffices {
        ResultMerge::RemoteMr
    } else {
        ResultMerge::LocalAutomatic
    };
    plan.set_result_merge(id, merge)?;
    log::debug!(
        "rule-based optimizer: rewrite '{}' - result={} ({})",
        SetResultMerge::NAME,
        merge,
        id
    );

    for child in plan.tree().children(id).to_vec() {
        visit_nested(plan, cx, child)?;
    }
    Ok(())
}

fn visit_nested(plan: &mut ParForPlan, cx: &RewriteContext<'_>, id: NodeId) -> Result<()> {
    if plan.tree().node(id).node_type() == NodeType::ParFor {
        return set_result_merge(plan, cx, id);
    }
    for child in plan.tree().children(id).to_vec() {
        visit_nested(plan, cx, child)?;
    }
    Ok(())
}

fn has_remote_left_indexing(plan: &ParForPlan, id: NodeId, result_vars: &[String]) -> Result<bool> {
    for node_id in plan.tree().descendants(id) {
        let node = plan.tree().node(node_id);
        if !node.is_leaf()
            || node.node_type() != NodeType::Hop
            || node.exec_type() != ExecType::Remote
            || node.param(ParamType::OpString) != Some(LEFT_INDEXING_OP)
        {
            continue;
        }
        let hop = plan.program().hop(plan.hop_of(node_id)?)?;
        if hop
            .input_name(0)
            .is_some_and(|target| result_vars.iter().any(|var| var == target))
        {
            return Ok(true);
        }
    }
    Ok(false)
}

fn all_empty_cell_matrices(result_vars: &[String], vars: &LocalVariableMap) -> bool {
    result_vars.iter().all(|name| {
        vars.get(name)
            .is_some_and(|meta| meta.format != MatrixFormat::BinaryBlock && meta.nnz == 0)
    })
}
