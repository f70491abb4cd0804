use crate::error::Result;
use crate::optimizer::{ParForRewrite, RewriteContext};
use crate::plan::{ExecType, ParForPlan};

/// Rewrite 4: splits a remote loop into one chunk per cluster node, each chunk running as
/// a local parallel loop inside its remote task.
#[derive(Default)]
pub struct EnableNestedParallelism;

impl EnableNestedParallelism {
    const NAME: &'static str = "enable nested parallelism";
}

impl ParForRewrite for EnableNestedParallelism {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, plan: &mut ParForPlan, cx: &mut RewriteContext<'_>) -> Result<()> {
        let root = cx.root;
        let tree = plan.tree();
        let applicable = cx.config.apply_nested_parallelism
            && tree.node(root).exec_type() == ExecType::Remote
            && cx.rnk > 0
            && cx.n >= cx.rnk as u64
            && !tree.has_nested_parallelism(root)
            && cx.m * cx.lkmax_cp as f64 <= cx.rm;

        if applicable {
            let chunk = cx.n.div_ceil(cx.rnk as u64);
            plan.nest_parfor(root, chunk, &cx.config.nested_iter_var)?;
            cx.nested = true;
        }

        log::debug!(
            "rule-based optimizer: rewrite '{}' - result={}",
            Self::NAME,
            cx.nested
        );
        Ok(())
    }
}
