use crate::error::Result;
use crate::optimizer::{ParForRewrite, RewriteContext};
use crate::plan::{ExecType, ParForPlan};

/// Rewrite 8: shrinks the memory budget used for runtime recompilation of a local loop to
/// one worker's share.
#[derive(Default)]
pub struct SetRecompileMemoryBudget;

impl SetRecompileMemoryBudget {
    const NAME: &'static str = "set recompile memory budget";
}

impl ParForRewrite for SetRecompileMemoryBudget {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, plan: &mut ParForPlan, cx: &mut RewriteContext<'_>) -> Result<()> {
        let root = cx.root;
        let mut budget = cx.lm;
        // recompilation only happens in-process
        if plan.tree().node(root).exec_type() == ExecType::Local {
            budget = cx.lm / plan.tree().total_k(root).max(1) as f64;
            plan.set_recompile_budget(root, budget)?;
        }
        log::debug!(
            "rule-based optimizer: rewrite '{}' - result={}",
            Self::NAME,
            crate::to_mb(budget)
        );
        Ok(())
    }
}
