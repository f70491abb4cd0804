use crate::error::Result;
use crate::optimizer::{ParForRewrite, RewriteContext};
use crate::plan::{ExecType, NodeId, NodeType, ParForPlan};

/// Rewrite 5: assigns `k` to the loop and hands the remaining parallelism budget down to
/// nested parallel loops.
#[derive(Default)]
pub struct SetDegreeOfParallelism;

impl SetDegreeOfParallelism {
    const NAME: &'static str = "set degree of parallelism";
}

impl ParForRewrite for SetDegreeOfParallelism {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, plan: &mut ParForPlan, cx: &mut RewriteContext<'_>) -> Result<()> {
        let root = cx.root;
        let n = usize::try_from(cx.n).unwrap_or(usize::MAX);

        match plan.tree().node(root).exec_type() {
            ExecType::Local => {
                let cap = if plan.tree().is_cp_only(root) {
                    cx.lkmax_cp
                } else {
                    cx.lkmax_mr
                };
                let k_max = cap.min(cx.fitting_workers(cx.lm)).max(1);
                let k = n.min(k_max).max(1);
                plan.set_degree_of_parallelism(root, k)?;
                assign_remaining(plan, root, (k_max - k + 1).div_ceil(k))?;
            }
            ExecType::Remote => {
                let k = if cx.nested {
                    cx.rnk.max(1)
                } else {
                    n.min(cx.rk).max(1)
                };
                plan.set_degree_of_parallelism(root, k)?;
                let per_task = (cx.rkmax / k)
                    .min(cx.fitting_workers(cx.rm))
                    .max(1);
                assign_remaining(plan, root, per_task)?;
            }
        }

        log::debug!(
            "rule-based optimizer: rewrite '{}' - result=k={} (total {})",
            Self::NAME,
            plan.tree().node(root).k(),
            plan.tree().total_k(root)
        );
        Ok(())
    }
}

/// Distributes `par` workers over the PARFOR nodes below `id`; slack of 1 serializes the
/// whole subtree.
fn assign_remaining(plan: &mut ParForPlan, id: NodeId, par: usize) -> Result<()> {
    let children = plan.tree().children(id).to_vec();
    for child in children {
        if par <= 1 {
            plan.set_serial_parfor(child)?;
        } else if plan.tree().node(child).node_type() == NodeType::ParFor {
            let n = plan.tree().num_iterations(child)?;
            let k = usize::try_from(n).unwrap_or(usize::MAX).min(par).max(1);
            plan.set_degree_of_parallelism(child, k)?;
            assign_remaining(plan, child, (par - k + 1).div_ceil(k))?;
        } else {
            assign_remaining(plan, child, par)?;
        }
    }
    Ok(())
}
