use crate::error::Result;
use crate::optimizer::{ParForRewrite, RewriteContext};
use crate::plan::{ExecType, ParForPlan};

/// Rewrite 2: runs the loop as distributed tasks when local execution cannot exploit the
/// available parallelism, otherwise in-process.
#[derive(Default)]
pub struct SetExecutionStrategy;

impl SetExecutionStrategy {
    const NAME: &'static str = "set execution strategy";
}

impl ParForRewrite for SetExecutionStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, plan: &mut ParForPlan, cx: &mut RewriteContext<'_>) -> Result<()> {
        let root = cx.root;
        let exec_type = if plan.tree().is_cp_only(root) && cx.m <= cx.rm {
            decide(cx)
        } else {
            ExecType::Local
        };
        plan.set_exec_type(root, exec_type)?;

        log::debug!(
            "rule-based optimizer: rewrite '{}' - result={}",
            Self::NAME,
            match exec_type {
                ExecType::Local => "LOCAL",
                ExecType::Remote => "REMOTE_MR",
            }
        );
        Ok(())
    }
}

fn decide(cx: &RewriteContext<'_>) -> ExecType {
    let cfg = cx.config;
    let n = cx.n;
    let (lk, rk) = (cx.lk as u64, cx.rk as u64);
    let cpk = lk.min(cx.fitting_workers(cx.lm) as u64);

    // memory bound: local workers cannot all be used
    if cpk < lk && cpk < n && cpk < rk {
        return ExecType::Remote;
    }
    let large = n as f64 >= cfg.prob_size_threshold
        || cx.n_max as f64 >= cfg.max_prob_size_factor * cfg.prob_size_threshold;
    if lk < n && lk < rk && large {
        ExecType::Remote
    } else {
        ExecType::Local
    }
}
