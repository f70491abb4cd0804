use crate::error::Result;
use crate::optimizer::{ParForRewrite, RewriteContext};
use crate::plan::{NodeId, NodeType, ParForPlan};

/// Rewrite 9: nested parallel loops left with `k = 1` become plain sequential loops.
#[derive(Default)]
pub struct RemoveUnnecessaryParFor;

impl RemoveUnnecessaryParFor {
    const NAME: &'static str = "remove unnecessary parfor";
}

impl ParForRewrite for RemoveUnnecessaryParFor {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, plan: &mut ParForPlan, cx: &mut RewriteContext<'_>) -> Result<()> {
        let count = remove_serial(plan, cx.root)?;
        cx.removed_parfors += count;
        log::debug!(
            "rule-based optimizer: rewrite '{}' - result={}",
            Self::NAME,
            count
        );
        Ok(())
    }
}

fn remove_serial(plan: &mut ParForPlan, id: NodeId) -> Result<usize> {
    let mut count = 0;
    for child in plan.tree().children(id).to_vec() {
        let node = plan.tree().node(child);
        if node.node_type() == NodeType::ParFor && node.k() == 1 {
            plan.replace_with_for(child)?;
            count += 1;
        }
        count += remove_serial(plan, child)?;
    }
    Ok(count)
}
