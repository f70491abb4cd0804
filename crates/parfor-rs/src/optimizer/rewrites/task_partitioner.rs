use crate::error::Result;
use crate::optimizer::{ParForRewrite, RewriteContext};
use crate::plan::{NodeId, NodeType, ParForPlan};
use crate::task::TaskPartitionerKind;

/// Rewrite 6: factoring everywhere, except that the outer loop of a nested split hands out
/// one static chunk per node.
#[derive(Default)]
pub struct SetTaskPartitioner;

impl SetTaskPartitioner {
    const NAME: &'static str = "set task partitioner";

    fn apply(plan: &mut ParForPlan, node: NodeId, kind: TaskPartitionerKind) -> Result<()> {
        if plan.tree().node(node).node_type() != NodeType::ParFor {
            log::warn!("task partitioner can only be set for a PARFOR node, got {node}");
        }
        plan.set_task_partitioner(node, kind)?;
        log::debug!(
            "rule-based optimizer: rewrite '{}' - result={} ({})",
            Self::NAME,
            kind,
            node
        );
        Ok(())
    }
}

impl ParForRewrite for SetTaskPartitioner {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, plan: &mut ParForPlan, cx: &mut RewriteContext<'_>) -> Result<()> {
        let root = cx.root;
        if cx.nested {
            Self::apply(plan, root, TaskPartitionerKind::Static)?;
            if let Some(&inner) = plan.tree().children(root).first() {
                Self::apply(plan, inner, TaskPartitionerKind::Factoring)?;
            }
        } else {
            Self::apply(plan, root, TaskPartitionerKind::Factoring)?;
        }
        Ok(())
    }
}
