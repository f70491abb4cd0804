//! Rule-based ParFor optimizer.
//!
//! A single deterministic pass over the plan of one parallel loop: the rewrites run in a
//! fixed order, each reading the problem properties gathered in a [`RewriteContext`] and
//! applying its decision to the plan tree and the live program through [`ParForPlan`].
//! The pass is not transactional; a failing rewrite leaves earlier decisions applied.

mod context;
pub mod rewrites;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::OptimizerConfig;
use crate::error::{ParforError, Result};
use crate::infra::Infrastructure;
use crate::plan::{
    DataPartitioner, ExecType, LocalVariableMap, NodeId, NodeType, ParForPlan, ResultMerge,
};
use crate::task::TaskPartitionerKind;

pub use context::{OptimizeServices, RewriteContext};

use rewrites::{
    EnableDataColocation, EnableNestedParallelism, RemoveUnnecessaryParFor, SetDataPartitioner,
    SetDegreeOfParallelism, SetExecutionStrategy, SetRecompileMemoryBudget, SetResultMerge,
    SetTaskPartitioner,
};

/// One rewrite of the optimizer pass.
pub trait ParForRewrite: Send + Sync {
    fn name(&self) -> &'static str;
    fn run(&self, plan: &mut ParForPlan, cx: &mut RewriteContext<'_>) -> Result<()>;
}

enum Step {
    Rewrite(Arc<dyn ParForRewrite>),
    /// Refreshes the memory estimate after a rewrite changed operator placement.
    Reestimate,
}

/// Final decisions for one PARFOR node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParForDecision {
    pub node: NodeId,
    pub exec_type: ExecType,
    pub k: usize,
    pub task_partitioner: TaskPartitionerKind,
    pub result_merge: ResultMerge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizeSummary {
    pub num_iterations: u64,
    pub max_problem_size: u64,
    /// Memory estimate under serial execution before any rewrite.
    pub initial_memory: f64,
    /// Memory estimate after data partitioning.
    pub memory_estimate: f64,
    pub exec_type: ExecType,
    pub data_partitioner: DataPartitioner,
    pub colocated_matrix: Option<String>,
    pub nested: bool,
    pub decisions: Vec<ParForDecision>,
    pub removed_parfors: usize,
    pub evaluated_plans: usize,
}

pub struct RuleBasedOptimizer {
    config: OptimizerConfig,
    steps: Vec<Step>,
}

impl RuleBasedOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        let steps = vec![
            Step::Rewrite(Arc::new(SetDataPartitioner)),
            Step::Reestimate,
            Step::Rewrite(Arc::new(SetExecutionStrategy)),
            Step::Rewrite(Arc::new(EnableDataColocation)),
            Step::Rewrite(Arc::new(EnableNestedParallelism)),
            Step::Rewrite(Arc::new(SetDegreeOfParallelism)),
            Step::Rewrite(Arc::new(SetTaskPartitioner)),
            Step::Rewrite(Arc::new(SetResultMerge)),
            Step::Rewrite(Arc::new(SetRecompileMemoryBudget)),
            Step::Rewrite(Arc::new(RemoveUnnecessaryParFor)),
        ];
        Self { config, steps }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Names of the rewrites in application order.
    pub fn rewrite_names(&self) -> Vec<&'static str> {
        self.steps
            .iter()
            .filter_map(|step| match step {
                Step::Rewrite(rewrite) => Some(rewrite.name()),
                Step::Reestimate => None,
            })
            .collect()
    }

    /// Optimizes the loop rooted at the plan's root node in place.
    pub fn optimize(
        &self,
        plan: &mut ParForPlan,
        vars: &LocalVariableMap,
        services: OptimizeServices<'_>,
    ) -> Result<OptimizeSummary> {
        let root = plan.tree().root();
        if plan.tree().node(root).node_type() != NodeType::ParFor {
            return Err(ParforError::ConfigMissing(format!(
                "plan root {root} is not a PARFOR node"
            )));
        }

        log::debug!("rule-based optimizer: analyze infrastructure properties");
        let infra = Infrastructure::resolve(services.infrastructure)?;
        let mut cx = RewriteContext::new(&self.config, vars, services.estimator, &infra, plan)?;
        log::debug!(
            "rule-based optimizer: optimize with local_max_mem={} and remote_max_mem={}",
            crate::to_mb(cx.lm),
            crate::to_mb(cx.rm)
        );

        plan.set_serial_parfor(root)?;
        cx.m = cx.estimate_memory(plan)?;
        let initial_memory = cx.m;
        log::debug!(
            "rule-based optimizer: estimated mem (serial exec) M={}",
            crate::to_mb(cx.m)
        );

        for step in &self.steps {
            match step {
                Step::Rewrite(rewrite) => {
                    log::trace!("rule-based optimizer: running rewrite '{}'", rewrite.name());
                    rewrite.run(plan, &mut cx)?;
                }
                Step::Reestimate => {
                    cx.m = cx.estimate_memory(plan)?;
                    log::debug!(
                        "rule-based optimizer: re-estimated mem M={}",
                        crate::to_mb(cx.m)
                    );
                }
            }
        }

        let summary = summarize(plan, &cx, initial_memory)?;
        if log::log_enabled!(log::Level::Trace) {
            log::trace!("rule-based optimizer: final plan\n{}", plan.tree().explain());
        }
        Ok(summary)
    }
}

fn summarize(
    plan: &ParForPlan,
    cx: &RewriteContext<'_>,
    initial_memory: f64,
) -> Result<OptimizeSummary> {
    let tree = plan.tree();
    let root = tree.root();
    let root_params = plan.parfor_params(root)?;

    let mut decisions = Vec::new();
    for id in tree.descendants(root) {
        let node = tree.node(id);
        if node.node_type() != NodeType::ParFor {
            continue;
        }
        let params = plan.parfor_params(id)?;
        decisions.push(ParForDecision {
            node: id,
            exec_type: node.exec_type(),
            k: node.k(),
            task_partitioner: params.task_partitioner,
            result_merge: params.result_merge,
        });
    }

    Ok(OptimizeSummary {
        num_iterations: cx.n,
        max_problem_size: cx.n_max,
        initial_memory,
        memory_estimate: cx.m,
        exec_type: tree.node(root).exec_type(),
        data_partitioner: root_params.data_partitioner,
        colocated_matrix: root_params.colocated_matrix.clone(),
        nested: cx.nested,
        decisions,
        removed_parfors: cx.removed_parfors,
        evaluated_plans: 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_run_in_fixed_order() {
        let optimizer = RuleBasedOptimizer::new(OptimizerConfig::default());
        assert_eq!(
            optimizer.rewrite_names(),
            vec![
                "set data partitioner",
                "set execution strategy",
                "enable data colocation",
                "enable nested parallelism",
                "set degree of parallelism",
                "set task partitioner",
                "set result merge",
                "set recompile memory budget",
                "remove unnecessary parfor",
            ]
        );
    }
}
