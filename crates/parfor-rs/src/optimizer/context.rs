use crate::config::OptimizerConfig;
use crate::error::Result;
use crate::infra::{Infrastructure, InfrastructureProbe};
use crate::plan::{CostEstimator, LocalVariableMap, NodeId, ParForPlan, TestMeasure};

/// External services consulted during one optimization.
#[derive(Clone, Copy)]
pub struct OptimizeServices<'a> {
    pub infrastructure: &'a dyn InfrastructureProbe,
    pub estimator: &'a dyn CostEstimator,
}

/// Problem and infrastructure properties shared by the rewrites of one pass.
pub struct RewriteContext<'a> {
    pub(crate) config: &'a OptimizerConfig,
    pub(crate) vars: &'a LocalVariableMap,
    estimator: &'a dyn CostEstimator,
    pub(crate) root: NodeId,
    /// Trip count of the loop being optimized.
    pub(crate) n: u64,
    /// Largest trip count including nested loops.
    pub(crate) n_max: u64,
    pub(crate) lk: usize,
    pub(crate) lkmax_cp: usize,
    pub(crate) lkmax_mr: usize,
    pub(crate) rnk: usize,
    pub(crate) rk: usize,
    pub(crate) rkmax: usize,
    pub(crate) lm: f64,
    pub(crate) rm: f64,
    /// Current worst-case memory estimate of the plan under serial execution.
    pub(crate) m: f64,
    pub(crate) nested: bool,
    pub(crate) removed_parfors: usize,
}

impl<'a> RewriteContext<'a> {
    pub(crate) fn new(
        config: &'a OptimizerConfig,
        vars: &'a LocalVariableMap,
        estimator: &'a dyn CostEstimator,
        infra: &Infrastructure,
        plan: &ParForPlan,
    ) -> Result<Self> {
        let tree = plan.tree();
        let root = tree.root();
        let lk = infra.local_parallelism;
        let rk = infra.remote_parallelism;
        // a loop split by an earlier pass is sized by its original trip count
        let split = plan.split_trip_count(root, &config.nested_iter_var)?;
        let n = match split {
            Some(n) => n,
            None => tree.num_iterations(root)?,
        };
        Ok(Self {
            config,
            vars,
            estimator,
            root,
            n,
            n_max: tree.max_problem_size(root).max(n),
            lk,
            lkmax_cp: scale(config.par_k_factor, lk),
            lkmax_mr: scale(config.par_k_mr_factor, lk),
            rnk: infra.remote_nodes,
            rk,
            rkmax: scale(config.par_k_factor, rk),
            lm: config.mem_util_factor * infra.local_max_memory as f64,
            rm: config.mem_util_factor * infra.remote_max_memory as f64,
            m: 0.0,
            nested: split.is_some(),
            removed_parfors: 0,
        })
    }

    pub(crate) fn estimate_memory(&self, plan: &ParForPlan) -> Result<f64> {
        self.estimator
            .estimate(TestMeasure::MemoryUsage, plan, self.root)
    }

    pub fn num_iterations(&self) -> u64 {
        self.n
    }

    pub fn max_problem_size(&self) -> u64 {
        self.n_max
    }

    pub fn memory_estimate(&self) -> f64 {
        self.m
    }

    pub fn local_memory(&self) -> f64 {
        self.lm
    }

    pub fn remote_memory(&self) -> f64 {
        self.rm
    }

    pub fn is_nested(&self) -> bool {
        self.nested
    }

    /// Number of plan footprints `M` that fit into `budget`.
    pub(crate) fn fitting_workers(&self, budget: f64) -> usize {
        (budget / self.m).floor() as usize
    }
}

fn scale(factor: f64, k: usize) -> usize {
    (factor * k as f64).ceil() as usize
}
