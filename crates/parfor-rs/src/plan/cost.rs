use serde::{Deserialize, Serialize};

use crate::error::{ParforError, Result};

use super::mapping::ParForPlan;
use super::tree::{ExecType, NodeId, NodeType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestMeasure {
    ExecTime,
    MemoryUsage,
}

/// Estimates a cost measure for the subtree rooted at a plan node.
pub trait CostEstimator {
    fn estimate(&self, measure: TestMeasure, plan: &ParForPlan, node: NodeId) -> Result<f64>;
}

/// Worst-case memory estimator driven by the per-hop estimates of the live program.
///
/// A locally executed HOP costs its recorded estimate, a remote one costs
/// `remote_hop_cost` (its data never enters the local heap). A PARFOR costs `k` times its
/// most expensive child; other inner nodes cost their most expensive child.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HopMemoryEstimator {
    pub remote_hop_cost: f64,
}

impl HopMemoryEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    fn memory(&self, plan: &ParForPlan, id: NodeId) -> Result<f64> {
        let tree = plan.tree();
        let node = tree.node(id);
        match node.node_type() {
            NodeType::Hop if node.is_leaf() => {
                if node.exec_type() == ExecType::Remote {
                    return Ok(self.remote_hop_cost);
                }
                let hop_id = node.hop().ok_or_else(|| {
                    ParforError::EstimationFailed(format!("HOP node {id} is not bound to a hop"))
                })?;
                plan.program()
                    .hop(hop_id)
                    .ok()
                    .and_then(|hop| hop.mem_estimate)
                    .ok_or_else(|| {
                        ParforError::EstimationFailed(format!(
                            "hop of node {id} has no memory estimate"
                        ))
                    })
            }
            node_type => {
                let mut max = 0.0_f64;
                for child in node.children() {
                    max = max.max(self.memory(plan, *child)?);
                }
                Ok(if node_type == NodeType::ParFor {
                    node.k().max(1) as f64 * max
                } else {
                    max
                })
            }
        }
    }
}

impl CostEstimator for HopMemoryEstimator {
    fn estimate(&self, measure: TestMeasure, plan: &ParForPlan, node: NodeId) -> Result<f64> {
        match measure {
            TestMeasure::MemoryUsage => self.memory(plan, node),
            TestMeasure::ExecTime => Err(ParforError::EstimationFailed(
                "execution time is not estimated by the hop memory model".to_string(),
            )),
        }
    }
}
