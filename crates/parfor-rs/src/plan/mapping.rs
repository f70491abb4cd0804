use crate::error::{ParforError, Result};
use crate::task::{iteration_count, TaskPartitionerKind};

use super::program::{
    BlockId, BlockKind, Bound, DataPartitioner, ExecMode, HopId, LoopBounds, ParForParams,
    PartitionFormat, Program, ProgramBlock, ResultMerge,
};
use super::tree::{ExecType, NodeId, NodeType, OptNode, OptTree, ParamType};

/// Plan tree paired with the live program it mirrors.
///
/// Every decision that exists on both sides goes through one method here, so a PARFOR
/// node and its program block cannot drift apart.
#[derive(Debug, Clone, PartialEq)]
pub struct ParForPlan {
    tree: OptTree,
    program: Program,
}

impl ParForPlan {
    /// Builds a plan rooted at the PARFOR block `root`.
    pub fn new(program: Program, root: BlockId) -> Result<Self> {
        let block = program.block(root)?;
        if block.kind != BlockKind::ParFor {
            return Err(ParforError::ConfigMissing(format!(
                "program block {} is not a parallel loop",
                root.0
            )));
        }
        let exec_type = match block.parfor.as_ref().map(|params| params.exec_mode) {
            Some(ExecMode::RemoteMr) => ExecType::Remote,
            _ => ExecType::Local,
        };
        let num_iterations = constant_trip_count(block.bounds.as_ref())?;

        let mut tree = OptTree::new(NodeType::ParFor, exec_type);
        let id = tree.root();
        tree.bind_block(id, root);
        if let Some(n) = num_iterations {
            tree.set_param(id, ParamType::NumIterations, n.to_string());
        }
        Ok(Self { tree, program })
    }

    pub fn tree(&self) -> &OptTree {
        &self.tree
    }

    pub(crate) fn tree_mut(&mut self) -> &mut OptTree {
        &mut self.tree
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn program_mut(&mut self) -> &mut Program {
        &mut self.program
    }

    pub fn into_parts(self) -> (OptTree, Program) {
        (self.tree, self.program)
    }

    /// Adds a plan node for the child block `block` under `parent`. Loop blocks with
    /// constant bounds record their trip count.
    pub fn add_block_node(&mut self, parent: NodeId, block: BlockId) -> Result<NodeId> {
        let pb = self.program.block(block)?;
        let (node_type, exec_type) = match pb.kind {
            BlockKind::ParFor => {
                let remote = pb
                    .parfor
                    .as_ref()
                    .is_some_and(|params| params.exec_mode == ExecMode::RemoteMr);
                let exec = if remote { ExecType::Remote } else { ExecType::Local };
                (NodeType::ParFor, exec)
            }
            BlockKind::For => (NodeType::For, ExecType::Local),
            BlockKind::Generic => (NodeType::Generic, ExecType::Local),
        };
        let num_iterations = constant_trip_count(pb.bounds.as_ref())?;
        let id = self.tree.add_child(parent, node_type, exec_type);
        self.tree.bind_block(id, block);
        if let Some(n) = num_iterations {
            self.tree.set_param(id, ParamType::NumIterations, n.to_string());
        }
        Ok(id)
    }

    /// Adds a HOP leaf for `hop` under `parent`.
    pub fn add_hop_node(&mut self, parent: NodeId, hop: HopId, exec_type: ExecType) -> NodeId {
        let op = self.program.hop(hop).map(|hop| hop.op.clone()).ok();
        let id = self.tree.add_child(parent, NodeType::Hop, exec_type);
        self.tree.bind_hop(id, hop);
        if let Some(op) = op {
            self.tree.set_param(id, ParamType::OpString, op);
        }
        id
    }

    pub fn block_of(&self, node: NodeId) -> Result<BlockId> {
        self.tree
            .get(node)
            .and_then(OptNode::block)
            .ok_or_else(|| ParforError::ConfigMissing(format!("node {node} has no program block")))
    }

    pub fn hop_of(&self, node: NodeId) -> Result<HopId> {
        self.tree
            .get(node)
            .and_then(OptNode::hop)
            .ok_or_else(|| ParforError::ConfigMissing(format!("node {node} has no hop")))
    }

    pub fn parfor_params(&self, node: NodeId) -> Result<&ParForParams> {
        let block = self.block_of(node)?;
        self.program.block(block)?.parfor.as_ref().ok_or_else(|| {
            ParforError::ConfigMissing(format!("block of node {node} is not a parallel loop"))
        })
    }

    fn parfor_params_mut(&mut self, node: NodeId) -> Result<&mut ParForParams> {
        let block = self.block_of(node)?;
        self.program.block_mut(block)?.parfor.as_mut().ok_or_else(|| {
            ParforError::ConfigMissing(format!("block of node {node} is not a parallel loop"))
        })
    }

    pub fn set_exec_type(&mut self, node: NodeId, exec_type: ExecType) -> Result<()> {
        let node_type = self
            .tree
            .get(node)
            .map(OptNode::node_type)
            .ok_or_else(|| ParforError::ConfigMissing(format!("node {node} is not in the plan")))?;
        if node_type == NodeType::ParFor {
            self.parfor_params_mut(node)?.exec_mode = match exec_type {
                ExecType::Local => ExecMode::Local,
                ExecType::Remote => ExecMode::RemoteMr,
            };
        }
        self.tree.set_exec_type(node, exec_type);
        Ok(())
    }

    pub fn set_degree_of_parallelism(&mut self, node: NodeId, k: usize) -> Result<()> {
        self.parfor_params_mut(node)?.degree_of_parallelism = k;
        self.tree.set_k(node, k);
        Ok(())
    }

    /// Sets `k = 1` on `node` and every PARFOR node below it.
    pub fn set_serial_parfor(&mut self, node: NodeId) -> Result<()> {
        for id in self.tree.descendants(node) {
            if self.tree.node(id).node_type() == NodeType::ParFor {
                self.set_degree_of_parallelism(id, 1)?;
            }
        }
        Ok(())
    }

    pub fn set_task_partitioner(&mut self, node: NodeId, kind: TaskPartitionerKind) -> Result<()> {
        self.parfor_params_mut(node)?.task_partitioner = kind;
        self.tree
            .set_param(node, ParamType::TaskPartitioner, kind.as_str());
        Ok(())
    }

    pub fn set_data_partitioner(&mut self, node: NodeId, partitioner: DataPartitioner) -> Result<()> {
        self.parfor_params_mut(node)?.data_partitioner = partitioner;
        self.tree
            .set_param(node, ParamType::DataPartitioner, partitioner.to_string());
        Ok(())
    }

    /// Marks an indexing HOP as reading one partition of its input: it runs locally and its
    /// memory estimate shrinks to the slice size.
    pub fn set_partition_format(
        &mut self,
        hop_node: NodeId,
        format: PartitionFormat,
        slice_bytes: f64,
    ) -> Result<()> {
        let hop = self.hop_of(hop_node)?;
        self.program.hop_mut(hop)?.mem_estimate = Some(slice_bytes);
        self.tree.set_exec_type(hop_node, ExecType::Local);
        self.tree
            .set_param(hop_node, ParamType::DataPartitionFormat, format.as_str());
        Ok(())
    }

    pub fn set_result_merge(&mut self, node: NodeId, merge: ResultMerge) -> Result<()> {
        self.parfor_params_mut(node)?.result_merge = merge;
        self.tree
            .set_param(node, ParamType::ResultMerge, merge.to_string());
        Ok(())
    }

    pub fn set_recompile_budget(&mut self, node: NodeId, bytes: f64) -> Result<()> {
        self.parfor_params_mut(node)?.recompile_memory_budget = Some(bytes);
        Ok(())
    }

    pub fn enable_colocation(&mut self, node: NodeId, var: &str) -> Result<()> {
        self.parfor_params_mut(node)?.colocated_matrix = Some(var.to_string());
        Ok(())
    }

    /// Splits `node` into an outer remote loop over chunks of `chunk` iterations and an inner
    /// local loop over one chunk. The inner loop takes over the body and the result
    /// variables; returns the inner node.
    pub fn nest_parfor(&mut self, node: NodeId, chunk: u64, outer_var: &str) -> Result<NodeId> {
        let chunk = chunk.max(1);
        let outer_block = self.block_of(node)?;
        let n = self.tree.num_iterations(node)?;
        let (bounds, params, body) = {
            let pb = self.program.block(outer_block)?;
            let bounds = pb.bounds.clone().ok_or_else(|| {
                ParforError::ConfigMissing(format!("block of node {node} has no loop bounds"))
            })?;
            let params = pb.parfor.clone().ok_or_else(|| {
                ParforError::ConfigMissing(format!("block of node {node} is not a parallel loop"))
            })?;
            (bounds, params, pb.children.clone())
        };

        let step = chunk as i64 * bounds.incr;
        let inner_to_max = match bounds.to {
            Bound::Const(to) => Some(to),
            Bound::Relative { max, .. } => max,
        };
        let inner_bounds = LoopBounds {
            var: bounds.var.clone(),
            from: Bound::Relative {
                var: outer_var.to_string(),
                offset: 0,
                max: None,
            },
            to: Bound::Relative {
                var: outer_var.to_string(),
                offset: step - bounds.incr,
                max: inner_to_max,
            },
            incr: bounds.incr,
        };
        let inner_params = ParForParams {
            exec_mode: ExecMode::Local,
            result_vars: params.result_vars.clone(),
            ..params
        };
        let mut inner_pb = ProgramBlock::parfor(inner_bounds, inner_params);
        inner_pb.children = body;
        let inner_block = self.program.add_block(inner_pb);

        {
            let outer = self.program.block_mut(outer_block)?;
            outer.bounds = Some(LoopBounds {
                var: outer_var.to_string(),
                from: bounds.from,
                to: bounds.to,
                incr: step,
            });
            outer.children = vec![inner_block];
            if let Some(params) = outer.parfor.as_mut() {
                params.exec_mode = ExecMode::RemoteMr;
            }
        }

        let inner = self
            .tree
            .insert_between(node, NodeType::ParFor, ExecType::Local);
        self.tree.bind_block(inner, inner_block);
        self.tree
            .set_param(inner, ParamType::NumIterations, chunk.to_string());
        self.tree
            .set_param(node, ParamType::NumIterations, n.div_ceil(chunk).to_string());
        self.tree.set_exec_type(node, ExecType::Remote);
        Ok(inner)
    }

    /// Trip count `node` had before [`nest_parfor`](Self::nest_parfor) split it, or `None`
    /// when `node` is not the outer loop of such a split.
    pub fn split_trip_count(&self, node: NodeId, outer_var: &str) -> Result<Option<u64>> {
        let [inner] = self.tree.children(node) else {
            return Ok(None);
        };
        if self.tree.node(*inner).node_type() != NodeType::ParFor {
            return Ok(None);
        }
        let outer = self.program.block(self.block_of(node)?)?;
        let nested = self.program.block(self.block_of(*inner)?)?;
        match (outer.bounds.as_ref(), nested.bounds.as_ref()) {
            (
                Some(LoopBounds {
                    var,
                    from: Bound::Const(from),
                    to: Bound::Const(to),
                    ..
                }),
                Some(LoopBounds {
                    from: Bound::Relative { var: base, .. },
                    incr,
                    ..
                }),
            ) if var == outer_var && base == outer_var => iteration_count(*from, *to, *incr).map(Some),
            _ => Ok(None),
        }
    }

    /// Demotes a PARFOR node to a sequential FOR loop on both sides.
    pub fn replace_with_for(&mut self, node: NodeId) -> Result<()> {
        let old = self.block_of(node)?;
        let pb = self.program.block(old)?;
        let bounds = pb.bounds.clone().ok_or_else(|| {
            ParforError::ConfigMissing(format!("block of node {node} has no loop bounds"))
        })?;
        let mut replacement = ProgramBlock::for_loop(bounds);
        replacement.children = pb.children.clone();
        let id = self.program.replace_block(old, replacement);
        self.tree.bind_block(node, id);
        self.tree.set_node_type(node, NodeType::For);
        self.tree.set_exec_type(node, ExecType::Local);
        Ok(())
    }
}

fn constant_trip_count(bounds: Option<&LoopBounds>) -> Result<Option<u64>> {
    match bounds {
        Some(LoopBounds {
            from: Bound::Const(from),
            to: Bound::Const(to),
            incr,
            ..
        }) => iteration_count(*from, *to, *incr).map(Some),
        _ => Ok(None),
    }
}
