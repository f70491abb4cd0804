use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

use serde::{Deserialize, Serialize};

use crate::error::{ParforError, Result};

use super::program::{BlockId, HopId};

/// Stable identifier of a node inside an [`OptTree`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    Generic,
    FuncCall,
    If,
    While,
    For,
    ParFor,
    Hop,
}

impl NodeType {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Generic => "GENERIC",
            NodeType::FuncCall => "FUNCCALL",
            NodeType::If => "IF",
            NodeType::While => "WHILE",
            NodeType::For => "FOR",
            NodeType::ParFor => "PARFOR",
            NodeType::Hop => "HOP",
        }
    }
}

/// Where a node executes: in-process (`Local`) or as distributed batch jobs (`Remote`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecType {
    Local,
    Remote,
}

impl ExecType {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecType::Local => "CP",
            ExecType::Remote => "MR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ParamType {
    NumIterations,
    OpString,
    DataPartitioner,
    DataPartitionFormat,
    TaskPartitioner,
    ResultMerge,
}

impl ParamType {
    pub fn as_str(self) -> &'static str {
        match self {
            ParamType::NumIterations => "NUM_ITERATIONS",
            ParamType::OpString => "OPSTRING",
            ParamType::DataPartitioner => "DATA_PARTITIONER",
            ParamType::DataPartitionFormat => "DATA_PARTITION_FORMAT",
            ParamType::TaskPartitioner => "TASK_PARTITIONER",
            ParamType::ResultMerge => "RESULT_MERGE",
        }
    }
}

/// Plan node describing one block or operator and its resolved execution decisions.
#[derive(Debug, Clone, PartialEq)]
pub struct OptNode {
    id: NodeId,
    node_type: NodeType,
    exec_type: ExecType,
    children: Vec<NodeId>,
    params: BTreeMap<ParamType, String>,
    k: usize,
    block: Option<BlockId>,
    hop: Option<HopId>,
}

impl OptNode {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    pub fn exec_type(&self) -> ExecType {
        self.exec_type
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn param(&self, ty: ParamType) -> Option<&str> {
        self.params.get(&ty).map(String::as_str)
    }

    pub fn params(&self) -> &BTreeMap<ParamType, String> {
        &self.params
    }

    /// Live program block this node mirrors (PARFOR/FOR nodes).
    pub fn block(&self) -> Option<BlockId> {
        self.block
    }

    /// Operator this node mirrors (HOP nodes).
    pub fn hop(&self) -> Option<HopId> {
        self.hop
    }
}

/// Arena-backed plan tree. Nodes are never removed, so a [`NodeId`] stays valid for the
/// lifetime of the tree.
#[derive(Debug, Clone, PartialEq)]
pub struct OptTree {
    nodes: Vec<OptNode>,
    root: NodeId,
}

impl OptTree {
    /// Creates a tree consisting of a single root node.
    pub fn new(node_type: NodeType, exec_type: ExecType) -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            root: NodeId(0),
        };
        tree.root = tree.alloc(node_type, exec_type);
        tree
    }

    fn alloc(&mut self, node_type: NodeType, exec_type: ExecType) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(OptNode {
            id,
            node_type,
            exec_type,
            children: Vec::new(),
            params: BTreeMap::new(),
            k: 1,
            block: None,
            hop: None,
        });
        id
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Panics for an id of another tree; see [`OptTree::get`].
    pub fn node(&self, id: NodeId) -> &OptNode {
        &self.nodes[id.0 as usize]
    }

    pub fn get(&self, id: NodeId) -> Option<&OptNode> {
        self.nodes.get(id.0 as usize)
    }

    fn node_mut(&mut self, id: NodeId) -> &mut OptNode {
        &mut self.nodes[id.0 as usize]
    }

    pub fn contains(&self, id: NodeId) -> bool {
        (id.0 as usize) < self.nodes.len()
    }

    /// Appends a new child under `parent` and returns its id.
    pub fn add_child(&mut self, parent: NodeId, node_type: NodeType, exec_type: ExecType) -> NodeId {
        let id = self.alloc(node_type, exec_type);
        self.node_mut(parent).children.push(id);
        id
    }

    /// Inserts a fresh node between `parent` and all of its current children.
    pub(crate) fn insert_between(
        &mut self,
        parent: NodeId,
        node_type: NodeType,
        exec_type: ExecType,
    ) -> NodeId {
        let id = self.alloc(node_type, exec_type);
        let moved = std::mem::take(&mut self.node_mut(parent).children);
        self.node_mut(id).children = moved;
        self.node_mut(parent).children.push(id);
        id
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|node| node.children.contains(&id))
            .map(|node| node.id)
    }

    pub fn set_param(&mut self, id: NodeId, ty: ParamType, value: impl Into<String>) {
        self.node_mut(id).params.insert(ty, value.into());
    }

    pub fn set_exec_type(&mut self, id: NodeId, exec_type: ExecType) {
        self.node_mut(id).exec_type = exec_type;
    }

    pub(crate) fn set_node_type(&mut self, id: NodeId, node_type: NodeType) {
        self.node_mut(id).node_type = node_type;
    }

    pub(crate) fn set_k(&mut self, id: NodeId, k: usize) {
        self.node_mut(id).k = k;
    }

    pub fn bind_block(&mut self, id: NodeId, block: BlockId) {
        self.node_mut(id).block = Some(block);
    }

    pub fn bind_hop(&mut self, id: NodeId, hop: HopId) {
        self.node_mut(id).hop = Some(hop);
    }

    /// Trip count recorded for a loop node.
    pub fn num_iterations(&self, id: NodeId) -> Result<u64> {
        let raw = self.node(id).param(ParamType::NumIterations).ok_or_else(|| {
            ParforError::ConfigMissing(format!("node {id} has no NUM_ITERATIONS parameter"))
        })?;
        raw.trim().parse::<u64>().map_err(|_| {
            ParforError::ConfigMissing(format!(
                "node {id} has malformed NUM_ITERATIONS parameter '{raw}'"
            ))
        })
    }

    /// Largest trip count among the loop nodes of the subtree rooted at `id`.
    pub fn max_problem_size(&self, id: NodeId) -> u64 {
        let node = self.node(id);
        let own = match node.node_type {
            NodeType::ParFor | NodeType::For | NodeType::While => {
                self.num_iterations(id).unwrap_or(0)
            }
            _ => 0,
        };
        node.children
            .iter()
            .map(|child| self.max_problem_size(*child))
            .fold(own, u64::max)
    }

    /// True when no node of the subtree is forced to execute remotely.
    pub fn is_cp_only(&self, id: NodeId) -> bool {
        let node = self.node(id);
        if node.node_type == NodeType::Hop && node.exec_type == ExecType::Remote {
            return false;
        }
        node.children.iter().all(|child| self.is_cp_only(*child))
    }

    /// True when some strict descendant is a PARFOR node.
    pub fn has_nested_parallelism(&self, id: NodeId) -> bool {
        self.node(id).children.iter().any(|child| {
            self.node(*child).node_type == NodeType::ParFor || self.has_nested_parallelism(*child)
        })
    }

    /// Number of workers concurrently active below and including `id`.
    pub fn total_k(&self, id: NodeId) -> usize {
        let node = self.node(id);
        let below = node
            .children
            .iter()
            .map(|child| self.total_k(*child))
            .max()
            .unwrap_or(1);
        match node.node_type {
            NodeType::ParFor => node.k.max(1) * below,
            _ => below,
        }
    }

    /// Ids of the subtree rooted at `id` in pre-order.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.node(next).children.iter().rev().copied());
        }
        out
    }

    /// Indented listing of the tree and its decisions.
    pub fn explain(&self) -> String {
        let mut out = String::new();
        self.explain_node(self.root, 0, &mut out);
        out
    }

    fn explain_node(&self, id: NodeId, depth: usize, out: &mut String) {
        let node = self.node(id);
        let _ = write!(
            out,
            "{:indent$}--{} {} ({}",
            "",
            node.node_type.as_str(),
            id,
            node.exec_type.as_str(),
            indent = depth * 2
        );
        if node.node_type == NodeType::ParFor {
            let _ = write!(out, ", k={}", node.k);
        }
        for (ty, value) in &node.params {
            let _ = write!(out, ", {}={}", ty.as_str(), value);
        }
        out.push_str(")\n");
        for child in &node.children {
            self.explain_node(*child, depth + 1, out);
        }
    }
}
