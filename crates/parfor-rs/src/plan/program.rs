//! Live program representation mirrored by the plan tree.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ParforError, Result};
use crate::task::TaskPartitionerKind;

/// Operator string of a right-indexing (read) operation.
pub const RIGHT_INDEXING_OP: &str = "rix";
/// Operator string of a left-indexing (write) operation.
pub const LEFT_INDEXING_OP: &str = "lix";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HopId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecMode {
    Local,
    RemoteMr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DataPartitioner {
    #[default]
    None,
    RemoteMr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PartitionFormat {
    None,
    RowWise,
    RowBlockWise,
    ColumnWise,
    ColumnBlockWise,
}

impl PartitionFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            PartitionFormat::None => "NONE",
            PartitionFormat::RowWise => "ROW_WISE",
            PartitionFormat::RowBlockWise => "ROW_BLOCK_WISE",
            PartitionFormat::ColumnWise => "COLUMN_WISE",
            PartitionFormat::ColumnBlockWise => "COLUMN_BLOCK_WISE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "NONE" => Some(PartitionFormat::None),
            "ROW_WISE" => Some(PartitionFormat::RowWise),
            "ROW_BLOCK_WISE" => Some(PartitionFormat::RowBlockWise),
            "COLUMN_WISE" => Some(PartitionFormat::ColumnWise),
            "COLUMN_BLOCK_WISE" => Some(PartitionFormat::ColumnBlockWise),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ResultMerge {
    #[default]
    LocalAutomatic,
    LocalMem,
    LocalFile,
    RemoteMr,
}

macro_rules! display_as_debug_upper {
    ($($ty:ty => { $($variant:path => $text:literal),* $(,)? }),* $(,)?) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(match self { $($variant => $text),* })
                }
            }
        )*
    };
}

display_as_debug_upper! {
    ExecMode => { ExecMode::Local => "LOCAL", ExecMode::RemoteMr => "REMOTE_MR" },
    DataPartitioner => { DataPartitioner::None => "NONE", DataPartitioner::RemoteMr => "REMOTE_MR" },
    ResultMerge => {
        ResultMerge::LocalAutomatic => "LOCAL_AUTOMATIC",
        ResultMerge::LocalMem => "LOCAL_MEM",
        ResultMerge::LocalFile => "LOCAL_FILE",
        ResultMerge::RemoteMr => "REMOTE_MR",
    },
}

/// One end of a loop range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bound {
    Const(i64),
    /// `var + offset`, optionally clamped to `max`.
    Relative {
        var: String,
        offset: i64,
        max: Option<i64>,
    },
}

impl Bound {
    pub fn resolve(&self, scope: &HashMap<String, i64>) -> Result<i64> {
        match self {
            Bound::Const(value) => Ok(*value),
            Bound::Relative { var, offset, max } => {
                let base = scope.get(var).ok_or_else(|| {
                    ParforError::ConfigMissing(format!("loop bound variable '{var}' is unbound"))
                })?;
                match (base.checked_add(*offset), max) {
                    (Some(value), Some(max)) => Ok(value.min(*max)),
                    (Some(value), None) => Ok(value),
                    // an upward overflow still lands on the clamp
                    (None, Some(max)) if *offset > 0 => Ok(*max),
                    (None, _) => Err(ParforError::ConfigMissing(format!(
                        "loop bound '{var}' + {offset} overflows for {var} = {base}"
                    ))),
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopBounds {
    pub var: String,
    pub from: Bound,
    pub to: Bound,
    pub incr: i64,
}

impl LoopBounds {
    pub fn constant(var: impl Into<String>, from: i64, to: i64, incr: i64) -> Self {
        Self {
            var: var.into(),
            from: Bound::Const(from),
            to: Bound::Const(to),
            incr,
        }
    }
}

/// Execution settings of a parallel loop block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParForParams {
    pub exec_mode: ExecMode,
    pub degree_of_parallelism: usize,
    pub task_partitioner: TaskPartitionerKind,
    pub data_partitioner: DataPartitioner,
    pub result_merge: ResultMerge,
    pub recompile_memory_budget: Option<f64>,
    pub colocated_matrix: Option<String>,
    pub result_vars: Vec<String>,
    /// Read-only matrices of the loop body and the partition format implied by how the
    /// iteration variable indexes them.
    pub partition_candidates: Vec<(String, PartitionFormat)>,
}

impl Default for ParForParams {
    fn default() -> Self {
        Self {
            exec_mode: ExecMode::Local,
            degree_of_parallelism: 1,
            task_partitioner: TaskPartitionerKind::Factoring,
            data_partitioner: DataPartitioner::None,
            result_merge: ResultMerge::LocalAutomatic,
            recompile_memory_budget: None,
            colocated_matrix: None,
            result_vars: Vec::new(),
            partition_candidates: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockKind {
    Generic,
    For,
    ParFor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramBlock {
    pub kind: BlockKind,
    pub bounds: Option<LoopBounds>,
    pub children: Vec<BlockId>,
    /// Present exactly when `kind == ParFor`.
    pub parfor: Option<ParForParams>,
}

impl ProgramBlock {
    pub fn parfor(bounds: LoopBounds, params: ParForParams) -> Self {
        Self {
            kind: BlockKind::ParFor,
            bounds: Some(bounds),
            children: Vec::new(),
            parfor: Some(params),
        }
    }

    pub fn for_loop(bounds: LoopBounds) -> Self {
        Self {
            kind: BlockKind::For,
            bounds: Some(bounds),
            children: Vec::new(),
            parfor: None,
        }
    }

    pub fn generic() -> Self {
        Self {
            kind: BlockKind::Generic,
            bounds: None,
            children: Vec::new(),
            parfor: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopInput {
    pub name: String,
    /// True for a plain variable read, as opposed to a literal or computed expression.
    pub is_data: bool,
}

impl HopInput {
    pub fn data(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_data: true,
        }
    }

    pub fn expr(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_data: false,
        }
    }
}

/// Operator of the abstract plan. Indexing hops list their inputs as
/// `[matrix, row_lower, row_upper, col_lower, col_upper]`; left indexing prepends the
/// written target: `[target, source, row_lower, row_upper, col_lower, col_upper]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hop {
    pub op: String,
    pub inputs: Vec<HopInput>,
    pub mem_estimate: Option<f64>,
}

impl Hop {
    pub fn new(op: impl Into<String>, inputs: Vec<HopInput>, mem_estimate: Option<f64>) -> Self {
        Self {
            op: op.into(),
            inputs,
            mem_estimate,
        }
    }

    pub fn input_name(&self, index: usize) -> Option<&str> {
        self.inputs.get(index).map(|input| input.name.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    blocks: Vec<ProgramBlock>,
    hops: Vec<Hop>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_block(&mut self, block: ProgramBlock) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(block);
        id
    }

    /// Adds `block` as the last child of `parent`.
    pub fn add_child_block(&mut self, parent: BlockId, block: ProgramBlock) -> Result<BlockId> {
        self.block(parent)?;
        let id = self.add_block(block);
        self.blocks[parent.0 as usize].children.push(id);
        Ok(id)
    }

    pub fn add_hop(&mut self, hop: Hop) -> HopId {
        let id = HopId(self.hops.len() as u32);
        self.hops.push(hop);
        id
    }

    pub fn block(&self, id: BlockId) -> Result<&ProgramBlock> {
        self.blocks
            .get(id.0 as usize)
            .ok_or_else(|| ParforError::ConfigMissing(format!("program block {} not found", id.0)))
    }

    pub fn block_mut(&mut self, id: BlockId) -> Result<&mut ProgramBlock> {
        self.blocks
            .get_mut(id.0 as usize)
            .ok_or_else(|| ParforError::ConfigMissing(format!("program block {} not found", id.0)))
    }

    pub fn hop(&self, id: HopId) -> Result<&Hop> {
        self.hops
            .get(id.0 as usize)
            .ok_or_else(|| ParforError::ConfigMissing(format!("hop {} not found", id.0)))
    }

    pub fn hop_mut(&mut self, id: HopId) -> Result<&mut Hop> {
        self.hops
            .get_mut(id.0 as usize)
            .ok_or_else(|| ParforError::ConfigMissing(format!("hop {} not found", id.0)))
    }

    pub fn parent_of(&self, id: BlockId) -> Option<BlockId> {
        self.blocks
            .iter()
            .position(|block| block.children.contains(&id))
            .map(|pos| BlockId(pos as u32))
    }

    /// Swaps `old` for a freshly added `replacement` in its parent's child list.
    pub(crate) fn replace_block(&mut self, old: BlockId, replacement: ProgramBlock) -> BlockId {
        let parent = self.parent_of(old);
        let id = self.add_block(replacement);
        if let Some(parent) = parent {
            for child in &mut self.blocks[parent.0 as usize].children {
                if *child == old {
                    *child = id;
                }
            }
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_bound_clamps_to_max() {
        let mut scope = HashMap::new();
        scope.insert("__pixi".to_string(), 91);
        let to = Bound::Relative {
            var: "__pixi".to_string(),
            offset: 24,
            max: Some(101),
        };
        assert_eq!(to.resolve(&scope).unwrap(), 101);
        scope.insert("__pixi".to_string(), 1);
        assert_eq!(to.resolve(&scope).unwrap(), 25);
        assert!(Bound::Relative {
            var: "j".to_string(),
            offset: 0,
            max: None
        }
        .resolve(&scope)
        .is_err());
    }

    #[test]
    fn overflowing_relative_bound_is_rejected_unless_clamped() {
        let mut scope = HashMap::new();
        scope.insert("__pixi".to_string(), i64::MAX - 3);
        let clamped = Bound::Relative {
            var: "__pixi".to_string(),
            offset: 10,
            max: Some(i64::MAX - 1),
        };
        assert_eq!(clamped.resolve(&scope).unwrap(), i64::MAX - 1);

        let open = Bound::Relative {
            var: "__pixi".to_string(),
            offset: 10,
            max: None,
        };
        assert!(matches!(
            open.resolve(&scope),
            Err(ParforError::ConfigMissing(_))
        ));
    }

    #[test]
    fn replace_block_rewires_parent() {
        let mut program = Program::new();
        let outer = program.add_block(ProgramBlock::generic());
        let inner = program
            .add_child_block(
                outer,
                ProgramBlock::parfor(LoopBounds::constant("i", 1, 10, 1), ParForParams::default()),
            )
            .unwrap();
        let replacement = program.replace_block(
            inner,
            ProgramBlock::for_loop(LoopBounds::constant("i", 1, 10, 1)),
        );
        assert_eq!(program.block(outer).unwrap().children, vec![replacement]);
        assert_eq!(program.parent_of(inner), None);
    }

    #[test]
    fn partition_format_round_trips_through_text() {
        for fmt in [
            PartitionFormat::RowWise,
            PartitionFormat::ColumnBlockWise,
            PartitionFormat::None,
        ] {
            assert_eq!(PartitionFormat::parse(fmt.as_str()), Some(fmt));
        }
        assert_eq!(PartitionFormat::parse("DIAG"), None);
    }
}
