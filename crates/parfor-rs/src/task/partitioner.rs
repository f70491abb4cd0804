use std::fmt;
use std::iter;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::TaskConfig;
use crate::error::{ParforError, Result};

use super::factoring::FactoringPartitioner;
use super::iteration::{IterationRange, Task};
use super::queue::LocalTaskQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskPartitionerKind {
    Naive,
    FixedSize,
    Static,
    Factoring,
    /// Factoring with a minimum batch size.
    ConstrainedFactoring,
}

impl TaskPartitionerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskPartitionerKind::Naive => "NAIVE",
            TaskPartitionerKind::FixedSize => "FIXED",
            TaskPartitionerKind::Static => "STATIC",
            TaskPartitionerKind::Factoring => "FACTORING",
            TaskPartitionerKind::ConstrainedFactoring => "FACTORING_CMIN",
        }
    }

    /// Instantiates the strategy. `task_size` is the fixed task size, or the minimum batch
    /// size of constrained factoring; `workers` is the number of parallel consumers.
    pub fn build(
        self,
        space: IterationSpace,
        task_size: u64,
        workers: usize,
    ) -> Result<Box<dyn TaskPartitioner>> {
        let needs_workers = matches!(
            self,
            TaskPartitionerKind::Static
                | TaskPartitionerKind::Factoring
                | TaskPartitionerKind::ConstrainedFactoring
        );
        if needs_workers && workers == 0 {
            return Err(ParforError::UnsupportedPartitioner(format!(
                "{self} requires at least one worker"
            )));
        }
        let needs_size = matches!(
            self,
            TaskPartitionerKind::FixedSize | TaskPartitionerKind::ConstrainedFactoring
        );
        if needs_size && task_size == 0 {
            return Err(ParforError::UnsupportedPartitioner(format!(
                "{self} requires a positive task size"
            )));
        }

        Ok(match self {
            TaskPartitionerKind::Naive => Box::new(NaivePartitioner { space }),
            TaskPartitionerKind::FixedSize => Box::new(FixedSizePartitioner { space, task_size }),
            TaskPartitionerKind::Static => Box::new(StaticPartitioner { space, workers }),
            TaskPartitionerKind::Factoring => Box::new(FactoringPartitioner::new(space, workers)),
            TaskPartitionerKind::ConstrainedFactoring => Box::new(
                FactoringPartitioner::constrained(space, workers, task_size),
            ),
        })
    }
}

impl fmt::Display for TaskPartitionerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskPartitionerKind {
    type Err = ParforError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NAIVE" => Ok(TaskPartitionerKind::Naive),
            "FIXED" => Ok(TaskPartitionerKind::FixedSize),
            "STATIC" => Ok(TaskPartitionerKind::Static),
            "FACTORING" => Ok(TaskPartitionerKind::Factoring),
            "FACTORING_CMIN" => Ok(TaskPartitionerKind::ConstrainedFactoring),
            other => Err(ParforError::UnsupportedPartitioner(other.to_string())),
        }
    }
}

/// When a task is emitted as a compact `(from, to, incr)` range instead of a value set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeEncoding {
    pub enabled: bool,
    /// Ranges are used only for tasks strictly larger than this.
    pub min_size: u64,
}

impl RangeEncoding {
    pub fn from_config(cfg: &TaskConfig) -> Self {
        Self {
            enabled: cfg.use_range_tasks,
            min_size: cfg.range_task_min_size,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            min_size: 0,
        }
    }

    pub(crate) fn applies(self, size: u64) -> bool {
        self.enabled && size > self.min_size
    }
}

impl Default for RangeEncoding {
    fn default() -> Self {
        Self::from_config(&TaskConfig::default())
    }
}

/// Loop variable and iteration range handed to a partitioner.
#[derive(Debug, Clone)]
pub struct IterationSpace {
    var: Arc<str>,
    range: IterationRange,
    encoding: RangeEncoding,
}

impl IterationSpace {
    pub fn new(var: &str, from: i64, to: i64, incr: i64) -> Result<Self> {
        Ok(Self {
            var: Arc::from(var),
            range: IterationRange::new(from, to, incr)?,
            encoding: RangeEncoding::default(),
        })
    }

    pub fn with_encoding(mut self, encoding: RangeEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn var(&self) -> &str {
        &self.var
    }

    pub fn range(&self) -> IterationRange {
        self.range
    }

    pub fn encoding(&self) -> RangeEncoding {
        self.encoding
    }
}

/// Nominal size of the next task and whether it is range encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskShape {
    pub size: u64,
    pub range: bool,
}

/// Strategy cutting an iteration space into consecutive tasks.
///
/// Implementations only describe task sizes; the provided methods turn them into tasks,
/// truncating the last one to the remaining iterations.
pub trait TaskPartitioner: Send + Sync {
    fn kind(&self) -> TaskPartitionerKind;

    fn space(&self) -> &IterationSpace;

    /// Shapes of consecutive tasks. The sequence may be longer than needed.
    fn task_shapes(&self) -> Box<dyn Iterator<Item = TaskShape> + '_>;

    fn tasks(&self) -> Tasks<'_> {
        let space = self.space();
        Tasks {
            var: Arc::clone(&space.var),
            range: space.range,
            shapes: self.task_shapes(),
            next: 0,
            total: space.range.len(),
        }
    }

    fn create_tasks(&self) -> Vec<Task> {
        self.tasks().collect()
    }

    /// Streams every task into `queue`, then closes its input. Returns the task count.
    ///
    /// A queue closed by its consumers before the last task fails with `ConfigMissing`:
    /// the loop's execution context went away while the tasks were still being created.
    fn create_tasks_into(&self, queue: &LocalTaskQueue<Task>) -> Result<usize> {
        let mut created = 0;
        for task in self.tasks() {
            if queue.enqueue(task).is_err() {
                return Err(ParforError::ConfigMissing(format!(
                    "task queue closed after {created} tasks of {}",
                    self.kind()
                )));
            }
            created += 1;
        }
        queue.close_input();
        log::debug!(
            "{} partitioner: streamed {} tasks for {} iterations of '{}'",
            self.kind(),
            created,
            self.space().range.len(),
            self.space().var
        );
        Ok(created)
    }
}

/// Lazily materialized tasks of a partitioner.
pub struct Tasks<'a> {
    var: Arc<str>,
    range: IterationRange,
    shapes: Box<dyn Iterator<Item = TaskShape> + 'a>,
    next: u64,
    total: u64,
}

impl Iterator for Tasks<'_> {
    type Item = Task;

    fn next(&mut self) -> Option<Task> {
        if self.next >= self.total {
            return None;
        }
        let shape = self.shapes.next()?;
        let size = shape.size.max(1).min(self.total - self.next);
        let start = self.next;
        self.next += size;
        let var = Arc::clone(&self.var);
        Some(if shape.range {
            Task::range(var, self.range.sub_range(start, size))
        } else {
            Task::set(var, (start..start + size).map(|idx| self.range.value_at(idx)))
        })
    }
}

/// One iteration per task.
#[derive(Debug, Clone)]
pub struct NaivePartitioner {
    space: IterationSpace,
}

impl TaskPartitioner for NaivePartitioner {
    fn kind(&self) -> TaskPartitionerKind {
        TaskPartitionerKind::Naive
    }

    fn space(&self) -> &IterationSpace {
        &self.space
    }

    fn task_shapes(&self) -> Box<dyn Iterator<Item = TaskShape> + '_> {
        Box::new(iter::repeat(TaskShape {
            size: 1,
            range: false,
        }))
    }
}

#[derive(Debug, Clone)]
pub struct FixedSizePartitioner {
    space: IterationSpace,
    task_size: u64,
}

impl TaskPartitioner for FixedSizePartitioner {
    fn kind(&self) -> TaskPartitionerKind {
        TaskPartitionerKind::FixedSize
    }

    fn space(&self) -> &IterationSpace {
        &self.space
    }

    fn task_shapes(&self) -> Box<dyn Iterator<Item = TaskShape> + '_> {
        Box::new(iter::repeat(TaskShape {
            size: self.task_size,
            range: self.space.encoding.applies(self.task_size),
        }))
    }
}

/// Exactly one task per worker; sizes differ by at most one iteration.
#[derive(Debug, Clone)]
pub struct StaticPartitioner {
    space: IterationSpace,
    workers: usize,
}

impl TaskPartitioner for StaticPartitioner {
    fn kind(&self) -> TaskPartitionerKind {
        TaskPartitionerKind::Static
    }

    fn space(&self) -> &IterationSpace {
        &self.space
    }

    fn task_shapes(&self) -> Box<dyn Iterator<Item = TaskShape> + '_> {
        let n = self.space.range.len();
        let p = self.workers as u64;
        let (base, extra) = (n / p, n % p);
        let encoding = self.space.encoding;
        Box::new(
            (0..p)
                .map(move |idx| base + u64::from(idx < extra))
                .filter(|size| *size > 0)
                .map(move |size| TaskShape {
                    size,
                    range: encoding.applies(size),
                }),
        )
    }
}
