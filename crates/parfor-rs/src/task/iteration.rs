use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::{ParforError, Result};

/// Number of iterations of the loop `for (v = from; v <= to; v += incr)`.
pub fn iteration_count(from: i64, to: i64, incr: i64) -> Result<u64> {
    if incr <= 0 {
        return Err(ParforError::InvalidIterationRange(format!(
            "increment must be positive, got {incr} for range [{from}, {to}]"
        )));
    }
    if to < from {
        return Ok(0);
    }
    let count = (i128::from(to) - i128::from(from)) / i128::from(incr) + 1;
    u64::try_from(count).map_err(|_| {
        ParforError::InvalidIterationRange(format!(
            "range [{from}, {to}] step {incr} has more than {} iterations",
            u64::MAX
        ))
    })
}

/// Validated `(from, to, incr)` triple with a positive increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IterationRange {
    from: i64,
    to: i64,
    incr: i64,
}

impl IterationRange {
    pub fn new(from: i64, to: i64, incr: i64) -> Result<Self> {
        iteration_count(from, to, incr)?;
        Ok(Self { from, to, incr })
    }

    pub fn from(&self) -> i64 {
        self.from
    }

    pub fn to(&self) -> i64 {
        self.to
    }

    pub fn incr(&self) -> i64 {
        self.incr
    }

    /// Iteration count; saturates for a range that bypassed [`IterationRange::new`].
    pub fn len(&self) -> u64 {
        iteration_count(self.from, self.to, self.incr).unwrap_or(u64::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value of the `index`-th iteration.
    pub fn value_at(&self, index: u64) -> i64 {
        self.from + index as i64 * self.incr
    }

    /// The `len` iterations starting at the `start`-th one.
    pub(crate) fn sub_range(&self, start: u64, len: u64) -> IterationRange {
        IterationRange {
            from: self.value_at(start),
            to: self.value_at(start + len.max(1) - 1),
            incr: self.incr,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = i64> {
        let range = *self;
        (0..range.len()).map(move |index| range.value_at(index))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    /// Explicitly enumerated loop variable values.
    IterationSet,
    /// Exactly three values: from, to and increment.
    IterationRange,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::IterationSet => "SET",
            TaskType::IterationRange => "RANGE",
        }
    }
}

/// Unit of loop-iteration work handed to one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    task_type: TaskType,
    iter_var: Arc<str>,
    values: SmallVec<[i64; 4]>,
}

impl Task {
    pub fn set(iter_var: Arc<str>, values: impl IntoIterator<Item = i64>) -> Self {
        Self {
            task_type: TaskType::IterationSet,
            iter_var,
            values: values.into_iter().collect(),
        }
    }

    pub fn range(iter_var: Arc<str>, range: IterationRange) -> Self {
        let mut values = SmallVec::new();
        values.extend([range.from, range.to, range.incr]);
        Self {
            task_type: TaskType::IterationRange,
            iter_var,
            values,
        }
    }

    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    pub fn iter_var(&self) -> &str {
        &self.iter_var
    }

    /// Raw task payload: enumerated values, or `[from, to, incr]` for range tasks.
    pub fn values(&self) -> &[i64] {
        &self.values
    }

    fn as_range(&self) -> Option<IterationRange> {
        match (self.task_type, self.values.as_slice()) {
            (TaskType::IterationRange, &[from, to, incr]) => Some(IterationRange { from, to, incr }),
            _ => None,
        }
    }

    /// Number of loop iterations the task covers.
    pub fn len(&self) -> u64 {
        match self.as_range() {
            Some(range) => range.len(),
            None => self.values.len() as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Loop variable values in execution order.
    pub fn iterations(&self) -> Box<dyn Iterator<Item = i64> + '_> {
        match self.as_range() {
            Some(range) => Box::new(range.iter()),
            None => Box::new(self.values.iter().copied()),
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task (type={}, {}=[", self.task_type.as_str(), self.iter_var)?;
        for (idx, value) in self.values.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "{value}")?;
        }
        f.write_str("])")
    }
}
