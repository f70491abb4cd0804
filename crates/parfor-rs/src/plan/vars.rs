use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// On-disk representation of a live matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MatrixFormat {
    #[default]
    BinaryBlock,
    BinaryCell,
    TextCell,
    Csv,
}

/// Metadata of a live matrix variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixMeta {
    pub rows: u64,
    pub cols: u64,
    pub nnz: u64,
    pub format: MatrixFormat,
}

impl MatrixMeta {
    pub fn new(rows: u64, cols: u64, nnz: u64) -> Self {
        Self {
            rows,
            cols,
            nnz,
            format: MatrixFormat::BinaryBlock,
        }
    }

    pub fn with_format(mut self, format: MatrixFormat) -> Self {
        self.format = format;
        self
    }
}

/// Live variable scope visible to the loop being compiled. Only matrices are tracked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalVariableMap {
    matrices: HashMap<String, MatrixMeta>,
}

impl LocalVariableMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, meta: MatrixMeta) -> Option<MatrixMeta> {
        self.matrices.insert(name.into(), meta)
    }

    pub fn get(&self, name: &str) -> Option<&MatrixMeta> {
        self.matrices.get(name)
    }

    pub fn len(&self) -> usize {
        self.matrices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matrices.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, MatrixMeta)> for LocalVariableMap {
    fn from_iter<I: IntoIterator<Item = (S, MatrixMeta)>>(iter: I) -> Self {
        Self {
            matrices: iter
                .into_iter()
                .map(|(name, meta)| (name.into(), meta))
                .collect(),
        }
    }
}
