use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum BlockData {
    /// Row-major values.
    Dense(Vec<f64>),
    /// Nonzero cells as `(row, col, value)`, sorted by position.
    Sparse(Vec<(u32, u32, f64)>),
}

/// Matrix block in dense or coordinate-sparse layout. Its serialized form is the byte
/// representation kept by the write buffer and in local storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixBlock {
    rows: u32,
    cols: u32,
    data: BlockData,
}

impl MatrixBlock {
    pub fn zeros(rows: u32, cols: u32) -> Self {
        Self::from_fn(rows, cols, |_, _| 0.0)
    }

    pub fn from_fn(rows: u32, cols: u32, mut f: impl FnMut(u32, u32) -> f64) -> Self {
        let mut values = Vec::with_capacity(rows as usize * cols as usize);
        for row in 0..rows {
            for col in 0..cols {
                values.push(f(row, col));
            }
        }
        Self {
            rows,
            cols,
            data: BlockData::Dense(values),
        }
    }

    /// Sparse block from `(row, col, value)` cells; zeros and cells outside the block are
    /// dropped, later duplicates win.
    pub fn sparse(rows: u32, cols: u32, cells: impl IntoIterator<Item = (u32, u32, f64)>) -> Self {
        let mut entries: Vec<(u32, u32, f64)> = cells
            .into_iter()
            .filter(|&(row, col, value)| row < rows && col < cols && value != 0.0)
            .collect();
        entries.sort_by_key(|&(row, col, _)| (row, col));
        entries.dedup_by(|later, earlier| {
            let same = (later.0, later.1) == (earlier.0, earlier.1);
            if same {
                earlier.2 = later.2;
            }
            same
        });
        Self {
            rows,
            cols,
            data: BlockData::Sparse(entries),
        }
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self.data, BlockData::Sparse(_))
    }

    pub fn get(&self, row: u32, col: u32) -> f64 {
        if row >= self.rows || col >= self.cols {
            return 0.0;
        }
        match &self.data {
            BlockData::Dense(values) => values[row as usize * self.cols as usize + col as usize],
            BlockData::Sparse(entries) => entries
                .binary_search_by_key(&(row, col), |&(r, c, _)| (r, c))
                .map_or(0.0, |idx| entries[idx].2),
        }
    }

    pub fn nnz(&self) -> u64 {
        match &self.data {
            BlockData::Dense(values) => values.iter().filter(|value| **value != 0.0).count() as u64,
            BlockData::Sparse(entries) => entries.len() as u64,
        }
    }

    /// Exact length of the serialized block in bytes.
    pub fn exact_size_on_disk(&self) -> bincode::Result<u64> {
        bincode::serialized_size(self)
    }

    pub(crate) fn encode_into(&self, buf: &mut Vec<u8>) -> bincode::Result<()> {
        buf.clear();
        bincode::serialize_into(buf, self)
    }

    pub(crate) fn decode(bytes: &[u8]) -> bincode::Result<Self> {
        bincode::deserialize(bytes)
    }
}
