use std::io;

use thiserror::Error;

/// Failures surfaced by the rewriter, the task partitioners and the write buffer.
#[derive(Debug, Error)]
pub enum ParforError {
    /// A plan node, program block, hop, live variable or infrastructure metric the pass
    /// depends on is missing or malformed. Also reported when a task queue is closed
    /// before its producer finished.
    #[error("missing configuration: {0}")]
    ConfigMissing(String),
    #[error("cost estimation failed: {0}")]
    EstimationFailed(String),
    #[error("i/o failure on '{key}': {source}")]
    IoFailure {
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("unsupported partitioner: {0}")]
    UnsupportedPartitioner(String),
    #[error("invalid iteration range: {0}")]
    InvalidIterationRange(String),
}

impl ParforError {
    pub(crate) fn io(key: impl Into<String>, source: io::Error) -> Self {
        ParforError::IoFailure {
            key: key.into(),
            source,
        }
    }

    pub(crate) fn codec(key: impl Into<String>, err: bincode::Error) -> Self {
        ParforError::IoFailure {
            key: key.into(),
            source: io::Error::new(io::ErrorKind::InvalidData, err.to_string()),
        }
    }
}

pub type Result<T, E = ParforError> = std::result::Result<T, E>;
