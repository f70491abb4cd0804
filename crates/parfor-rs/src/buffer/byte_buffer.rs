use once_cell::sync::OnceCell;

use crate::error::{ParforError, Result};

use super::block::MatrixBlock;

/// Serialized form of one buffered block. Inserted as an empty placeholder with its
/// reserved size, then filled exactly once outside the pool lock.
#[derive(Debug)]
pub(crate) struct ByteBuffer {
    size: u64,
    sparse: bool,
    bytes: OnceCell<std::result::Result<Vec<u8>, String>>,
}

impl ByteBuffer {
    pub(crate) fn new(size: u64, sparse: bool) -> Self {
        Self {
            size,
            sparse,
            bytes: OnceCell::new(),
        }
    }

    pub(crate) fn size(&self) -> u64 {
        self.size
    }

    pub(crate) fn is_sparse(&self) -> bool {
        self.sparse
    }

    /// Encodes `block` into `page` and publishes the result to waiting readers.
    pub(crate) fn serialize(&self, key: &str, block: &MatrixBlock, mut page: Vec<u8>) -> Result<()> {
        let outcome = block
            .encode_into(&mut page)
            .map(|()| page)
            .map_err(|err| err.to_string());
        let failed = outcome.as_ref().err().cloned();
        let _ = self.bytes.set(outcome);
        match failed {
            None => Ok(()),
            Some(msg) => Err(serialization_error(key, msg)),
        }
    }

    /// Blocks until serialization finished, then returns the encoded bytes.
    pub(crate) fn wait(&self, key: &str) -> Result<&[u8]> {
        match self.bytes.wait() {
            Ok(bytes) => Ok(bytes),
            Err(msg) => Err(serialization_error(key, msg.clone())),
        }
    }

    pub(crate) fn deserialize(&self, key: &str) -> Result<MatrixBlock> {
        let bytes = self.wait(key)?;
        MatrixBlock::decode(bytes).map_err(|err| ParforError::codec(key, err))
    }

    /// Releases the encoded bytes for reuse.
    pub(crate) fn into_bytes(self) -> Option<Vec<u8>> {
        self.bytes.into_inner().and_then(|outcome| outcome.ok())
    }
}

fn serialization_error(key: &str, msg: String) -> ParforError {
    ParforError::io(
        key,
        std::io::Error::new(std::io::ErrorKind::InvalidData, msg),
    )
}
