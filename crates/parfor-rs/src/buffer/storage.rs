use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use crate::error::{ParforError, Result};

/// Byte-exact local secondary storage addressed by the keys the write buffer uses.
pub trait LocalStorage: Send + Sync {
    fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()>;
    fn read_bytes(&self, key: &str) -> Result<Vec<u8>>;
    /// Returns whether something was deleted.
    fn delete_if_exists(&self, key: &str) -> Result<bool>;
}

/// Files under a scratch directory; keys are relative paths below it.
#[derive(Debug, Clone)]
pub struct LocalFileStorage {
    root: PathBuf,
}

impl LocalFileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|err| ParforError::io(root.display().to_string(), err))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let rel = Path::new(key);
        let valid = !key.is_empty()
            && rel
                .components()
                .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
        if !valid {
            return Err(ParforError::io(
                key,
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "storage keys must be relative paths inside the scratch directory",
                ),
            ));
        }
        Ok(self.root.join(rel))
    }
}

impl LocalStorage for LocalFileStorage {
    fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| ParforError::io(key, err))?;
        }
        fs::write(&path, bytes).map_err(|err| ParforError::io(key, err))
    }

    fn read_bytes(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(key)?;
        fs::read(&path).map_err(|err| ParforError::io(key, err))
    }

    fn delete_if_exists(&self, key: &str) -> Result<bool> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(ParforError::io(key, err)),
        }
    }
}

/// Storage kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.files
            .lock()
            .expect("in-memory storage poisoned")
            .contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.files.lock().expect("in-memory storage poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LocalStorage for InMemoryStorage {
    fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.files
            .lock()
            .expect("in-memory storage poisoned")
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn read_bytes(&self, key: &str) -> Result<Vec<u8>> {
        self.files
            .lock()
            .expect("in-memory storage poisoned")
            .get(key)
            .cloned()
            .ok_or_else(|| ParforError::io(key, io::Error::from(io::ErrorKind::NotFound)))
    }

    fn delete_if_exists(&self, key: &str) -> Result<bool> {
        Ok(self
            .files
            .lock()
            .expect("in-memory storage poisoned")
            .remove(key)
            .is_some())
    }
}
