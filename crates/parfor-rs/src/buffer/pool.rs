use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::config::BufferPoolConfig;
use crate::error::{ParforError, Result};

use super::block::MatrixBlock;
use super::byte_buffer::ByteBuffer;
use super::page_cache::PageCache;
use super::stats::CacheStatistics;
use super::storage::LocalStorage;

/// Which resident entry is spilled first when the buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EvictionPolicy {
    /// Oldest insertion first.
    Fifo,
    /// Least recently written or read first.
    Lru,
}

struct PoolState {
    /// Eviction order runs from the least recently used end.
    entries: LruCache<String, Arc<ByteBuffer>>,
    size: u64,
}

/// Byte-budgeted write-back cache of serialized matrix blocks in front of local storage.
///
/// All bookkeeping happens under one lock; block (de)serialization runs outside it.
/// Entries that do not fit the budget, and entries evicted to make room, live in storage.
pub struct WriteBufferPool {
    limit: u64,
    max_entry_bytes: u64,
    policy: EvictionPolicy,
    state: Mutex<Option<PoolState>>,
    storage: Arc<dyn LocalStorage>,
    pages: Option<PageCache>,
    stats: CacheStatistics,
}

impl WriteBufferPool {
    /// Creates an uninitialized pool whose budget is a fraction of `local_max_memory`.
    pub fn new(cfg: &BufferPoolConfig, local_max_memory: u64, storage: Arc<dyn LocalStorage>) -> Self {
        Self {
            limit: Self::write_buffer_size(cfg, local_max_memory),
            max_entry_bytes: cfg.max_entry_bytes,
            policy: cfg.policy,
            state: Mutex::new(None),
            storage,
            pages: cfg.page_cache.then(PageCache::new),
            stats: CacheStatistics::default(),
        }
    }

    /// Budget in bytes a pool configured with `cfg` would get.
    pub fn write_buffer_size(cfg: &BufferPoolConfig, local_max_memory: u64) -> u64 {
        (cfg.buffer_fraction * local_max_memory as f64) as u64
    }

    fn lock(&self) -> MutexGuard<'_, Option<PoolState>> {
        self.state.lock().expect("write buffer pool poisoned")
    }

    fn not_initialized() -> ParforError {
        ParforError::ConfigMissing("write buffer pool is not initialized".to_string())
    }

    /// Starts with an empty buffer. Entries resident from a previous run are dropped.
    pub fn init(&self) {
        *self.lock() = Some(PoolState {
            entries: LruCache::unbounded(),
            size: 0,
        });
        if let Some(pages) = &self.pages {
            pages.clear();
        }
        log::debug!(
            "write buffer: initialized with limit={} ({:?})",
            crate::to_mb(self.limit as f64),
            self.policy
        );
    }

    /// Drops all resident entries and the page cache. Resident entries are not spilled.
    pub fn cleanup(&self) {
        *self.lock() = None;
        if let Some(pages) = &self.pages {
            pages.clear();
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().is_some()
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Bytes currently reserved by resident entries.
    pub fn size(&self) -> u64 {
        self.lock().as_ref().map_or(0, |state| state.size)
    }

    pub fn len(&self) -> usize {
        self.lock().as_ref().map_or(0, |state| state.entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|state| state.entries.contains(key))
    }

    pub fn statistics(&self) -> &CacheStatistics {
        &self.stats
    }

    pub fn page_cache(&self) -> Option<&PageCache> {
        self.pages.as_ref()
    }

    pub fn write(&self, key: &str, block: &MatrixBlock) -> Result<()> {
        let size = block
            .exact_size_on_disk()
            .map_err(|err| ParforError::codec(key, err))?;

        if size > self.limit || size > self.max_entry_bytes {
            self.discard(key)?;
            let mut bytes = Vec::new();
            block
                .encode_into(&mut bytes)
                .map_err(|err| ParforError::codec(key, err))?;
            self.storage.write_bytes(key, &bytes)?;
            self.stats.record_fs_write();
            log::debug!(
                "write buffer: bypassed '{}' ({} bytes, limit {})",
                key,
                size,
                self.limit
            );
            return Ok(());
        }

        let buffer = Arc::new(ByteBuffer::new(size, block.is_sparse()));
        {
            let mut guard = self.lock();
            let state = guard.as_mut().ok_or_else(Self::not_initialized)?;
            if let Some(previous) = state.entries.pop(key) {
                state.size -= previous.size();
                self.recycle(previous);
            }
            while state.size + size > self.limit {
                let Some((victim_key, victim)) = state.entries.peek_lru() else {
                    break;
                };
                self.spill(victim_key, victim)?;
                if let Some((victim_key, victim)) = state.entries.pop_lru() {
                    state.size -= victim.size();
                    self.stats.record_fs_write();
                    log::trace!(
                        "write buffer: evicted '{}' ({} bytes)",
                        victim_key,
                        victim.size()
                    );
                    self.recycle(victim);
                }
            }
            state.entries.put(key.to_string(), Arc::clone(&buffer));
            state.size += size;
        }

        let page = self.take_page(size);
        if let Err(err) = buffer.serialize(key, block, page) {
            let mut guard = self.lock();
            if let Some(state) = guard.as_mut() {
                let same = state
                    .entries
                    .peek(key)
                    .is_some_and(|entry| Arc::ptr_eq(entry, &buffer));
                if same {
                    state.entries.pop(key);
                    state.size -= size;
                }
            }
            return Err(err);
        }
        self.stats.record_buffer_write();
        Ok(())
    }

    pub fn read(&self, key: &str) -> Result<MatrixBlock> {
        let buffer = {
            let mut guard = self.lock();
            let state = guard.as_mut().ok_or_else(Self::not_initialized)?;
            match self.policy {
                EvictionPolicy::Lru => state.entries.get(key).cloned(),
                EvictionPolicy::Fifo => state.entries.peek(key).cloned(),
            }
        };

        match buffer {
            Some(buffer) => {
                let block = buffer.deserialize(key)?;
                self.stats.record_buffer_hit();
                Ok(block)
            }
            None => {
                let bytes = self.storage.read_bytes(key)?;
                let block = MatrixBlock::decode(&bytes).map_err(|err| ParforError::codec(key, err))?;
                self.stats.record_fs_hit();
                Ok(block)
            }
        }
    }

    /// Frees the resident entry for `key` and deletes any spilled copy from storage.
    ///
    /// A key re-admitted after eviction can have both, so storage is always cleared.
    pub fn delete(&self, key: &str) -> Result<()> {
        let removed = {
            let mut guard = self.lock();
            let state = guard.as_mut().ok_or_else(Self::not_initialized)?;
            let removed = state.entries.pop(key);
            if let Some(entry) = &removed {
                state.size -= entry.size();
            }
            removed
        };
        if let Some(entry) = removed {
            self.recycle(entry);
        }
        self.storage.delete_if_exists(key).map(|_| ())
    }

    pub fn status(&self) -> Result<PoolStatus> {
        let guard = self.lock();
        let state = guard.as_ref().ok_or_else(Self::not_initialized)?;
        let entries = state
            .entries
            .iter()
            .rev()
            .map(|(key, buffer)| EntryStatus {
                key: key.clone(),
                size: buffer.size(),
                sparse: buffer.is_sparse(),
            })
            .collect();
        Ok(PoolStatus {
            limit: self.limit,
            size: state.size,
            entries,
        })
    }

    /// Drops a resident entry for `key` so a direct storage write is not shadowed.
    fn discard(&self, key: &str) -> Result<()> {
        let mut guard = self.lock();
        let state = guard.as_mut().ok_or_else(Self::not_initialized)?;
        if let Some(previous) = state.entries.pop(key) {
            state.size -= previous.size();
            self.recycle(previous);
        }
        Ok(())
    }

    fn spill(&self, key: &str, buffer: &ByteBuffer) -> Result<()> {
        match buffer.wait(key) {
            Ok(bytes) => self.storage.write_bytes(key, bytes),
            // nothing was ever buffered for a failed serialization
            Err(_) => Ok(()),
        }
    }

    fn take_page(&self, size: u64) -> Vec<u8> {
        let len = size as usize;
        self.pages
            .as_ref()
            .and_then(|pages| pages.get_page(len))
            .unwrap_or_else(|| Vec::with_capacity(len))
    }

    fn recycle(&self, entry: Arc<ByteBuffer>) {
        let Some(pages) = &self.pages else {
            return;
        };
        if let Ok(buffer) = Arc::try_unwrap(entry) {
            if let Some(bytes) = buffer.into_bytes() {
                pages.put_page(bytes);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryStatus {
    pub key: String,
    pub size: u64,
    pub sparse: bool,
}

/// Occupancy snapshot; entries are listed in eviction order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    pub limit: u64,
    pub size: u64,
    pub entries: Vec<EntryStatus>,
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "WRITE BUFFER STATUS --")?;
        writeln!(
            f,
            "\tWB: Buffer Meta Data: limit={}, size[bytes]={}, size[elements]={}",
            self.limit,
            self.size,
            self.entries.len()
        )?;
        let mut count = self.entries.len();
        for entry in &self.entries {
            writeln!(
                f,
                "\tWB: buffer element ({}): {}, {}, {}",
                count, entry.key, entry.size, entry.sparse
            )?;
            count -= 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::InMemoryStorage;

    fn block(seed: u32) -> MatrixBlock {
        MatrixBlock::from_fn(4, 4, |r, c| (seed * 100 + r * 4 + c) as f64)
    }

    fn pool(entries: u64, policy: EvictionPolicy) -> (WriteBufferPool, Arc<InMemoryStorage>) {
        let entry = block(0).exact_size_on_disk().unwrap();
        let cfg = BufferPoolConfig {
            buffer_fraction: 1.0,
            policy,
            ..BufferPoolConfig::default()
        };
        let storage = Arc::new(InMemoryStorage::new());
        let pool = WriteBufferPool::new(&cfg, entry * entries, storage.clone());
        pool.init();
        (pool, storage)
    }

    #[test]
    fn uninitialized_pool_rejects_access() {
        let cfg = BufferPoolConfig::default();
        let pool = WriteBufferPool::new(&cfg, 1 << 20, Arc::new(InMemoryStorage::new()));
        assert!(matches!(pool.read("a"), Err(ParforError::ConfigMissing(_))));
        pool.init();
        pool.write("a", &block(1)).unwrap();
        pool.cleanup();
        assert!(!pool.is_initialized());
    }

    #[test]
    fn block_of_exactly_limit_bytes_is_buffered() {
        let (pool, storage) = pool(1, EvictionPolicy::Fifo);
        pool.write("a", &block(1)).unwrap();
        assert_eq!(pool.size(), pool.limit());
        pool.write("b", &block(2)).unwrap();
        assert_eq!(pool.size(), pool.limit());
        assert!(storage.contains("a"));
        assert_eq!(pool.read("a").unwrap(), block(1));
    }

    #[test]
    fn rewriting_a_key_releases_its_old_bytes() {
        let (pool, _) = pool(3, EvictionPolicy::Fifo);
        pool.write("a", &block(1)).unwrap();
        pool.write("a", &block(2)).unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.size(), block(2).exact_size_on_disk().unwrap());
        assert_eq!(pool.read("a").unwrap(), block(2));
    }

    #[test]
    fn delete_drops_the_stale_spill_of_a_readmitted_key() {
        let (pool, storage) = pool(1, EvictionPolicy::Fifo);
        pool.write("a", &block(1)).unwrap();
        pool.write("b", &block(2)).unwrap();
        assert!(storage.contains("a"));
        pool.write("a", &block(3)).unwrap();
        assert!(pool.contains("a"));

        pool.delete("a").unwrap();
        assert!(!pool.contains("a"));
        assert!(!storage.contains("a"));
        assert!(matches!(pool.read("a"), Err(ParforError::IoFailure { .. })));
    }

    #[test]
    fn status_lists_entries_in_eviction_order() {
        let (pool, _) = pool(3, EvictionPolicy::Lru);
        pool.write("a", &block(1)).unwrap();
        pool.write("b", &block(2)).unwrap();
        pool.read("a").unwrap();
        let status = pool.status().unwrap();
        let keys: Vec<_> = status.entries.iter().map(|entry| entry.key.as_str()).collect();
        assert_eq!(keys, vec!["b", "a"]);
        let text = status.to_string();
        assert!(text.starts_with("WRITE BUFFER STATUS --"));
        assert!(text.contains("buffer element (2): b"));
    }

    #[test]
    fn evicted_pages_are_recycled() {
        let (pool, _) = pool(1, EvictionPolicy::Fifo);
        pool.write("a", &block(1)).unwrap();
        // the page of evicted "a" is reused for "b"
        pool.write("b", &block(2)).unwrap();
        let pages = pool.page_cache().unwrap();
        assert!(pages.is_empty());
        pool.delete("b").unwrap();
        assert_eq!(pages.len(), 1);
        pool.write("c", &block(3)).unwrap();
        assert!(pages.is_empty());
        assert_eq!(pool.read("c").unwrap(), block(3));
        pool.cleanup();
        assert!(pages.is_empty());
    }
}
