//! Write-back buffer for serialized matrix blocks over local secondary storage.

mod block;
mod byte_buffer;
mod page_cache;
mod pool;
mod stats;
mod storage;

pub use block::MatrixBlock;
pub use page_cache::PageCache;
pub use pool::{EntryStatus, EvictionPolicy, PoolStatus, WriteBufferPool};
pub use stats::{CacheStatistics, CacheStatisticsSnapshot};
pub use storage::{InMemoryStorage, LocalFileStorage, LocalStorage};
