use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Write buffer traffic counters.
#[derive(Debug, Default)]
pub struct CacheStatistics {
    buffer_writes: AtomicU64,
    fs_writes: AtomicU64,
    buffer_hits: AtomicU64,
    fs_hits: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatisticsSnapshot {
    /// Blocks serialized into the buffer.
    pub buffer_writes: u64,
    /// Blocks written to local storage, by bypass or eviction.
    pub fs_writes: u64,
    pub buffer_hits: u64,
    pub fs_hits: u64,
}

impl CacheStatistics {
    pub(crate) fn record_buffer_write(&self) {
        self.buffer_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fs_write(&self) {
        self.fs_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_buffer_hit(&self) {
        self.buffer_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fs_hit(&self) {
        self.fs_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStatisticsSnapshot {
        CacheStatisticsSnapshot {
            buffer_writes: self.buffer_writes.load(Ordering::Relaxed),
            fs_writes: self.fs_writes.load(Ordering::Relaxed),
            buffer_hits: self.buffer_hits.load(Ordering::Relaxed),
            fs_hits: self.fs_hits.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.buffer_writes,
            &self.fs_writes,
            &self.buffer_hits,
            &self.fs_hits,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl fmt::Display for CacheStatisticsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cache writes (WB, FS):\t{}/{}.\nCache hits (WB, FS):\t{}/{}.",
            self.buffer_writes, self.fs_writes, self.buffer_hits, self.fs_hits
        )
    }
}
